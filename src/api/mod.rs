//! Request mapping for the billing-components endpoints.
//!
//! No server is bundled. An HTTP layer resolves a [`Caller`] from the
//! request headers and calls [`BillingComponents`]:
//!
//! - `GET /billing-components` → [`BillingComponents::list`]
//! - `GET /billing-components/{year}/{month}` → [`BillingComponents::get`]
//!
//! Both accept an optional `for_user` query parameter reserved to admins.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use thiserror::Error;

use crate::model::{BillingSnapshot, first_of_month};
use crate::store::{SnapshotStore, StoreError};

pub const USER_ID_HEADER: &str = "X-UserId";
pub const USER_ROLES_HEADER: &str = "X-User-Roles";
pub const ADMIN_ROLE: &str = "admin";

const ROLE_SEPARATOR: &str = ", ";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing caller identity")]
    MissingIdentity,

    #[error("invalid period {year}-{month}")]
    InvalidPeriod { year: String, month: String },

    #[error("role 'admin' required to read billing data of another user")]
    Forbidden,

    #[error("internal error: {0}")]
    Internal(#[from] StoreError),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingIdentity | Self::InvalidPeriod { .. } => 400,
            Self::Forbidden => 403,
            Self::Internal(_) => 500,
        }
    }

    pub fn is_caller_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Identity of the requesting user as forwarded by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn from_headers(headers: &HeaderMap) -> ApiResult<Self> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::MissingIdentity)?;

        let roles = headers
            .get(USER_ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(ROLE_SEPARATOR)
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            user_id: user_id.to_string(),
            roles,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }
}

/// User whose data is read: the caller, or `for_user` when the caller is an admin.
pub fn resolve_subject<'a>(caller: &'a Caller, for_user: Option<&'a str>) -> ApiResult<&'a str> {
    match for_user.map(str::trim).filter(|u| !u.is_empty()) {
        None => Ok(&caller.user_id),
        Some(other) if caller.is_admin() => Ok(other),
        Some(_) => Err(ApiError::Forbidden),
    }
}

/// First instant of the month named by the path segments.
pub fn parse_period(year: &str, month: &str) -> ApiResult<DateTime<Utc>> {
    let invalid = || ApiError::InvalidPeriod {
        year: year.to_string(),
        month: month.to_string(),
    };
    let y: i32 = year.trim().parse().map_err(|_| invalid())?;
    let m: u32 = month.trim().parse().map_err(|_| invalid())?;
    first_of_month(y, m).map_err(|_| invalid())
}

pub struct BillingComponents<S> {
    store: S,
}

impl<S: SnapshotStore> BillingComponents<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Periods with stored snapshots, most recent first.
    pub async fn list(
        &self,
        caller: &Caller,
        for_user: Option<&str>,
    ) -> ApiResult<Vec<DateTime<Utc>>> {
        let subject = resolve_subject(caller, for_user)?;
        let periods = self.store.list_available_periods(subject).await?;
        tracing::debug!(user_id = subject, periods = periods.len(), "Listed billing periods");
        Ok(periods)
    }

    /// Snapshots of one month, newest computation first.
    pub async fn get(
        &self,
        caller: &Caller,
        for_user: Option<&str>,
        year: &str,
        month: &str,
    ) -> ApiResult<Vec<BillingSnapshot>> {
        let subject = resolve_subject(caller, for_user)?;
        let from = parse_period(year, month)?;
        Ok(self.store.get_snapshots(subject, from).await?)
    }
}
