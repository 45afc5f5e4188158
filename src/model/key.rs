//! Composite allocation keys.

use thiserror::Error;

/// Separator between key segments.
pub const KEY_DELIMITER: char = '/';

/// Aggregation granularity of an allocation query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    /// `user/namespace`
    Namespace,
    /// `user/namespace/controller`
    Controller,
    /// `user/namespace/controller/container`
    Container,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Self::Namespace, Self::Controller, Self::Container];

    pub fn segments(&self) -> usize {
        match self {
            Self::Namespace => 2,
            Self::Controller => 3,
            Self::Container => 4,
        }
    }

    /// Aggregation label understood by the allocation source.
    pub fn aggregate(&self) -> &'static str {
        match self {
            Self::Namespace => "label:user,namespace",
            Self::Controller => "label:user,namespace,controller",
            Self::Container => "label:user,namespace,controller,container",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Controller => "controller",
            Self::Container => "container",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key whose segment count does not match its granularity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unexpected {granularity} key '{key}': expected {expected} segments, found {found}")]
pub struct KeyError {
    pub key: String,
    pub granularity: Granularity,
    pub expected: usize,
    pub found: usize,
}

/// A decomposed allocation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey<'a> {
    pub user_id: &'a str,
    pub namespace: &'a str,
    pub controller: Option<&'a str>,
    pub container: Option<&'a str>,
}

impl<'a> CompositeKey<'a> {
    pub fn parse(raw: &'a str, granularity: Granularity) -> Result<Self, KeyError> {
        let parts: Vec<&'a str> = raw.split(KEY_DELIMITER).collect();
        if parts.len() != granularity.segments() {
            return Err(KeyError {
                key: raw.to_string(),
                granularity,
                expected: granularity.segments(),
                found: parts.len(),
            });
        }

        Ok(Self {
            user_id: parts[0],
            namespace: parts[1],
            controller: parts.get(2).copied(),
            container: parts.get(3).copied(),
        })
    }

    pub fn granularity(&self) -> Granularity {
        match (self.controller, self.container) {
            (None, _) => Granularity::Namespace,
            (Some(_), None) => Granularity::Controller,
            (Some(_), Some(_)) => Granularity::Container,
        }
    }

    pub fn in_namespace(&self, user_id: &str, namespace: &str) -> bool {
        self.user_id == user_id && self.namespace == namespace
    }

    pub fn in_controller(&self, user_id: &str, namespace: &str, controller: &str) -> bool {
        self.in_namespace(user_id, namespace) && self.controller == Some(controller)
    }
}
