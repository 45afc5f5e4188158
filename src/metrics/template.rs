//! Query templating.

use serde::{Deserialize, Serialize};

use crate::model::Window;

pub const USER_ID: &str = "$user_id";
pub const RANGE: &str = "$__range";
pub const INSTANCE_ID: &str = "$instance_id";

/// Values substituted into a [`QueryTemplate`]. Missing values render as empty strings.
#[derive(Debug, Clone, Default)]
pub struct QueryParams<'a> {
    pub user_id: Option<&'a str>,
    pub range: String,
    pub instance_id: Option<&'a str>,
}

impl<'a> QueryParams<'a> {
    pub fn for_window(window: &Window) -> Self {
        Self {
            range: window.range_string(),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn instance(mut self, instance_id: &'a str) -> Self {
        self.instance_id = Some(instance_id);
        self
    }
}

/// A metrics query with `$user_id`, `$__range` and `$instance_id` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryTemplate(String);

impl QueryTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn render(&self, params: &QueryParams<'_>) -> String {
        self.0
            .replace(INSTANCE_ID, params.instance_id.unwrap_or_default())
            .replace(USER_ID, params.user_id.unwrap_or_default())
            .replace(RANGE, &params.range)
    }
}

impl From<&str> for QueryTemplate {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for QueryTemplate {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_all_placeholders() {
        let template = QueryTemplate::new(
            r#"sum(increase(runs{user="$user_id",instance="$instance_id"}[$__range])) by (process_definition)"#,
        );
        let window = Window::month(2024, 2).unwrap();
        let query = template.render(&QueryParams::for_window(&window).user("u1").instance("pe-0"));

        assert_eq!(
            query,
            r#"sum(increase(runs{user="u1",instance="pe-0"}[696h0m0s])) by (process_definition)"#
        );
    }

    #[test]
    fn test_render_repeated_and_missing() {
        let template = QueryTemplate::new("a{u=\"$user_id\"} / b{u=\"$user_id\"}");
        let params = QueryParams {
            range: "1h0m0s".into(),
            ..Default::default()
        };
        assert_eq!(template.render(&params), "a{u=\"\"} / b{u=\"\"}");
        assert_eq!(
            template.render(&params.clone().user("x")),
            "a{u=\"x\"} / b{u=\"x\"}"
        );
    }

    #[test]
    fn test_serde_transparent() {
        let template: QueryTemplate = serde_json::from_str("\"vector(1)\"").unwrap();
        assert_eq!(template.as_str(), "vector(1)");
        assert!(QueryTemplate::new("  ").is_empty());
    }
}
