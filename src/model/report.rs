use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A narrative report delivered to a user. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    /// Unix nanoseconds.
    pub created_at: i64,
    pub title: String,
    pub content: String,
    pub unread: bool,
}

impl Report {
    /// A new unread report with a fresh id.
    pub fn new(created_at: i64, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at,
            title: title.into(),
            content: content.into(),
            unread: true,
        }
    }
}
