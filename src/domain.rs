use crate::errors::BackendError;
use crate::models::{AuthEvent, Session};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::broadcast;

/// A row as the backend exchanges it: a JSON object keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Memes,
    Votes,
    Comments,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Memes => "memes",
            Table::Votes => "votes",
            Table::Comments => "comments",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality predicate on a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Renders the value the way it travels in a query string.
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

/// A table read: projection, equality filters, ordering and row limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order(mut self, column: &str, direction: SortDirection) -> Self {
        self.order = Some(OrderBy {
            column: column.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Column names requested, or `None` when every column is.
    pub fn projection(&self) -> Option<Vec<&str>> {
        if self.columns.trim() == "*" {
            return None;
        }
        Some(
            self.columns
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect(),
        )
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Connectivity {
    Connected,
    /// The backend answered but refused the probe.
    Rejected { http_status: u16 },
    Unreachable { likely_blocked: bool },
}

/// Table-style persistence offered by the hosted backend.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Reads rows matching the query, in the requested order.
    async fn select(&self, query: &Query) -> Result<Vec<Row>, BackendError>;

    /// Inserts one row and returns it as created (with server-assigned columns).
    async fn insert(&self, table: Table, row: Row) -> Result<Row, BackendError>;

    /// Applies `patch` to every row matching all `filters`.
    async fn update(&self, table: Table, filters: &[Filter], patch: Row) -> Result<(), BackendError>;

    /// Deletes every row matching all `filters`. Matching zero rows is not an error.
    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<(), BackendError>;

    /// Checks whether the backend is reachable.
    async fn probe(&self) -> Connectivity {
        Connectivity::Connected
    }
}

/// Handle on the auth-event stream. Dropping it ends the subscription.
#[derive(Debug)]
pub struct AuthSubscription {
    receiver: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    pub fn new(receiver: broadcast::Receiver<AuthEvent>) -> Self {
        Self { receiver }
    }

    /// Waits for the next event; `None` once the backend has gone away.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Auth subscription lagged, skipping stale events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

}

/// The backend's authentication subsystem.
#[async_trait]
pub trait AuthBackend: Send + Sync + 'static {
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Subscribes to sign-in, sign-out and token-refresh events.
    fn on_auth_state_change(&self) -> AuthSubscription;

    /// Registers an account. Returns a session when the backend signs the user in immediately.
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<Option<Session>, BackendError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_builder_collects_filters_and_projection() {
        let query = Query::table(Table::Votes)
            .columns("meme_id, vote_type")
            .eq("user_id", "u1")
            .eq("meme_id", "m1")
            .order("created_at", SortDirection::Descending)
            .limit(1);

        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.projection(), Some(vec!["meme_id", "vote_type"]));
        assert_eq!(query.limit, Some(1));
        assert_eq!(Query::table(Table::Memes).projection(), None);
    }

    #[test]
    fn filter_matches_exact_values_only() {
        let row: Row = json!({ "user_id": "u1", "n": 3 }).as_object().cloned().unwrap();
        assert!(Filter::eq("user_id", "u1").matches(&row));
        assert!(!Filter::eq("user_id", "u2").matches(&row));
        assert!(!Filter::eq("missing", "u1").matches(&row));
        assert_eq!(Filter::eq("n", 3).value_text(), "3");
    }

    #[test]
    fn connectivity_serializes_with_a_status_tag() {
        assert_eq!(serde_json::to_value(Connectivity::Connected).unwrap(), json!({ "status": "connected" }));
        assert_eq!(
            serde_json::to_value(Connectivity::Rejected { http_status: 401 }).unwrap(),
            json!({ "status": "rejected", "http_status": 401 })
        );
        assert_eq!(
            serde_json::to_value(Connectivity::Unreachable { likely_blocked: true }).unwrap(),
            json!({ "status": "unreachable", "likely_blocked": true })
        );
    }
}
