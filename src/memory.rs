use crate::{
    domain::{AuthBackend, AuthSubscription, Backend, Filter, Query, Row, SortDirection, Table},
    errors::BackendError,
    models::{AuthEvent, AuthEventKind, Session, User},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::{cmp::Ordering, collections::HashMap, time::Duration as StdDuration};
use tokio::sync::broadcast;
use uuid::Uuid;

const OFFLINE_MESSAGE: &str = "Failed to fetch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

/// One table call as the backend received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: Operation,
    pub table: Table,
    pub filters: Vec<Filter>,
}

impl Call {
    pub fn is_write(&self) -> bool {
        self.operation != Operation::Select
    }
}

#[derive(Debug, Clone)]
struct Account {
    email: String,
    password: String,
    user: User,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<Table, Vec<Row>>,
    accounts: Vec<Account>,
    session: Option<Session>,
    calls: Vec<Call>,
    failing_reads: HashMap<Table, String>,
    failing_writes: HashMap<Table, String>,
    read_delay: Option<StdDuration>,
    offline: bool,
    last_timestamp: Option<DateTime<Utc>>,
}

/// In-process backend with the same contract and server-side rules as the hosted one:
/// unique votes per (user, meme), row-level ownership on writes, and vote/comment
/// counters maintained by the backend itself.
#[derive(Debug)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    events: broadcast::Sender<AuthEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    /// Writes a row directly, bypassing ownership checks and the call log.
    pub fn seed<T: Serialize>(&self, table: Table, row: &T) -> Result<(), BackendError> {
        let row = match serde_json::to_value(row)? {
            Value::Object(row) => row,
            other => return Err(BackendError::Decode(format!("seed row for {} is not an object: {}", table, other))),
        };
        let mut inner = self.inner.lock();
        inner.tables.entry(table).or_default().push(row);
        if table == Table::Votes || table == Table::Comments {
            inner.recount_all();
        }
        Ok(())
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.inner.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn write_calls(&self) -> Vec<Call> {
        self.inner.lock().calls.iter().filter(|c| c.is_write()).cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Makes every read of `table` fail with a backend rejection.
    pub fn fail_reads(&self, table: Table, message: &str) {
        self.inner.lock().failing_reads.insert(table, message.to_string());
    }

    /// Makes every insert, update and delete on `table` fail with a backend rejection.
    pub fn fail_writes(&self, table: Table, message: &str) {
        self.inner.lock().failing_writes.insert(table, message.to_string());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.failing_reads.clear();
        inner.failing_writes.clear();
    }

    /// Holds every select for `delay` after it is logged, so it is still in flight meanwhile.
    pub fn set_read_delay(&self, delay: Option<StdDuration>) {
        self.inner.lock().read_delay = delay;
    }

    /// While offline every call fails at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        tracing::debug!(?kind, "Memory backend: emitting auth event");
        let _ = self.events.send(AuthEvent { kind, session });
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn record(&mut self, operation: Operation, table: Table, filters: &[Filter]) {
        self.calls.push(Call {
            operation,
            table,
            filters: filters.to_vec(),
        });
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.offline {
            return Err(BackendError::Transport(OFFLINE_MESSAGE.to_string()));
        }
        Ok(())
    }

    fn check_writable(&self, table: Table) -> Result<(), BackendError> {
        self.check_online()?;
        match self.failing_writes.get(&table) {
            Some(message) => Err(BackendError::rejected(message.clone(), "PGRST000")),
            None => Ok(()),
        }
    }

    fn session_user_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.user.id.to_string())
    }

    // Creation timestamps are strictly increasing at microsecond precision.
    fn next_timestamp(&mut self) -> String {
        let now = Utc::now().trunc_subsecs(6);
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn table_mut(&mut self, table: Table) -> &mut Vec<Row> {
        self.tables.entry(table).or_default()
    }

    fn owned_by_session(&self, table: Table, row: &Row) -> bool {
        match self.session_user_id() {
            Some(uid) => row.get(owner_column(table)) == Some(&Value::String(uid)),
            None => false,
        }
    }

    fn recount(&mut self, meme_id: &Value) {
        let (mut up, mut down) = (0i64, 0i64);
        for vote in self.tables.get(&Table::Votes).into_iter().flatten() {
            if vote.get("meme_id") != Some(meme_id) {
                continue;
            }
            match vote.get("vote_type").and_then(Value::as_str) {
                Some("up") => up += 1,
                Some("down") => down += 1,
                _ => {}
            }
        }
        let comments = self
            .tables
            .get(&Table::Comments)
            .into_iter()
            .flatten()
            .filter(|c| c.get("meme_id") == Some(meme_id))
            .count() as i64;

        if let Some(meme) = self
            .table_mut(Table::Memes)
            .iter_mut()
            .find(|m| m.get("id") == Some(meme_id))
        {
            meme.insert("upvotes".into(), up.into());
            meme.insert("downvotes".into(), down.into());
            meme.insert("comments_count".into(), comments.into());
        }
    }

    fn recount_all(&mut self) {
        let ids: Vec<Value> = self
            .tables
            .get(&Table::Memes)
            .into_iter()
            .flatten()
            .filter_map(|m| m.get("id").cloned())
            .collect();
        for id in ids {
            self.recount(&id);
        }
    }
}

fn owner_column(table: Table) -> &'static str {
    match table {
        Table::Profiles => "id",
        Table::Memes | Table::Votes | Table::Comments => "user_id",
    }
}

fn matches_all(filters: &[Filter], row: &Row) -> bool {
    filters.iter().all(|f| f.matches(row))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (None | Some(Value::Null), Some(v)) if !v.is_null() => Ordering::Less,
        (Some(v), None | Some(Value::Null)) if !v.is_null() => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn validate_vote_type(row: &Row) -> Result<(), BackendError> {
    match row.get("vote_type").and_then(Value::as_str) {
        Some("up") | Some("down") => Ok(()),
        other => Err(BackendError::rejected(
            format!("invalid input value for enum vote_type: {:?}", other),
            "22P02",
        )),
    }
}

fn rls_violation(table: Table) -> BackendError {
    BackendError::rejected(
        format!("new row violates row-level security policy for table \"{}\"", table),
        "42501",
    )
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, BackendError> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.record(Operation::Select, query.table, &query.filters);
            inner.read_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.inner.lock();
        inner.check_online()?;
        if let Some(message) = inner.failing_reads.get(&query.table) {
            return Err(BackendError::rejected(message.clone(), "PGRST000"));
        }

        let mut rows: Vec<Row> = inner
            .tables
            .get(&query.table)
            .into_iter()
            .flatten()
            .filter(|row| matches_all(&query.filters, row))
            .cloned()
            .collect();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                match order.direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        if let Some(columns) = query.projection() {
            rows = rows
                .into_iter()
                .map(|row| {
                    columns
                        .iter()
                        .filter_map(|c| row.get(*c).map(|v| (c.to_string(), v.clone())))
                        .collect()
                })
                .collect();
        }

        tracing::debug!(table = %query.table, rows = rows.len(), "Memory backend: select");
        Ok(rows)
    }

    async fn insert(&self, table: Table, mut row: Row) -> Result<Row, BackendError> {
        let mut inner = self.inner.lock();
        inner.record(Operation::Insert, table, &[]);
        inner.check_writable(table)?;

        if !inner.owned_by_session(table, &row) {
            return Err(rls_violation(table));
        }

        let now = inner.next_timestamp();
        row.entry("id").or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        row.entry("created_at").or_insert_with(|| Value::String(now.clone()));
        match table {
            Table::Memes => {
                row.entry("updated_at").or_insert_with(|| Value::String(now.clone()));
                row.entry("upvotes").or_insert(0.into());
                row.entry("downvotes").or_insert(0.into());
                row.entry("comments_count").or_insert(0.into());
                row.entry("tags").or_insert_with(|| Value::Array(Vec::new()));
            }
            Table::Comments | Table::Profiles => {
                row.entry("updated_at").or_insert_with(|| Value::String(now.clone()));
            }
            Table::Votes => {
                validate_vote_type(&row)?;
                let duplicate = inner.tables.get(&Table::Votes).into_iter().flatten().any(|v| {
                    v.get("user_id") == row.get("user_id") && v.get("meme_id") == row.get("meme_id")
                });
                if duplicate {
                    return Err(BackendError::rejected(
                        "duplicate key value violates unique constraint \"votes_user_id_meme_id_key\"",
                        "23505",
                    ));
                }
            }
        }

        inner.table_mut(table).push(row.clone());
        if let (Table::Votes | Table::Comments, Some(meme_id)) = (table, row.get("meme_id").cloned()) {
            inner.recount(&meme_id);
        }

        tracing::debug!(%table, "Memory backend: inserted row");
        Ok(row)
    }

    async fn update(&self, table: Table, filters: &[Filter], patch: Row) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        inner.record(Operation::Update, table, filters);
        inner.check_writable(table)?;
        if table == Table::Votes && patch.contains_key("vote_type") {
            validate_vote_type(&patch)?;
        }

        let now = inner.next_timestamp();
        let uid = inner.session_user_id();
        let owner = owner_column(table);
        let mut touched = Vec::new();
        for row in inner.table_mut(table).iter_mut() {
            let owned = uid.as_ref().is_some_and(|u| row.get(owner) == Some(&Value::String(u.clone())));
            if !owned || !matches_all(filters, row) {
                continue;
            }
            for (k, v) in &patch {
                row.insert(k.clone(), v.clone());
            }
            if row.contains_key("updated_at") {
                row.insert("updated_at".into(), Value::String(now.clone()));
            }
            if let Some(meme_id) = row.get("meme_id") {
                touched.push(meme_id.clone());
            }
        }
        for meme_id in touched {
            inner.recount(&meme_id);
        }
        Ok(())
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        inner.record(Operation::Delete, table, filters);
        inner.check_writable(table)?;

        let uid = inner.session_user_id();
        let owner = owner_column(table);
        let mut touched = Vec::new();
        inner.table_mut(table).retain(|row| {
            let owned = uid.as_ref().is_some_and(|u| row.get(owner) == Some(&Value::String(u.clone())));
            let remove = owned && matches_all(filters, row);
            if remove {
                if let Some(meme_id) = row.get("meme_id") {
                    touched.push(meme_id.clone());
                }
            }
            !remove
        });
        tracing::debug!(%table, removed = touched.len(), "Memory backend: delete");
        for meme_id in touched {
            inner.recount(&meme_id);
        }
        Ok(())
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let inner = self.inner.lock();
        inner.check_online()?;
        Ok(inner.session.clone())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<Option<Session>, BackendError> {
        let session = {
            let mut inner = self.inner.lock();
            inner.check_online()?;

            if !email.contains('@') {
                return Err(BackendError::rejected(
                    "Unable to validate email address: invalid format",
                    "validation_failed",
                ));
            }
            if password.len() < 6 {
                return Err(BackendError::rejected(
                    "Password should be at least 6 characters",
                    "weak_password",
                ));
            }
            if inner.accounts.iter().any(|a| a.email.eq_ignore_ascii_case(email)) {
                return Err(BackendError::rejected("User already registered", "user_already_exists"));
            }

            let user = User {
                id: Uuid::new_v4(),
                email: Some(email.to_string()),
                username: Some(username.to_string()),
            };
            inner.accounts.push(Account {
                email: email.to_string(),
                password: password.to_string(),
                user: user.clone(),
            });

            // Profile row the hosted backend creates on sign-up.
            let now = inner.next_timestamp();
            let mut profile = Row::new();
            profile.insert("id".into(), Value::String(user.id.to_string()));
            profile.insert("username".into(), Value::String(username.to_string()));
            profile.insert("full_name".into(), Value::String(username.to_string()));
            profile.insert("avatar_url".into(), Value::Null);
            profile.insert("created_at".into(), Value::String(now.clone()));
            profile.insert("updated_at".into(), Value::String(now));
            inner.table_mut(Table::Profiles).push(profile);

            let session = new_session(user);
            inner.session = Some(session.clone());
            session
        };

        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let session = {
            let mut inner = self.inner.lock();
            inner.check_online()?;
            let user = inner
                .accounts
                .iter()
                .find(|a| a.email.eq_ignore_ascii_case(email) && a.password == password)
                .map(|a| a.user.clone())
                .ok_or_else(|| BackendError::rejected("Invalid login credentials", "invalid_credentials"))?;
            let session = new_session(user);
            inner.session = Some(session.clone());
            session
        };

        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        {
            let mut inner = self.inner.lock();
            inner.check_online()?;
            inner.session = None;
        }
        self.emit(AuthEventKind::SignedOut, None);
        Ok(())
    }
}

fn new_session(user: User) -> Session {
    Session {
        access_token: format!("memory-{}", Uuid::new_v4()),
        refresh_token: None,
        expires_at: None,
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn signed_in(backend: &MemoryBackend) -> Session {
        backend.sign_up("ann@example.com", "hunter22", "ann").await.unwrap().unwrap()
    }

    fn seed_meme(backend: &MemoryBackend, id: Uuid, owner: Uuid) {
        backend
            .seed(
                Table::Memes,
                &json!({
                    "id": id.to_string(), "title": "t", "image_url": "u", "user_id": owner.to_string(),
                    "upvotes": 0, "downvotes": 0, "comments_count": 0, "tags": [],
                    "created_at": "2026-10-01T00:00:00Z", "updated_at": "2026-10-01T00:00:00Z"
                }),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn votes_are_unique_per_user_and_meme() {
        let backend = MemoryBackend::new();
        let session = signed_in(&backend).await;
        let meme = Uuid::new_v4();
        seed_meme(&backend, meme, session.user.id);

        let vote = row(json!({ "user_id": session.user.id.to_string(), "meme_id": meme.to_string(), "vote_type": "up" }));
        backend.insert(Table::Votes, vote.clone()).await.unwrap();
        let err = backend.insert(Table::Votes, vote).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected { code: Some(ref c), .. } if c == "23505"));
        assert_eq!(backend.rows(Table::Memes)[0]["upvotes"], json!(1));
    }

    #[tokio::test]
    async fn inserts_for_another_user_are_rejected() {
        let backend = MemoryBackend::new();
        signed_in(&backend).await;
        let other = Uuid::new_v4();
        let err = backend
            .insert(Table::Comments, row(json!({ "user_id": other.to_string(), "meme_id": "m", "content": "hi" })))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected { code: Some(ref c), .. } if c == "42501"));
    }

    #[tokio::test]
    async fn deletes_only_touch_rows_owned_by_the_session() {
        let backend = MemoryBackend::new();
        let session = signed_in(&backend).await;
        let meme = Uuid::new_v4();
        let other = Uuid::new_v4();
        seed_meme(&backend, meme, other);
        backend
            .seed(Table::Comments, &json!({ "id": "c1", "user_id": other.to_string(), "meme_id": meme.to_string(), "content": "mine" }))
            .unwrap();

        backend.delete(Table::Comments, &[Filter::eq("id", "c1")]).await.unwrap();
        assert_eq!(backend.rows(Table::Comments).len(), 1);
        assert_eq!(backend.rows(Table::Memes)[0]["comments_count"], json!(1));

        backend
            .delete(Table::Comments, &[Filter::eq("id", "c1"), Filter::eq("user_id", session.user.id.to_string())])
            .await
            .unwrap();
        assert_eq!(backend.rows(Table::Comments).len(), 1);
    }

    #[tokio::test]
    async fn select_orders_filters_limits_and_projects() {
        let backend = MemoryBackend::new();
        for (id, ts) in [("a", "2026-10-01T00:00:00Z"), ("b", "2026-10-03T00:00:00Z"), ("c", "2026-10-02T00:00:00.5Z")] {
            backend.seed(Table::Profiles, &json!({ "id": id, "username": id, "created_at": ts })).unwrap();
        }
        let rows = backend
            .select(&Query::table(Table::Profiles).columns("id").order("created_at", SortDirection::Descending).limit(2))
            .await
            .unwrap();
        assert_eq!(rows, vec![row(json!({ "id": "b" })), row(json!({ "id": "c" }))]);
    }

    #[tokio::test]
    async fn failure_injection_and_offline_mode() {
        let backend = MemoryBackend::new();
        backend.fail_reads(Table::Profiles, "permission denied for table profiles");
        let err = backend.select(&Query::table(Table::Profiles)).await.unwrap_err();
        assert_eq!(err.to_string(), "permission denied for table profiles");

        backend.set_offline(true);
        assert!(backend.select(&Query::table(Table::Memes)).await.unwrap_err().is_transport());
        assert!(backend.sign_in_with_password("a@b.c", "x").await.unwrap_err().is_transport());
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn injected_write_failures_leave_tables_untouched() {
        let backend = MemoryBackend::new();
        let session = signed_in(&backend).await;
        let meme = Uuid::new_v4();
        seed_meme(&backend, meme, session.user.id);
        backend.fail_writes(Table::Votes, "permission denied for table votes");

        let vote = row(json!({ "user_id": session.user.id.to_string(), "meme_id": meme.to_string(), "vote_type": "up" }));
        let err = backend.insert(Table::Votes, vote.clone()).await.unwrap_err();
        assert_eq!(err, BackendError::rejected("permission denied for table votes", "PGRST000"));
        assert!(backend.rows(Table::Votes).is_empty());
        assert_eq!(backend.write_calls().len(), 1);
        assert!(backend.select(&Query::table(Table::Votes)).await.is_ok());

        backend.clear_failures();
        backend.insert(Table::Votes, vote).await.unwrap();
        assert_eq!(backend.rows(Table::Memes)[0]["upvotes"], json!(1));
    }

    #[tokio::test]
    async fn sign_in_checks_credentials_and_emits_events() {
        let backend = MemoryBackend::new();
        let mut events = backend.on_auth_state_change();
        backend.sign_up("bob@example.com", "secret1", "bob").await.unwrap();
        assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::SignedIn);
        assert_eq!(backend.rows(Table::Profiles)[0]["username"], json!("bob"));

        backend.sign_out().await.unwrap();
        assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::SignedOut);

        let err = backend.sign_in_with_password("bob@example.com", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid login credentials");
        let session = backend.sign_in_with_password("BOB@example.com", "secret1").await.unwrap();
        assert_eq!(session.user.username.as_deref(), Some("bob"));
    }
}
