use crate::{
    domain::{AuthBackend, AuthSubscription, Backend, Connectivity, Filter, Query, Row, SortDirection, Table},
    errors::BackendError,
    http_client::{classify, probe_backend},
    models::{AuthEvent, AuthEventKind, Session, User},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{self, info};
use uuid::Uuid;

const REFRESH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Hosted backend reached over HTTP: PostgREST-style tables under `/rest/v1`
/// and GoTrue-style auth under `/auth/v1`.
#[derive(Debug)]
pub struct RestBackend {
    client: Client,
    base_url: Url,
    anon_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestBackend {
    pub fn new(client: Client, base_url: Url, anon_key: String) -> Self {
        info!(%base_url, "Initializing RestBackend");
        let (events, _) = broadcast::channel(16);
        Self {
            client,
            base_url,
            anon_key,
            session: RwLock::new(None),
            events,
        }
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&format!("{}/{}", self.base_url.path().trim_end_matches('/'), path));
        url
    }

    fn table_url(&self, table: Table, filters: &[Filter]) -> Url {
        let mut url = self.endpoint(&format!("rest/v1/{}", table));
        if !filters.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for filter in filters {
                pairs.append_pair(&filter.column, &format!("eq.{}", filter.value_text()));
            }
        }
        url
    }

    fn select_url(&self, query: &Query) -> Url {
        let mut url = self.endpoint(&format!("rest/v1/{}", query.table));
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", &query.columns.replace(' ', ""));
            for filter in &query.filters {
                pairs.append_pair(&filter.column, &format!("eq.{}", filter.value_text()));
            }
            if let Some(order) = &query.order {
                let direction = match order.direction {
                    SortDirection::Ascending => "asc",
                    SortDirection::Descending => "desc",
                };
                pairs.append_pair("order", &format!("{}.{}", order.column, direction));
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        url
    }

    // Bearer is the session's access token once signed in, the anon key otherwise.
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .session
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        builder.header("apikey", &self.anon_key).bearer_auth(bearer)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, BackendError> {
        let resp = self.authorized(builder).send().await.map_err(classify)?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(rejection(resp).await)
        }
    }

    fn set_session(&self, kind: AuthEventKind, session: Option<Session>) {
        *self.session.write() = session.clone();
        tracing::debug!(?kind, "RestBackend: auth state changed");
        let _ = self.events.send(AuthEvent { kind, session });
    }

    /// Exchanges the refresh token for a new access token.
    pub async fn refresh_session(&self) -> Result<(), BackendError> {
        let refresh_token = self
            .session
            .read()
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
            .ok_or_else(|| BackendError::rejected("No refresh token available", "refresh_token_not_found"))?;

        let mut url = self.endpoint("auth/v1/token");
        url.query_pairs_mut().append_pair("grant_type", "refresh_token");
        let result = self
            .send(self.client.post(url).json(&json!({ "refresh_token": refresh_token })))
            .await;

        match result {
            Ok(resp) => {
                let token: TokenResponse = resp.json().await.map_err(classify)?;
                self.set_session(AuthEventKind::TokenRefreshed, Some(token.into_session()));
                Ok(())
            }
            Err(e @ BackendError::Rejected { .. }) => {
                tracing::warn!(error = %e, "Refresh token rejected, signing out locally");
                self.set_session(AuthEventKind::SignedOut, None);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.session
            .read()
            .as_ref()
            .filter(|s| s.refresh_token.is_some())
            .and_then(|s| s.expires_at)
            .is_some_and(|expires_at| expires_at - now <= ChronoDuration::seconds(60))
    }

    /// Keeps the session alive by refreshing the access token shortly before it expires.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let backend = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                if backend.needs_refresh(Utc::now()) {
                    if let Err(e) = backend.refresh_session().await {
                        tracing::warn!(error = %e, "Session refresh failed");
                    }
                }
            }
        })
    }
}

#[derive(Deserialize, Debug, Default)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
    code: Option<Value>,
    error_code: Option<String>,
}

fn parse_error_body(status: u16, body: &str) -> BackendError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.error_code.or_else(|| match parsed.code {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    });
    let message = parsed
        .message
        .or(parsed.msg)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or_else(|| format!("HTTP {}", status));
    BackendError::Rejected { message, code }
}

async fn rejection(resp: Response) -> BackendError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let err = parse_error_body(status, &body);
    tracing::debug!(status, error = %err, "Backend rejected request");
    err
}

#[derive(Deserialize, Debug)]
struct AuthUser {
    id: Uuid,
    email: Option<String>,
    #[serde(default)]
    user_metadata: Value,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .and_then(ChronoDuration::try_seconds)
                    .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            });
        let username = self
            .user
            .user_metadata
            .get("username")
            .and_then(Value::as_str)
            .map(str::to_string);
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: User {
                id: self.user.id,
                email: self.user.email,
                username,
            },
        }
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, BackendError> {
        let url = self.select_url(query);
        tracing::debug!(table = %query.table, %url, "REST: select");
        let resp = self.send(self.client.get(url)).await?;
        let rows: Vec<Row> = resp.json().await.map_err(classify)?;
        tracing::debug!(table = %query.table, rows = rows.len(), "REST: select returned");
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, BackendError> {
        tracing::debug!(%table, "REST: insert");
        let resp = self
            .send(
                self.client
                    .post(self.table_url(table, &[]))
                    .header("Prefer", "return=representation")
                    .json(&row),
            )
            .await?;
        let mut created: Vec<Row> = resp.json().await.map_err(classify)?;
        created
            .pop()
            .ok_or_else(|| BackendError::Decode(format!("insert into {} returned no row", table)))
    }

    async fn update(&self, table: Table, filters: &[Filter], patch: Row) -> Result<(), BackendError> {
        tracing::debug!(%table, filters = filters.len(), "REST: update");
        self.send(
            self.client
                .patch(self.table_url(table, filters))
                .header("Prefer", "return=minimal")
                .json(&patch),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<(), BackendError> {
        tracing::debug!(%table, filters = filters.len(), "REST: delete");
        self.send(self.client.delete(self.table_url(table, filters))).await?;
        Ok(())
    }

    async fn probe(&self) -> Connectivity {
        probe_backend(&self.client, self.endpoint("rest/v1/"), &self.anon_key).await
    }
}

#[async_trait]
impl AuthBackend for RestBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        Ok(self.session.read().clone())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<Option<Session>, BackendError> {
        let body = json!({
            "email": email,
            "password": password,
            "data": { "username": username, "full_name": username },
        });
        let resp = self.send(self.client.post(self.endpoint("auth/v1/signup")).json(&body)).await?;
        let value: Value = resp.json().await.map_err(classify)?;

        if value.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(value)?;
            let session = token.into_session();
            self.set_session(AuthEventKind::SignedIn, Some(session.clone()));
            Ok(Some(session))
        } else {
            info!(%email, "Sign-up accepted, awaiting email confirmation");
            Ok(None)
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let mut url = self.endpoint("auth/v1/token");
        url.query_pairs_mut().append_pair("grant_type", "password");
        let resp = self
            .send(self.client.post(url).json(&json!({ "email": email, "password": password })))
            .await?;
        let token: TokenResponse = resp.json().await.map_err(classify)?;
        let session = token.into_session();
        self.set_session(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        match self.send(self.client.post(self.endpoint("auth/v1/logout"))).await {
            Err(e @ BackendError::Transport(_)) => Err(e),
            result => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Logout rejected remotely, clearing local session anyway");
                }
                self.set_session(AuthEventKind::SignedOut, None);
                Ok(())
            }
        }
    }
}
