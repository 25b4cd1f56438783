use crate::{
    config::{BackendConfig, Config},
    domain::{AuthBackend, Backend, Connectivity},
    feed::FeedStore,
    http_client::create_http_client,
    memory::MemoryBackend,
    notices::Notices,
    rest::RestBackend,
    session::SessionStore,
};
use anyhow::Context;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Shared resources behind the gateway: one backend, one process-wide session, one feed.
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub session: Arc<SessionStore>,
    pub feed: FeedStore,
    pub notices: Notices,
}

impl AppState {
    /// Wires the stores over the given backend and starts the session store.
    pub async fn start(backend: Arc<dyn Backend>, auth: Arc<dyn AuthBackend>) -> Arc<Self> {
        let notices = Notices::new();
        let session = Arc::new(SessionStore::new(auth));
        session.init().await;
        let feed = FeedStore::new(Arc::clone(&backend), session.context(), notices.clone());
        Arc::new(Self {
            backend,
            session,
            feed,
            notices,
        })
    }

    pub fn shutdown(&self) {
        self.feed.close();
        self.session.teardown();
    }
}

pub struct Services {
    pub state: Arc<AppState>,
    /// Session refresh task, present for hosted backends.
    pub refresher: Option<JoinHandle<()>>,
}

/// Builds the backend named by the configuration and the stores on top of it.
pub async fn build_services(config: &Config) -> anyhow::Result<Services> {
    let (backend, auth, refresher) = match &config.backend {
        BackendConfig::Rest { url, anon_key } => {
            tracing::info!(%url, "Startup: using hosted backend");
            let client = create_http_client().context("Startup: failed to create HTTP client")?;
            let rest = Arc::new(RestBackend::new(client, url.clone(), anon_key.clone()));
            let refresher = rest.spawn_auto_refresh();
            (rest.clone() as Arc<dyn Backend>, rest as Arc<dyn AuthBackend>, Some(refresher))
        }
        BackendConfig::Memory => {
            tracing::warn!("Startup: using in-memory backend, data will not survive a restart");
            let memory = Arc::new(MemoryBackend::new());
            (memory.clone() as Arc<dyn Backend>, memory as Arc<dyn AuthBackend>, None)
        }
    };

    match backend.probe().await {
        Connectivity::Connected => tracing::info!("Startup: backend reachable"),
        Connectivity::Rejected { http_status } => {
            tracing::warn!(http_status, "Startup: backend answered the probe with an error status")
        }
        Connectivity::Unreachable { likely_blocked } => {
            tracing::warn!(likely_blocked, "Startup: backend unreachable, serving degraded feed")
        }
    }

    let state = AppState::start(backend, auth).await;
    Ok(Services { state, refresher })
}
