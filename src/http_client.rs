use crate::domain::Connectivity;
use crate::errors::BackendError;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

const PROBE_MAX_ELAPSED: Duration = Duration::from_secs(5);

// Creates the shared HTTP client used for every backend call.
// No request timeout is set here; the transport's own limits apply.
pub fn create_http_client() -> Result<Client, BackendError> {
    Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| BackendError::Transport(format!("Failed to build HTTP client: {}", e)))
}

/// Maps a reqwest failure onto the backend error taxonomy.
pub fn classify(err: reqwest::Error) -> BackendError {
    if err.is_decode() {
        BackendError::Decode(err.to_string())
    } else {
        BackendError::Transport(err.to_string())
    }
}

/// Checks that the table endpoint answers, retrying transport failures with
/// exponential backoff for a few seconds.
pub async fn probe_backend(client: &Client, url: Url, anon_key: &str) -> Connectivity {
    tracing::debug!(%url, "Probing backend connectivity");

    let policy = ExponentialBackoff {
        max_elapsed_time: Some(PROBE_MAX_ELAPSED),
        ..ExponentialBackoff::default()
    };

    let attempt = || {
        let client = client.clone();
        let url = url.clone();
        let anon_key = anon_key.to_string();
        async move {
            client
                .head(url)
                .header("apikey", anon_key)
                .send()
                .await
                .map(|resp| resp.status())
                .map_err(|e| {
                    tracing::debug!(error = %e, "Connectivity probe attempt failed");
                    backoff::Error::transient(e)
                })
        }
    };

    match backoff::future::retry(policy, attempt).await {
        Ok(status) => connectivity_from_status(status),
        Err(e) => {
            let likely_blocked = e.is_connect() || e.is_request();
            tracing::warn!(error = %e, likely_blocked, "Backend unreachable");
            Connectivity::Unreachable { likely_blocked }
        }
    }
}

fn connectivity_from_status(status: StatusCode) -> Connectivity {
    if status.is_success() {
        Connectivity::Connected
    } else {
        Connectivity::Rejected {
            http_status: status.as_u16(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses_count_as_connected() {
        assert_eq!(connectivity_from_status(StatusCode::OK), Connectivity::Connected);
        assert_eq!(
            connectivity_from_status(StatusCode::UNAUTHORIZED),
            Connectivity::Rejected { http_status: 401 }
        );
    }

    #[tokio::test]
    async fn unreachable_host_reports_unreachable() {
        let client = create_http_client().unwrap();
        // Port 9 on localhost is the discard port; nothing listens there in CI.
        let url = Url::parse("http://127.0.0.1:9/rest/v1/").unwrap();
        let result = probe_backend(&client, url, "anon").await;
        assert!(matches!(result, Connectivity::Unreachable { .. }));
    }
}
