//! HTTP clients for the hosted backend: the auth API and the row API.

pub mod auth;
pub mod rest;

pub use auth::HostedAuth;
pub use rest::HostedRecords;

use crate::config::Config;
use crate::records::RecordStore;
use crate::session::SessionMirror;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a front end needs: the session mirror and a record store that
/// authenticates as whoever the mirror says is signed in.
pub struct Backend {
    pub mirror: Arc<SessionMirror>,
    pub records: Arc<dyn RecordStore>,
}

/// Build the hosted clients from configuration and start the session mirror.
/// Must be called inside a tokio runtime.
pub fn connect(config: &Config) -> Result<Backend> {
    let url = config.backend.require_url()?;
    let anon_key = config
        .backend
        .resolve_anon_key()
        .ok_or_else(|| anyhow!("backend.anon_key is not configured (set it in config.toml or HUB_ANON_KEY)"))?;

    let mut auth = HostedAuth::new(url, anon_key.clone())?;
    if config.session.persist {
        auth = auth.with_session_file(config.session.resolve_file());
    }
    let mirror = SessionMirror::start(Arc::new(auth), config.admin.clone());
    let records: Arc<dyn RecordStore> =
        Arc::new(HostedRecords::new(url, anon_key, mirror.watch())?);

    tracing::info!(url, "backend connected");
    Ok(Backend { mirror, records })
}

pub(crate) fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()
}

/// Best-effort human message from a backend error body.
pub(crate) fn error_message(body: &Value, status: u16) -> String {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status))
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::Router;

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
