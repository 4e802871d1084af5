//! Record store backed by the hosted row API (`/rest/v1/{table}`).
//!
//! Requests authenticate as the user the session mirror currently holds, or
//! with the anon key when nobody is signed in, so row-level policies apply.

use super::http_client;
use crate::error::RecordError;
use crate::records::{require_filters, Filter, Query, RecordStore, Table};
use crate::session::MirrorSnapshot;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

/// Error body returned by the row API
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HostedRecords {
    client: reqwest::Client,
    base_url: String,
    anon_key: SecretString,
    session: watch::Receiver<MirrorSnapshot>,
}

/// Render a filter value the way the row API expects it after `eq.`.
fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (f.column.clone(), format!("eq.{}", literal(&f.value))))
        .collect()
}

fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = Vec::new();
    params.push(("select".to_string(), query.select_list()));
    params.extend(filter_params(&query.filters));
    if let Some(order) = &query.order {
        let dir = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, dir)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

impl HostedRecords {
    pub fn new(
        base_url: &str,
        anon_key: SecretString,
        session: watch::Receiver<MirrorSnapshot>,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            session,
        })
    }

    fn bearer(&self) -> String {
        let snapshot = self.session.borrow();
        match &snapshot.session {
            Some(session) => session.access_token.expose_secret().to_string(),
            None => self.anon_key.expose_secret().to_string(),
        }
    }

    fn request(&self, method: Method, table: Table) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table.name()))
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(self.bearer())
    }

    async fn rows(resp: reqwest::Response) -> Result<Vec<Value>, RecordError> {
        let status = resp.status();
        if status.is_success() {
            let text = resp.text().await?;
            if text.trim().is_empty() {
                return Ok(Vec::new());
            }
            return Ok(serde_json::from_str(&text)?);
        }

        let status = status.as_u16();
        let body: ApiError = resp.json().await.unwrap_or_default();
        let message = body.message.unwrap_or_else(|| format!("HTTP {}", status));
        Err(RecordError::from_status(status, body.code, message))
    }
}

#[async_trait::async_trait]
impl RecordStore for HostedRecords {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, RecordError> {
        let resp = self
            .request(Method::GET, table)
            .query(&query_params(query))
            .send()
            .await?;
        Self::rows(resp).await
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, RecordError> {
        let resp = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let stored = Self::rows(resp).await?;
        tracing::debug!(table = %table, "row inserted");
        stored.into_iter().next().ok_or(RecordError::NotFound)
    }

    async fn update(&self, table: Table, filters: &[Filter], patch: Value) -> Result<usize, RecordError> {
        require_filters(filters)?;
        let resp = self
            .request(Method::PATCH, table)
            .header("Prefer", "return=representation")
            .query(&filter_params(filters))
            .json(&patch)
            .send()
            .await?;
        Ok(Self::rows(resp).await?.len())
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<usize, RecordError> {
        require_filters(filters)?;
        let resp = self
            .request(Method::DELETE, table)
            .header("Prefer", "return=representation")
            .query(&filter_params(filters))
            .send()
            .await?;
        Ok(Self::rows(resp).await?.len())
    }
}
