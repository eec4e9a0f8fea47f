//! HTTP collaborator for the archive service: snapshot pages and structured
//! JSON records, with transient/permanent classification of failures.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::time::Duration;

use crate::zettel::config::RemoteSettings;
use crate::zettel::id::Identifier;
use crate::zettel::stage::StageError;

pub struct ArchiveClient {
    http: Client,
    api_base_url: String,
    snapshot_base_url: String,
}

fn classify_status(status: StatusCode) -> Option<StageError> {
    if status.is_success() {
        return None;
    }
    let reason = format!("http status {}", status.as_u16());
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Some(StageError::Permanent(reason)),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Some(StageError::Transient(reason))
        }
        s if s.is_client_error() => Some(StageError::Permanent(reason)),
        _ => Some(StageError::Transient(reason)),
    }
}

impl ArchiveClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("zettel-archiver/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            api_base_url: settings.api_base_url.clone(),
            snapshot_base_url: settings.snapshot_base_url.clone(),
        })
    }

    pub fn record_url(&self, id: &Identifier) -> String {
        format!("{}{}", self.api_base_url, id)
    }

    pub fn snapshot_url(&self, id: &Identifier) -> String {
        format!("{}{}", self.snapshot_base_url, id)
    }

    fn get(&self, url: &str) -> Result<Vec<u8>, StageError> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| StageError::Transient(format!("request failed: {err}")))?;
        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }
        let bytes = response
            .bytes()
            .map_err(|err| StageError::Transient(format!("body read failed: {err}")))?;
        Ok(bytes.to_vec())
    }

    /// Fetch the rendered card page for an identifier.
    pub fn fetch_snapshot(&self, id: &Identifier) -> Result<Vec<u8>, StageError> {
        self.get(&self.snapshot_url(id))
    }

    /// Fetch the structured record for an identifier. The body must parse
    /// as JSON (a truncated or garbled response is transient); it is stored
    /// pretty-printed for stable diffs.
    pub fn fetch_record(&self, id: &Identifier) -> Result<Vec<u8>, StageError> {
        let bytes = self.get(&self.record_url(id))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|err| StageError::Transient(format!("invalid json body: {err}")))?;
        let mut pretty = serde_json::to_vec_pretty(&value)
            .map_err(|err| StageError::Transient(format!("json render failed: {err}")))?;
        pretty.push(b'\n');
        Ok(pretty)
    }
}
