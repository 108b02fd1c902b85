//! Shared HTTP plumbing for remote collaborators
//!
//! Transport errors are converted to `ClassifiedError` here, so nothing
//! above this module ever sees a `ureq::Error`. Retrying is left to the
//! pipeline's retry policy.

use crate::provider::BinaryFetch;
use anvil_core::{ClassifiedError, Result};
use std::io::Read;
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest binary accepted from a download
const MAX_DOWNLOAD_BYTES: u64 = 512 * 1024 * 1024;

/// A ureq agent plus optional bearer token
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    api_key: Option<String>,
}

impl HttpClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
            api_key,
        }
    }

    fn bearer(&self) -> Option<String> {
        self.api_key.as_ref().map(|k| format!("Bearer {}", k))
    }

    pub fn post_json(&self, url: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let mut request = self.agent.post(url).header("Content-Type", "application/json");
        if let Some(auth) = self.bearer() {
            request = request.header("Authorization", &auth);
        }
        let mut response = request
            .send_json(payload)
            .map_err(|e| classify_http(e, url))?;
        response
            .body_mut()
            .read_json()
            .map_err(|e| classify_http(e, url))
    }

    pub fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let mut request = self.agent.get(url);
        if let Some(auth) = self.bearer() {
            request = request.header("Authorization", &auth);
        }
        let mut response = request.call().map_err(|e| classify_http(e, url))?;
        response
            .body_mut()
            .read_json()
            .map_err(|e| classify_http(e, url))
    }

    /// POST a binary body; returns the response bytes and the named headers
    pub fn post_bytes(
        &self,
        url: &str,
        body: &[u8],
        headers: &[(&str, &str)],
        read_headers: &[&str],
    ) -> Result<(Vec<u8>, Vec<Option<String>>)> {
        let mut request = self
            .agent
            .post(url)
            .header("Content-Type", "application/octet-stream");
        if let Some(auth) = self.bearer() {
            request = request.header("Authorization", &auth);
        }
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send(body).map_err(|e| classify_http(e, url))?;
        let values = read_headers
            .iter()
            .map(|name| {
                response
                    .headers()
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .collect();
        let bytes = read_body(response.into_body(), url)?;
        Ok((bytes, values))
    }

    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.agent.get(url).call().map_err(|e| classify_http(e, url))?;
        read_body(response.into_body(), url)
    }
}

fn read_body(body: ureq::Body, url: &str) -> Result<Vec<u8>> {
    read_capped(body.into_reader(), MAX_DOWNLOAD_BYTES, url)
}

/// Read at most `limit` bytes; a longer body is an error, never truncated
fn read_capped<R: Read>(reader: R, limit: u64, url: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| {
            ClassifiedError::network(format!("Failed to read response from {}: {}", url, e), None, Some(url))
                .with_source(e)
        })?;
    if bytes.len() as u64 > limit {
        return Err(ClassifiedError::network(
            format!("Response from {} exceeds {} bytes", url, limit),
            None,
            Some(url),
        )
        .with_retryable(false));
    }
    Ok(bytes)
}

/// Convert a transport error into the taxonomy
pub fn classify_http(err: ureq::Error, endpoint: &str) -> ClassifiedError {
    match err {
        ureq::Error::StatusCode(code @ (401 | 403)) => {
            ClassifiedError::auth(format!("{} rejected credentials (HTTP {})", endpoint, code))
        }
        ureq::Error::StatusCode(code) => ClassifiedError::network(
            format!("HTTP {} from {}", code, endpoint),
            Some(code),
            Some(endpoint),
        ),
        ureq::Error::Timeout(_) => {
            let message = format!("Request to {} timed out", endpoint);
            ClassifiedError::network(message, None, Some(endpoint)).with_source(err)
        }
        ureq::Error::BadUri(ref uri) => {
            let message = format!("Invalid URL '{}'", uri);
            ClassifiedError::validation(Some("url"), message).with_source(err)
        }
        ureq::Error::Json(_) => {
            let message = format!("Invalid JSON response from {}: {}", endpoint, err);
            ClassifiedError::generation(None, message).with_source(err)
        }
        other => {
            let message = format!("Request to {} failed: {}", endpoint, other);
            ClassifiedError::network(message, None, Some(endpoint)).with_source(other)
        }
    }
}

/// `BinaryFetch` over plain HTTP(S) and `file://` URLs
pub struct HttpFetcher {
    client: HttpClient,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: HttpClient::new(None, REQUEST_TIMEOUT),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryFetch for HttpFetcher {
    fn download(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = url.strip_prefix("file://") {
            return std::fs::read(path).map_err(|e| {
                ClassifiedError::storage(Some("read"), format!("Failed to read {}: {}", path, e))
                    .with_source(e)
            });
        }
        tracing::debug!(url, "downloading");
        self.client.get_bytes(url)
    }
}
