//! reqwest transport for the remote call wrapper and the error sink.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use wavespace_core::{ErrorRecord, ErrorSink, RemoteError};

use crate::remote::{Method, RemoteResponse, RequestFn, RequestOptions, DEFAULT_REQUEST_TIMEOUT};

fn transport(endpoint: &str, err: impl std::fmt::Display) -> RemoteError {
    RemoteError::Transport {
        endpoint: endpoint.to_string(),
        reason: err.to_string(),
    }
}

fn map_send_error(endpoint: &str, timeout: Duration, err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout {
            endpoint: endpoint.to_string(),
            after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        transport(endpoint, err)
    }
}

/// Query pairs from a params object. Strings are sent bare, everything else
/// as JSON text; `null` members are skipped.
fn query_pairs(params: Option<&Value>) -> Vec<(String, String)> {
    let Some(Value::Object(fields)) = params else {
        return Vec::new();
    };
    fields
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// [`RequestFn`] over HTTP, rooted at a base URL.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| transport(base_url, e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `endpoint`. Absolute endpoints are used as given.
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }
}

#[async_trait]
impl RequestFn for HttpBackend {
    async fn request(&self, endpoint: &str, options: &RequestOptions) -> Result<RemoteResponse, RemoteError> {
        let method = match options.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut request = self
            .client
            .request(method, self.url_for(endpoint))
            .header("Content-Type", "application/json");
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let query = query_pairs(options.params.as_ref());
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(endpoint, self.timeout, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_send_error(endpoint, self.timeout, e))?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else if status.is_success() {
            serde_json::from_str(&text).map_err(|e| RemoteError::Decode {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        tracing::debug!(endpoint, status = status.as_u16(), "HTTP response");
        Ok(RemoteResponse::new(status.as_u16(), body))
    }
}

/// [`ErrorSink`] that posts records to an HTTP endpoint.
///
/// Submission is fire-and-forget: the post runs on the current tokio
/// runtime and its failure is only logged.
#[derive(Debug, Clone)]
pub struct HttpErrorSink {
    client: reqwest::Client,
    endpoint: Arc<str>,
}

impl HttpErrorSink {
    pub fn new(endpoint: &str) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| transport(endpoint, e))?;
        Ok(Self {
            client,
            endpoint: Arc::from(endpoint),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ErrorSink for HttpErrorSink {
    fn submit(&self, record: &ErrorRecord) -> Result<(), RemoteError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| transport(&self.endpoint, e))?;
        let payload = serde_json::to_value(record).map_err(|e| RemoteError::Decode {
            endpoint: self.endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let client = self.client.clone();
        let endpoint = Arc::clone(&self.endpoint);
        let record_id = record.id;
        handle.spawn(async move {
            let outcome = client
                .post(endpoint.as_ref())
                .json(&payload)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            match outcome {
                Ok(_) => tracing::debug!(record = %record_id, "Error record submitted"),
                Err(e) => tracing::warn!(record = %record_id, error = %e, "Error record submission failed"),
            }
        });
        Ok(())
    }
}
