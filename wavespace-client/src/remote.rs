//! Remote Call Wrapper.
//!
//! Wraps a [`RequestFn`] backend with a timeout, a read-through cache for
//! GET requests and error reporting. Every failure is reported once, after
//! the final attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use wavespace_core::{RemoteError, RemoteSection, SharedReporter};
use wavespace_storage::TtlCache;

use crate::retry::RetryPolicy;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP method of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to send.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    pub method: Method,
    /// Query parameters. Part of the cache key.
    pub params: Option<Value>,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self::with_body(Method::Post, body)
    }

    pub fn with_body(method: Method, body: Value) -> Self {
        Self {
            method,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Cache key for `endpoint` with these params: `api:<endpoint>:<params>`.
    pub fn cache_key(&self, endpoint: &str) -> String {
        let params = self
            .params
            .as_ref()
            .map_or_else(|| "{}".to_string(), Value::to_string);
        format!("api:{}:{}", endpoint, params)
    }
}

/// A backend response.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Value,
}

impl RemoteResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server-provided error message, if the body carries one.
    fn error_message(&self) -> String {
        match &self.body {
            Value::String(text) => text.clone(),
            Value::Object(fields) => fields
                .get("message")
                .or_else(|| fields.get("error"))
                .and_then(Value::as_str)
                .map_or_else(|| self.body.to_string(), str::to_string),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Request transport.
#[async_trait]
pub trait RequestFn: Send + Sync {
    async fn request(&self, endpoint: &str, options: &RequestOptions) -> Result<RemoteResponse, RemoteError>;
}

/// Timeout, cache and reporting around a [`RequestFn`].
pub struct RemoteCallWrapper {
    backend: Arc<dyn RequestFn>,
    cache: Arc<TtlCache<Value>>,
    reporter: Option<SharedReporter>,
    timeout: Duration,
    retry_policy: RetryPolicy,
}

impl fmt::Debug for RemoteCallWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCallWrapper")
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl RemoteCallWrapper {
    pub fn new(backend: Arc<dyn RequestFn>, cache: Arc<TtlCache<Value>>) -> Self {
        Self {
            backend,
            cache,
            reporter: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Policy used by [`call_with_default_retry`](Self::call_with_default_retry).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Timeout and retry settings from config.
    pub fn configured(self, section: &RemoteSection) -> Self {
        self.with_timeout(section.request_timeout())
            .with_retry_policy(RetryPolicy::from(section))
    }

    pub fn cache(&self) -> &Arc<TtlCache<Value>> {
        &self.cache
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issue one request.
    pub async fn call(&self, endpoint: &str, options: RequestOptions) -> Result<Value, RemoteError> {
        let result = self.attempt(endpoint, &options).await;
        if let Err(err) = &result {
            self.report(endpoint, &options, err, 1);
        }
        result
    }

    /// Issue a request under `policy`. Only use with idempotent requests.
    pub async fn call_with_retry(
        &self,
        endpoint: &str,
        options: RequestOptions,
        policy: RetryPolicy,
    ) -> Result<Value, RemoteError> {
        let result = policy.run(|| self.attempt(endpoint, &options)).await;
        if let Err(err) = &result {
            self.report(endpoint, &options, err, policy.attempts());
        }
        result
    }

    /// [`call_with_retry`](Self::call_with_retry) with the configured policy.
    pub async fn call_with_default_retry(&self, endpoint: &str, options: RequestOptions) -> Result<Value, RemoteError> {
        self.call_with_retry(endpoint, options, self.retry_policy).await
    }

    /// Drop cached responses for `endpoint`, or every cached response when
    /// `None`. Other cache entries are left alone. Returns how many went.
    pub fn invalidate(&self, endpoint: Option<&str>) -> usize {
        let prefix = match endpoint {
            Some(endpoint) => format!("api:{}:", endpoint),
            None => "api:".to_string(),
        };
        self.cache
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .filter(|key| self.cache.delete(key))
            .count()
    }

    async fn attempt(&self, endpoint: &str, options: &RequestOptions) -> Result<Value, RemoteError> {
        let cache_key = (options.method == Method::Get).then(|| options.cache_key(endpoint));

        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get(key) {
                tracing::trace!(endpoint, "Serving cached response");
                return Ok(cached);
            }
        }

        let response = tokio::time::timeout(self.timeout, self.backend.request(endpoint, options))
            .await
            .map_err(|_| RemoteError::Timeout {
                endpoint: endpoint.to_string(),
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })??;

        if !response.is_success() {
            return Err(RemoteError::Status {
                endpoint: endpoint.to_string(),
                status: response.status,
                message: response.error_message(),
            });
        }

        if let Some(key) = cache_key {
            self.cache.set(key, response.body.clone(), None);
        }
        Ok(response.body)
    }

    fn report(&self, endpoint: &str, options: &RequestOptions, err: &RemoteError, attempts: u32) {
        tracing::error!(endpoint, method = %options.method, attempts, error = %err, "Remote call failed");
        if let Some(reporter) = &self.reporter {
            reporter.error(
                err.clone(),
                json!({
                    "endpoint": endpoint,
                    "method": options.method.as_str(),
                    "params": options.params,
                    "attempts": attempts,
                    "error": err.to_string(),
                }),
            );
        }
    }
}
