//! WAVE SPACE Client
//!
//! Remote calls with timeout, GET caching and linear retry; the reqwest
//! transport; tracing setup; and [`ClientRuntime`], which wires every
//! service of the runtime together.

pub mod http;
pub mod remote;
pub mod retry;
pub mod runtime;
pub mod telemetry;

pub use http::{HttpBackend, HttpErrorSink};
pub use remote::{Method, RemoteCallWrapper, RemoteResponse, RequestFn, RequestOptions, DEFAULT_REQUEST_TIMEOUT};
pub use retry::{retry, RetryPolicy};
pub use runtime::{ClientRuntime, ClientRuntimeBuilder, CONFIG_CHANGE_EVENT};
pub use telemetry::{env_filter, init_tracing, TelemetryError};
