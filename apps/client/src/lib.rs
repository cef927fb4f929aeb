//! Resilient HTTP client for the CV analysis backend.
//!
//! `FetchClient` wraps every backend call with a per-attempt timeout,
//! retry with capped exponential backoff for transient failures,
//! single-flight cancellation per client instance, and bearer-token
//! injection from an `AuthStore`. `FetchClient::upload` sends files as
//! multipart forms with optional progress reporting.
//!
//! The `api` module layers typed auth and CV endpoints on top.

pub mod api;
pub mod auth_store;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod hooks;
pub mod upload;

pub use auth_store::{AuthStore, FileAuthStore, MemoryAuthStore};
pub use config::ClientConfig;
pub use errors::{AuthStoreError, ErrorKind, FetchError, TransportError};
pub use fetch::{
    FetchClient, FetchClientBuilder, Method, RequestOptions, ResponseBody, RetryPolicy,
    Transport, UploadOptions,
};
pub use hooks::{AuthExpiredHandler, NotificationLevel, Notifier, TracingNotifier};
pub use upload::{progress_channel, FileBlob, ProgressSink};
