//! Resilient fetch client: the single point of entry for backend HTTP calls.
//!
//! Each call races the transport against a per-attempt timeout, retries
//! transient failures (429, 5xx, connection errors) with capped exponential
//! backoff, and is single-flight per client instance: starting a call cancels
//! whatever call the same instance still has in flight, and the superseded
//! caller gets `FetchError::Cancelled` even if its response arrives later.

pub mod response;
pub mod retry;
mod single_flight;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth_store::{AuthStore, FileAuthStore, MemoryAuthStore};
use crate::config::ClientConfig;
use crate::errors::FetchError;
use crate::hooks::{AuthExpiredHandler, NotificationLevel, Notifier};
use crate::upload::{FileBlob, ProgressSink};

pub use response::ResponseBody;
pub use retry::RetryPolicy;
pub use transport::{Method, Payload, PreparedRequest, RawResponse, ReqwestTransport, Transport};

use single_flight::{FlightTicket, SingleFlight};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Per-call knobs. `None` timeouts/retries fall back to `ClientConfig`.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Merged over the defaults; names compare case-insensitively.
    pub headers: Vec<(String, String)>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    /// Send the error's user message to the notifier. Cancellations never are.
    pub notify_errors: bool,
    pub success_message: Option<String>,
    /// Run the auth-expired handler on a 401. The token is cleared either way.
    pub auth_expiry_hook: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::Get,
            body: None,
            headers: Vec::new(),
            timeout_ms: None,
            retries: None,
            notify_errors: true,
            success_message: None,
            auth_expiry_hook: true,
        }
    }
}

impl RequestOptions {
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    pub fn silent(mut self) -> Self {
        self.notify_errors = false;
        self
    }

    pub fn without_auth_expiry_hook(mut self) -> Self {
        self.auth_expiry_hook = false;
        self
    }
}

/// Options for `FetchClient::upload`. `request.body` is ignored.
#[derive(Clone)]
pub struct UploadOptions {
    pub request: RequestOptions,
    pub field_name: String,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            request: RequestOptions::default().with_method(Method::Post),
            field_name: "file".to_string(),
            progress: None,
        }
    }
}

impl UploadOptions {
    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }
}

struct Shared {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthStore>,
    notifier: Option<Arc<dyn Notifier>>,
    on_auth_expired: Option<Arc<dyn AuthExpiredHandler>>,
    retry_policy: RetryPolicy,
}

/// Clones are the same instance and share one in-flight slot. Use
/// `sibling` for an independent instance over the same transport and store.
#[derive(Clone)]
pub struct FetchClient {
    shared: Arc<Shared>,
    flight: Arc<SingleFlight>,
}

pub struct FetchClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    auth_store: Option<Arc<dyn AuthStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    on_auth_expired: Option<Arc<dyn AuthExpiredHandler>>,
    retry_policy: RetryPolicy,
}

impl FetchClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn auth_store(mut self, store: Arc<dyn AuthStore>) -> Self {
        self.auth_store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn on_auth_expired(mut self, handler: Arc<dyn AuthExpiredHandler>) -> Self {
        self.on_auth_expired = Some(handler);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn build(self) -> FetchClient {
        let auth = self.auth_store.unwrap_or_else(|| match &self.config.auth_store_path {
            Some(path) => Arc::new(FileAuthStore::new(path)) as Arc<dyn AuthStore>,
            None => Arc::new(MemoryAuthStore::new()),
        });
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));

        FetchClient {
            shared: Arc::new(Shared {
                config: self.config,
                transport,
                auth,
                notifier: self.notifier,
                on_auth_expired: self.on_auth_expired,
                retry_policy: self.retry_policy,
            }),
            flight: Arc::new(SingleFlight::new()),
        }
    }
}

impl FetchClient {
    pub fn builder(config: ClientConfig) -> FetchClientBuilder {
        FetchClientBuilder {
            config,
            transport: None,
            auth_store: None,
            notifier: None,
            on_auth_expired: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn sibling(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            flight: Arc::new(SingleFlight::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn auth_store(&self) -> &Arc<dyn AuthStore> {
        &self.shared.auth
    }

    /// Whether this instance currently has a call in flight.
    pub fn has_pending(&self) -> bool {
        self.flight.is_occupied()
    }

    /// Forwards a message to the configured notifier, if any.
    pub fn notify(&self, level: NotificationLevel, message: &str) {
        if let Some(notifier) = &self.shared.notifier {
            notifier.notify(level, message);
        }
    }

    /// Aborts the in-flight call, if any. Its caller sees `Cancelled`.
    /// A no-op when nothing is pending.
    pub fn cancel_request(&self) {
        self.flight.cancel_active();
    }

    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, FetchError> {
        let prepared = options
            .body
            .as_ref()
            .map(|body| serde_json::to_vec(body).map(|raw| Payload::Json(Bytes::from(raw))))
            .transpose()
            .map_err(|e| FetchError::InvalidRequest(format!("body is not serializable: {e}")))
            .map(|payload| PreparedRequest {
                method: options.method,
                url: self.resolve_url(url),
                headers: merge_headers(
                    &[("content-type", JSON_CONTENT_TYPE)],
                    &options.headers,
                ),
                payload: payload.unwrap_or(Payload::Empty),
            });

        self.execute(url, prepared, &options, None).await
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<ResponseBody, FetchError> {
        self.request(url, options.with_method(Method::Get)).await
    }

    pub async fn delete(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, FetchError> {
        self.request(url, options.with_method(Method::Delete)).await
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<ResponseBody, FetchError> {
        self.with_body(url, Method::Post, body, options).await
    }

    pub async fn put<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<ResponseBody, FetchError> {
        self.with_body(url, Method::Put, body, options).await
    }

    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<ResponseBody, FetchError> {
        self.with_body(url, Method::Patch, body, options).await
    }

    async fn with_body<B: Serialize + ?Sized>(
        &self,
        url: &str,
        method: Method,
        body: &B,
        options: RequestOptions,
    ) -> Result<ResponseBody, FetchError> {
        match serde_json::to_value(body) {
            Ok(value) => {
                self.request(url, options.with_method(method).with_body(value))
                    .await
            }
            Err(e) => {
                let outcome = Err(FetchError::InvalidRequest(format!(
                    "body is not serializable: {e}"
                )));
                self.report(&outcome, &options);
                outcome
            }
        }
    }

    /// Sends `file` as a single-field multipart form. Size and type are not
    /// checked here; see `upload::check_upload`.
    pub async fn upload(
        &self,
        url: &str,
        file: FileBlob,
        options: UploadOptions,
    ) -> Result<ResponseBody, FetchError> {
        // The transport must set content-type itself so the boundary matches.
        let headers: Vec<(String, String)> = options
            .request
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type"))
            .cloned()
            .collect();

        let prepared = Ok(PreparedRequest {
            method: options.request.method,
            url: self.resolve_url(url),
            headers,
            payload: Payload::Multipart {
                field: options.field_name.clone(),
                file,
            },
        });

        self.execute(url, prepared, &options.request, options.progress.clone())
            .await
    }

    fn resolve_url(&self, url: &str) -> String {
        resolve_url(&self.shared.config.base_url, url)
    }

    async fn execute(
        &self,
        raw_url: &str,
        prepared: Result<PreparedRequest, FetchError>,
        options: &RequestOptions,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<ResponseBody, FetchError> {
        let outcome = match (self.validate(raw_url, options), prepared) {
            (Ok((timeout, retries)), Ok(request)) => {
                let policy = AttemptPolicy {
                    timeout,
                    retries,
                    auth_expiry_hook: options.auth_expiry_hook,
                };
                self.run(request, policy, progress).await
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        self.report(&outcome, options);
        outcome
    }

    fn validate(&self, url: &str, options: &RequestOptions) -> Result<(Duration, u32), FetchError> {
        if url.trim().is_empty() {
            return Err(FetchError::InvalidRequest("url must not be empty".to_string()));
        }
        let timeout_ms = options.timeout_ms.unwrap_or(self.shared.config.timeout_ms);
        if timeout_ms == 0 {
            return Err(FetchError::InvalidRequest(
                "timeout must be greater than zero".to_string(),
            ));
        }
        let retries = options.retries.unwrap_or(self.shared.config.retries);
        Ok((Duration::from_millis(timeout_ms), retries))
    }

    async fn run(
        &self,
        request: PreparedRequest,
        policy: AttemptPolicy,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<ResponseBody, FetchError> {
        let mut ticket = self.flight.begin();
        let span = info_span!(
            "fetch",
            op = %Uuid::new_v4(),
            slot = ticket.id(),
            method = %request.method,
            url = %request.url,
        );

        async move {
            let outcome = self
                .attempt_with_retries(&mut ticket, &request, policy, progress)
                .await;

            // A superseded call never reports a result, even one that raced in.
            if ticket.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn attempt_with_retries(
        &self,
        ticket: &mut FlightTicket<'_>,
        request: &PreparedRequest,
        policy: AttemptPolicy,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<ResponseBody, FetchError> {
        let retries = policy.retries;
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = ticket.cancelled() => Err(FetchError::Cancelled),
                result = self.attempt(request, &policy, progress.clone(), attempt) => result,
            };

            match result {
                Err(err) if err.is_retryable() && attempt < retries => {
                    let delay = self.shared.retry_policy.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        "{err}; retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = ticket.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn attempt(
        &self,
        base: &PreparedRequest,
        policy: &AttemptPolicy,
        progress: Option<Arc<dyn ProgressSink>>,
        attempt: u32,
    ) -> Result<ResponseBody, FetchError> {
        let timeout = policy.timeout;
        let mut request = base.clone();
        // Read the token fresh on every attempt; never cache it.
        if let Some(token) = self.on_store(|store| store.token()).await {
            request
                .headers
                .retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
            request
                .headers
                .push(("authorization".to_string(), format!("Bearer {token}")));
        }

        debug!(attempt, "Sending request");
        let sent = tokio::time::timeout(timeout, self.shared.transport.send(request, progress)).await;
        let response = match sent {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                })
            }
        };
        debug!(attempt, status = response.status, "Received response");

        let outcome = response::classify(&response);
        if matches!(outcome, Err(FetchError::AuthExpired { .. })) {
            self.expire_session(policy.auth_expiry_hook).await;
        }
        outcome
    }

    /// Runs a store operation on the blocking pool; stores may touch disk.
    async fn on_store<T, F>(&self, op: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&dyn AuthStore) -> T + Send + 'static,
    {
        let store = self.shared.auth.clone();
        match tokio::task::spawn_blocking(move || op(&*store)).await {
            Ok(value) => value,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // Only reachable while the runtime shuts down.
            Err(_) => std::future::pending().await,
        }
    }

    async fn expire_session(&self, run_hook: bool) {
        warn!("Authentication rejected; clearing stored token");
        if let Err(e) = self.on_store(|store| store.clear_token()).await {
            warn!("Failed to clear auth token: {e}");
        }
        if !run_hook {
            return;
        }
        if let Some(handler) = &self.shared.on_auth_expired {
            handler.on_auth_expired();
        }
    }

    fn report(&self, outcome: &Result<ResponseBody, FetchError>, options: &RequestOptions) {
        match outcome {
            Ok(_) => {
                if let Some(message) = &options.success_message {
                    self.notify(NotificationLevel::Success, message);
                }
            }
            Err(FetchError::Cancelled) => {}
            Err(e) if options.notify_errors => {
                self.notify(NotificationLevel::Error, &e.user_message());
            }
            Err(_) => {}
        }
    }
}

/// Per-call limits resolved from `RequestOptions` and `ClientConfig`.
#[derive(Debug, Clone, Copy)]
struct AttemptPolicy {
    timeout: Duration,
    retries: u32,
    auth_expiry_hook: bool,
}

/// Absolute URLs pass through; anything else hangs off `base_url`.
pub(crate) fn resolve_url(base_url: &str, url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}

/// Later entries win; the header name casing of the winner is kept.
fn merge_headers(defaults: &[(&str, &str)], overrides: &[(String, String)]) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = defaults
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (name, value) in overrides {
        merged.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        merged.push((name.clone(), value.clone()));
    }
    merged
}
