// Typed endpoints over `FetchClient`.
// Each wrapper owns one client instance, so its calls are single-flight.

pub mod auth;
pub mod cv;

pub use auth::{AuthApi, AuthSession, RegisterRequest, UserProfile};
pub use cv::{CvAnalysis, CvApi, UploadReceipt};

use crate::errors::FetchError;
use crate::fetch::FetchClient;
use crate::hooks::NotificationLevel;

/// Notifies the outcome of the work done after a successful HTTP call
/// (decoding, token storage). HTTP failures are already notified by the
/// client, so only post-response errors reach the notifier here.
fn settle<T>(
    client: &FetchClient,
    outcome: Result<T, FetchError>,
    success_message: Option<&str>,
) -> Result<T, FetchError> {
    match &outcome {
        Ok(_) => {
            if let Some(message) = success_message {
                client.notify(NotificationLevel::Success, message);
            }
        }
        Err(e) => client.notify(NotificationLevel::Error, &e.user_message()),
    }
    outcome
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::errors::TransportError;
    use crate::fetch::{PreparedRequest, RawResponse, Transport};
    use crate::upload::ProgressSink;

    /// Answers every request with the same response.
    pub(crate) struct FixedTransport {
        response: RawResponse,
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl FixedTransport {
        pub(crate) fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                response: RawResponse::new(status, "application/json", body.to_string()),
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(
            &self,
            request: PreparedRequest,
            _progress: Option<Arc<dyn ProgressSink>>,
        ) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(request.url);
            Ok(self.response.clone())
        }
    }
}
