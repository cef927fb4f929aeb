use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::settle;
use crate::errors::FetchError;
use crate::fetch::{FetchClient, RequestOptions, ResponseBody};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    /// "candidate" | "hr"
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_role() -> String {
    "candidate".to_string()
}

/// Body returned by login and register.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Session lifecycle: the only writer of the token besides the 401 path.
#[derive(Clone)]
pub struct AuthApi {
    client: FetchClient,
}

impl AuthApi {
    pub fn new(client: FetchClient) -> Self {
        Self { client }
    }

    /// POST /auth/login, then stores the returned token.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, FetchError> {
        let body = json!({ "email": email, "password": password });
        let response = self
            .client
            .post("/auth/login", &body, RequestOptions::default())
            .await?;
        let session = settle(&self.client, self.open_session(response), Some("Logged in"))?;
        info!("Logged in as {}", session.user.email);
        Ok(session)
    }

    /// POST /auth/register, then stores the returned token.
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthSession, FetchError> {
        let response = self
            .client
            .post("/auth/register", request, RequestOptions::default())
            .await?;
        let session = settle(
            &self.client,
            self.open_session(response),
            Some("Account created"),
        )?;
        info!("Registered {}", session.user.email);
        Ok(session)
    }

    /// Clears the local token. The server call is best effort, and a 401
    /// from it does not run the auth-expired handler.
    pub async fn logout(&self) -> Result<(), FetchError> {
        if self.client.auth_store().token().is_some() {
            let options = RequestOptions::default()
                .silent()
                .without_auth_expiry_hook();
            if let Err(e) = self.client.post("/auth/logout", &json!({}), options).await {
                warn!("Server-side logout failed: {e}");
            }
        }
        self.client.auth_store().clear_token()?;
        Ok(())
    }

    /// GET /auth/me
    pub async fn me(&self) -> Result<UserProfile, FetchError> {
        let response = self.client.get("/auth/me", RequestOptions::default()).await?;
        settle(&self.client, response.json(), None)
    }

    /// GET /user/profile
    pub async fn profile(&self) -> Result<UserProfile, FetchError> {
        let response = self
            .client
            .get("/user/profile", RequestOptions::default())
            .await?;
        settle(&self.client, response.json(), None)
    }

    fn open_session(&self, response: ResponseBody) -> Result<AuthSession, FetchError> {
        let session: AuthSession = response.json()?;
        self.client.auth_store().set_token(&session.token)?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::api::testing::FixedTransport;
    use crate::auth_store::{AuthStore, MemoryAuthStore};
    use crate::config::ClientConfig;
    use crate::errors::{AuthStoreError, ErrorKind};
    use crate::hooks::{NotificationLevel, RecordingNotifier};

    #[test]
    fn test_session_deserializes_with_defaults() {
        let session: AuthSession = serde_json::from_str(
            r#"{"token":"t","user":{"id":"u1","name":"Jane","email":"jane@example.com"}}"#,
        )
        .unwrap();
        assert_eq!(session.token, "t");
        assert_eq!(session.user.role, "candidate");
        assert!(session.user.created_at.is_none());
    }

    #[test]
    fn test_register_request_omits_missing_role() {
        let request = RegisterRequest {
            name: "Sam".to_string(),
            email: "sam@example.com".to_string(),
            password: "hunter22".to_string(),
            role: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("role").is_none());
        assert_eq!(value["email"], "sam@example.com");
    }

    fn auth_api(
        transport: Arc<FixedTransport>,
        store: Arc<dyn AuthStore>,
        notifier: Arc<RecordingNotifier>,
    ) -> AuthApi {
        let client = FetchClient::builder(ClientConfig::default())
            .transport(transport)
            .auth_store(store)
            .notifier(notifier)
            .build();
        AuthApi::new(client)
    }

    const SESSION: &str =
        r#"{"token":"tok-1","user":{"id":"u1","name":"Jane","email":"jane@example.com"}}"#;

    #[tokio::test]
    async fn test_login_notifies_success_after_token_is_stored() {
        let store = Arc::new(MemoryAuthStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let auth = auth_api(FixedTransport::new(200, SESSION), store.clone(), notifier.clone());

        let session = auth.login("jane@example.com", "pw").await.unwrap();
        assert_eq!(session.user.name, "Jane");
        assert_eq!(store.token().as_deref(), Some("tok-1"));
        assert_eq!(
            notifier.entries(),
            vec![(NotificationLevel::Success, "Logged in".to_string())]
        );
    }

    #[tokio::test]
    async fn test_login_with_unreadable_body_is_not_reported_as_success() {
        let store = Arc::new(MemoryAuthStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let auth = auth_api(
            FixedTransport::new(200, r#"{"unexpected":true}"#),
            store.clone(),
            notifier.clone(),
        );

        let err = auth.login("jane@example.com", "pw").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(store.token(), None);
        assert_eq!(
            notifier.entries(),
            vec![(NotificationLevel::Error, err.user_message())]
        );
    }

    #[tokio::test]
    async fn test_register_storage_failure_is_not_reported_as_success() {
        struct ReadOnlyStore;
        impl AuthStore for ReadOnlyStore {
            fn token(&self) -> Option<String> {
                None
            }
            fn set_token(&self, _: &str) -> Result<(), AuthStoreError> {
                Err(AuthStoreError::Io(std::io::Error::other("read-only")))
            }
            fn clear_token(&self) -> Result<(), AuthStoreError> {
                Ok(())
            }
        }

        let notifier = Arc::new(RecordingNotifier::new());
        let auth = auth_api(
            FixedTransport::new(200, SESSION),
            Arc::new(ReadOnlyStore),
            notifier.clone(),
        );
        let request = RegisterRequest {
            name: "Jane".to_string(),
            email: "jane@example.com".to_string(),
            password: "pw".to_string(),
            role: None,
        };

        let err = auth.register(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageError);
        assert!(notifier
            .entries()
            .iter()
            .all(|(level, _)| *level == NotificationLevel::Error));
    }

    #[tokio::test]
    async fn test_logout_rejected_by_server_skips_expiry_handler() {
        let transport = FixedTransport::new(401, r#"{"message":"Token expired"}"#);
        let store = Arc::new(MemoryAuthStore::with_token("old"));
        let notifier = Arc::new(RecordingNotifier::new());
        let fired = Arc::new(AtomicBool::new(false));
        let client = FetchClient::builder(ClientConfig::default())
            .transport(transport.clone())
            .auth_store(store.clone())
            .notifier(notifier.clone())
            .on_auth_expired(Arc::new({
                let fired = fired.clone();
                move || fired.store(true, Ordering::SeqCst)
            }))
            .build();

        AuthApi::new(client).logout().await.unwrap();
        assert_eq!(transport.calls(), 1);
        assert!(transport.urls()[0].ends_with("/auth/logout"));
        assert_eq!(store.token(), None);
        assert!(!fired.load(Ordering::SeqCst));
        assert!(notifier.entries().is_empty());
    }

    #[tokio::test]
    async fn test_logout_without_token_stays_local() {
        let transport = FixedTransport::new(200, "{}");
        let auth = auth_api(
            transport.clone(),
            Arc::new(MemoryAuthStore::new()),
            Arc::new(RecordingNotifier::new()),
        );

        auth.logout().await.unwrap();
        assert_eq!(transport.calls(), 0);
    }
}
