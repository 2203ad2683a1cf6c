//! Credential lifecycle: load the stored GitHub token, exchange it for a
//! short-lived backend token, and fall back to the device flow when the stored
//! token is missing or rejected.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::device_flow::{self, DeviceAuthorization};
use super::store::{AuthCredential, CredentialStore};
use crate::config::{AuthConfig, BackendConfig};
use crate::error::AuthError;
use crate::logging::mask_token;

/// Re-exchange when the backend token has less than this many seconds left.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Where the verification URL and user code are shown during authorization.
pub trait OperatorPrompt: Send + Sync {
    fn present(&self, device: &DeviceAuthorization);
}

/// Prints the verification instructions to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompt;

impl OperatorPrompt for ConsolePrompt {
    fn present(&self, device: &DeviceAuthorization) {
        println!("\nPlease visit: {}", device.verification_uri);
        println!("And enter code: {}\n", device.user_code);
    }
}

/// Short-lived token accepted by the completion backend.
#[derive(Clone)]
pub struct ApiToken {
    token: SecretString,
    expires_at: Option<i64>,
}

impl ApiToken {
    pub fn new(token: impl Into<String>, expires_at: Option<i64>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .map_or(true, |exp| exp - now > REFRESH_MARGIN_SECS)
    }

    fn same_as(&self, other: &ApiToken) -> bool {
        self.secret() == other.secret()
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiToken")
            .field("token", &mask_token(self.secret()))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Supplies backend tokens to every request. The cached token sits behind an
/// async mutex that is held for the whole acquisition, so at most one device
/// flow prompt can be active at a time.
pub struct CredentialManager {
    http: reqwest::Client,
    auth: AuthConfig,
    editor_version: String,
    integration_id: String,
    store: CredentialStore,
    prompt: Arc<dyn OperatorPrompt>,
    cached: Mutex<Option<ApiToken>>,
}

impl CredentialManager {
    pub fn new(
        http: reqwest::Client,
        auth: AuthConfig,
        backend: &BackendConfig,
        store: CredentialStore,
        prompt: Arc<dyn OperatorPrompt>,
    ) -> Self {
        Self {
            http,
            auth,
            editor_version: backend.editor_version.clone(),
            integration_id: backend.integration_id.clone(),
            store,
            prompt,
            cached: Mutex::new(None),
        }
    }

    /// Current backend token, acquiring or refreshing it if needed.
    pub async fn token(&self) -> Result<ApiToken, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(ref token) = *cached {
            if token.is_fresh(chrono::Utc::now().timestamp()) {
                return Ok(token.clone());
            }
            tracing::info!("Backend token is about to expire, refreshing");
        }

        let fresh = self.obtain().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    /// Called when the backend rejected `stale`. Re-runs the lifecycle unless
    /// another request already replaced the token.
    pub async fn invalidate(&self, stale: &ApiToken) -> Result<ApiToken, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(ref current) = *cached {
            if !current.same_as(stale) {
                return Ok(current.clone());
            }
        }

        tracing::warn!(token = %mask_token(stale.secret()), "Backend rejected token, re-authorizing");
        *cached = None;
        let fresh = self.obtain().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    /// Run the full lifecycle once, bypassing the cache.
    ///
    /// A stored credential whose exchange is rejected triggers exactly one
    /// device flow; a freshly authorized credential that also fails the
    /// exchange is reported as is.
    pub async fn obtain(&self) -> Result<ApiToken, AuthError> {
        let stored = self.store.load()?;

        let credential = match stored {
            Some(credential) => {
                tracing::debug!(
                    token = %mask_token(credential.access_token()),
                    "Found stored credential"
                );
                match self.exchange(&credential).await {
                    Ok(token) => return Ok(token),
                    Err(e @ (AuthError::Exchange { .. } | AuthError::EmptyToken)) => {
                        tracing::warn!(error = %e, "Stored credential rejected, starting device flow");
                        self.authorize_device().await?
                    }
                    Err(e) => return Err(e),
                }
            }
            None => {
                tracing::info!("No stored credential, starting device flow");
                self.authorize_device().await?
            }
        };

        self.exchange(&credential).await
    }

    async fn authorize_device(&self) -> Result<AuthCredential, AuthError> {
        let device = device_flow::request_device_code(&self.http, &self.auth).await?;
        tracing::debug!(uri = %device.verification_uri, expires_in = device.expires_in, "Received device code");

        self.prompt.present(&device);

        let credential = device_flow::poll_for_token(&self.http, &self.auth, &device).await?;
        self.store.save(&credential)?;
        tracing::info!(path = %self.store.path().display(), "Saved new credential");

        Ok(credential)
    }

    async fn exchange(&self, credential: &AuthCredential) -> Result<ApiToken, AuthError> {
        let response = self
            .http
            .get(&self.auth.token_exchange_url)
            .header("Authorization", format!("token {}", credential.access_token()))
            .header("Accept", "application/json")
            .header("Editor-Version", &self.editor_version)
            .header("Copilot-Integration-Id", &self.integration_id)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "Token exchange rejected");
            return Err(AuthError::Exchange {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ExchangeResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::Exchange {
                status: status.as_u16(),
                body: format!("unparseable exchange response: {e}"),
            }
        })?;

        if parsed.token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        tracing::debug!(token = %mask_token(&parsed.token), "Obtained backend token");
        Ok(ApiToken::new(parsed.token, parsed.expires_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::{tempdir, TempDir};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    #[derive(Default)]
    struct RecordingPrompt {
        codes: StdMutex<Vec<String>>,
    }

    impl OperatorPrompt for RecordingPrompt {
        fn present(&self, device: &DeviceAuthorization) {
            self.codes.lock().unwrap().push(device.user_code.clone());
        }
    }

    /// Hands out a different backend token on every call.
    struct CountingExchange {
        calls: AtomicUsize,
    }

    impl Respond for CountingExchange {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": format!("tid=backend-token-{n}"),
                "expires_at": chrono::Utc::now().timestamp() + 1800
            }))
        }
    }

    struct Fixture {
        server: MockServer,
        dir: TempDir,
        prompt: Arc<RecordingPrompt>,
    }

    impl Fixture {
        async fn new() -> Self {
            Self {
                server: MockServer::start().await,
                dir: tempdir().unwrap(),
                prompt: Arc::new(RecordingPrompt::default()),
            }
        }

        fn store(&self) -> CredentialStore {
            CredentialStore::new(self.dir.path().join("github-token"))
        }

        fn manager(&self) -> CredentialManager {
            let auth = AuthConfig {
                device_code_url: format!("{}/login/device/code", self.server.uri()),
                access_token_url: format!("{}/login/oauth/access_token", self.server.uri()),
                token_exchange_url: format!("{}/copilot_internal/v2/token", self.server.uri()),
                ..AuthConfig::default()
            };
            CredentialManager::new(
                reqwest::Client::new(),
                auth,
                &BackendConfig::default(),
                self.store(),
                self.prompt.clone(),
            )
        }

        async fn mount_device_flow(&self, granted: &str, times: u64) {
            Mock::given(method("POST"))
                .and(path("/login/device/code"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "device_code": "dev-1",
                    "user_code": "WDJB-MJHT",
                    "verification_uri": "https://github.com/login/device",
                    "expires_in": 60,
                    "interval": 0
                })))
                .expect(times)
                .mount(&self.server)
                .await;
            Mock::given(method("POST"))
                .and(path("/login/oauth/access_token"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "access_token": granted
                })))
                .mount(&self.server)
                .await;
        }

        async fn mount_exchange(&self, credential: &str, status: u16, token: &str) {
            Mock::given(method("GET"))
                .and(path("/copilot_internal/v2/token"))
                .and(header("authorization", format!("token {credential}").as_str()))
                .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
                    "token": token
                })))
                .mount(&self.server)
                .await;
        }
    }

    #[tokio::test]
    async fn test_stored_credential_is_exchanged_without_prompt() {
        let fx = Fixture::new().await;
        fx.store().save(&AuthCredential::new("gho_valid")).unwrap();
        fx.mount_device_flow("unused", 0).await;
        fx.mount_exchange("gho_valid", 200, "tid=backend").await;

        let token = fx.manager().obtain().await.unwrap();
        assert_eq!(token.secret(), "tid=backend");
        assert!(fx.prompt.codes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_runs_device_flow_and_persists() {
        let fx = Fixture::new().await;
        fx.mount_device_flow("gho_fresh", 1).await;
        fx.mount_exchange("gho_fresh", 200, "tid=backend").await;

        let token = fx.manager().obtain().await.unwrap();
        assert_eq!(token.secret(), "tid=backend");
        assert_eq!(*fx.prompt.codes.lock().unwrap(), vec!["WDJB-MJHT".to_string()]);
        assert_eq!(
            fx.store().load().unwrap().unwrap().access_token(),
            "gho_fresh"
        );
    }

    #[tokio::test]
    async fn test_stale_credential_restarts_device_flow_once() {
        let fx = Fixture::new().await;
        fx.store().save(&AuthCredential::new("gho_stale")).unwrap();
        fx.mount_device_flow("gho_fresh", 1).await;
        fx.mount_exchange("gho_stale", 401, "").await;
        fx.mount_exchange("gho_fresh", 200, "tid=after-reauth").await;

        let token = fx.manager().obtain().await.unwrap();
        assert_eq!(token.secret(), "tid=after-reauth");
        assert_eq!(fx.prompt.codes.lock().unwrap().len(), 1);
        assert_eq!(
            fx.store().load().unwrap().unwrap().access_token(),
            "gho_fresh"
        );
    }

    #[tokio::test]
    async fn test_second_exchange_failure_is_not_retried() {
        let fx = Fixture::new().await;
        fx.store().save(&AuthCredential::new("gho_stale")).unwrap();
        fx.mount_device_flow("gho_also_bad", 1).await;
        fx.mount_exchange("gho_stale", 401, "").await;
        fx.mount_exchange("gho_also_bad", 403, "").await;

        let err = fx.manager().obtain().await.unwrap_err();
        assert!(matches!(err, AuthError::Exchange { status: 403, .. }));
        assert_eq!(fx.prompt.codes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_credential_failure_does_not_restart() {
        let fx = Fixture::new().await;
        fx.mount_device_flow("gho_new", 1).await;
        fx.mount_exchange("gho_new", 401, "").await;

        let err = fx.manager().obtain().await.unwrap_err();
        assert!(matches!(err, AuthError::Exchange { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_empty_exchange_token_is_rejected() {
        let fx = Fixture::new().await;
        fx.mount_device_flow("gho_new", 1).await;
        fx.mount_exchange("gho_new", 200, "").await;

        let err = fx.manager().obtain().await.unwrap_err();
        assert!(matches!(err, AuthError::EmptyToken));
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let fx = Fixture::new().await;
        fx.store().save(&AuthCredential::new("gho_valid")).unwrap();
        Mock::given(method("GET"))
            .and(path("/copilot_internal/v2/token"))
            .respond_with(CountingExchange {
                calls: AtomicUsize::new(0),
            })
            .expect(1)
            .mount(&fx.server)
            .await;

        let manager = fx.manager();
        let first = manager.token().await.unwrap();
        let second = manager.token().await.unwrap();
        assert_eq!(first.secret(), second.secret());
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed() {
        let fx = Fixture::new().await;
        fx.store().save(&AuthCredential::new("gho_valid")).unwrap();
        Mock::given(method("GET"))
            .and(path("/copilot_internal/v2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "tid=short-lived",
                "expires_at": chrono::Utc::now().timestamp() + 10
            })))
            .expect(2)
            .mount(&fx.server)
            .await;

        let manager = fx.manager();
        manager.token().await.unwrap();
        manager.token().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_invalidation_reauthorizes_once() {
        let fx = Fixture::new().await;
        fx.store().save(&AuthCredential::new("gho_valid")).unwrap();
        Mock::given(method("GET"))
            .and(path("/copilot_internal/v2/token"))
            .respond_with(CountingExchange {
                calls: AtomicUsize::new(0),
            })
            .expect(2)
            .mount(&fx.server)
            .await;

        let manager = Arc::new(fx.manager());
        let stale = manager.token().await.unwrap();

        let (a, b) = tokio::join!(manager.invalidate(&stale), manager.invalidate(&stale));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.secret(), b.secret());
        assert_ne!(a.secret(), stale.secret());
    }

    #[test]
    fn test_api_token_debug_is_masked() {
        let token = ApiToken::new("tid=0123456789abcdef;exp=1", Some(42));
        let debug = format!("{token:?}");
        assert!(debug.contains("tid=0...exp=1"));
        assert!(!debug.contains("0123456789abcdef"));
    }
}
