use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Leeway applied when deciding whether a cached token is still usable, so a
/// token that expires mid-run is refreshed up front.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// Errors that can be raised while loading credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Client secret file not found at {0}")]
    MissingClientSecret(PathBuf),
    #[error("Malformed {kind}: {message}")]
    Malformed { kind: &'static str, message: String },
    #[error("Token endpoint error: {0}")]
    TokenEndpoint(String),
    #[error("Authorization required, but no interactive consent flow is available")]
    AuthorizationRequired,
    #[error("Consent flow failed: {0}")]
    Flow(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// OAuth client identity as issued by the Google Cloud console for an
/// installed application (`credentials.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub installed: InstalledClient,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstalledClient {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

/// Fresh token material as returned by the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Validity in seconds from now.
    pub expires_in: i64,
}

/// Persisted form of a token (`token.json`). The expiry is stored as an
/// absolute timestamp so a later run can judge validity without extra state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expiry_timestamp: i64,
    pub token_type: String,
    pub scopes: Vec<String>,
}

impl StoredToken {
    pub fn from_token_set(set: TokenSet, scopes: &[String]) -> Self {
        let expiry_timestamp = Utc::now().timestamp().saturating_add(set.expires_in);
        Self {
            access_token: set.access_token,
            refresh_token: set.refresh_token,
            expiry_timestamp,
            token_type: "Bearer".to_string(),
            scopes: scopes.to_vec(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(0)
    }

    /// Check if the token will expire within the given seconds.
    pub fn expires_within(&self, seconds: i64) -> bool {
        Utc::now().timestamp().saturating_add(seconds) >= self.expiry_timestamp
    }

    /// A cached token is only reusable when it was granted every scope the
    /// current run asks for.
    pub fn covers_scopes(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|s| self.scopes.contains(s))
    }
}

/// Capability for obtaining fresh token material. The interactive half can be
/// swapped out in non-interactive environments (fail fast instead of opening
/// a browser), and faked in tests.
#[async_trait]
pub trait OauthBroker {
    /// Exchange a refresh token for a fresh access token.
    async fn refresh(
        &self,
        client: &ClientSecret,
        refresh_token: &str,
    ) -> Result<TokenSet, AuthError>;

    /// Run the interactive consent flow and return the granted tokens.
    async fn obtain_consent(
        &self,
        client: &ClientSecret,
        scopes: &[String],
    ) -> Result<TokenSet, AuthError>;
}

/// Loads credentials for a run: cached token if still valid, refresh if the
/// cache carries a refresh token, interactive consent otherwise. Whatever was
/// obtained is persisted back to the cache file, overwriting it wholesale.
pub struct AuthService<B: OauthBroker> {
    client_secret_path: PathBuf,
    token_cache_path: PathBuf,
    scopes: Vec<String>,
    broker: B,
}

impl<B: OauthBroker> AuthService<B> {
    pub fn new(
        client_secret_path: impl Into<PathBuf>,
        token_cache_path: impl Into<PathBuf>,
        scopes: Vec<String>,
        broker: B,
    ) -> Self {
        Self {
            client_secret_path: client_secret_path.into(),
            token_cache_path: token_cache_path.into(),
            scopes,
            broker,
        }
    }

    pub async fn load(&self) -> Result<StoredToken, AuthError> {
        // A missing client secret is fatal regardless of the cache state.
        let secret = self.read_client_secret()?;

        if let Some(cached) = self.read_cached_token() {
            if cached.covers_scopes(&self.scopes) {
                if !cached.expires_within(EXPIRY_LEEWAY_SECS) {
                    tracing::debug!("Using cached access token");
                    return Ok(cached);
                }
                if let Some(refresh_token) = cached.refresh_token.clone() {
                    tracing::info!("Cached token expired, refreshing");
                    let set = self.broker.refresh(&secret, &refresh_token).await?;
                    let mut token = StoredToken::from_token_set(set, &self.scopes);
                    // The token endpoint usually omits the refresh token on a
                    // refresh; keep the one we already have.
                    if token.refresh_token.is_none() {
                        token.refresh_token = Some(refresh_token);
                    }
                    self.persist(&token)?;
                    return Ok(token);
                }
            }
        }

        tracing::info!("No usable cached token, starting consent flow");
        let set = self.broker.obtain_consent(&secret, &self.scopes).await?;
        let token = StoredToken::from_token_set(set, &self.scopes);
        self.persist(&token)?;
        Ok(token)
    }

    fn read_client_secret(&self) -> Result<ClientSecret, AuthError> {
        if !self.client_secret_path.exists() {
            return Err(AuthError::MissingClientSecret(
                self.client_secret_path.clone(),
            ));
        }
        let raw = std::fs::read_to_string(&self.client_secret_path)?;
        serde_json::from_str(&raw).map_err(|e| AuthError::Malformed {
            kind: "client secret",
            message: e.to_string(),
        })
    }

    /// A cache file that is missing or unreadable is treated as absent.
    fn read_cached_token(&self) -> Option<StoredToken> {
        let raw = std::fs::read_to_string(&self.token_cache_path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn persist(&self, token: &StoredToken) -> Result<(), AuthError> {
        let file = std::fs::File::create(&self.token_cache_path)?;
        serde_json::to_writer_pretty(file, token).map_err(|e| AuthError::Malformed {
            kind: "token cache",
            message: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeBroker {
        refresh_calls: Arc<AtomicUsize>,
        consent_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OauthBroker for FakeBroker {
        async fn refresh(
            &self,
            _client: &ClientSecret,
            _refresh_token: &str,
        ) -> Result<TokenSet, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenSet {
                access_token: "refreshed".to_string(),
                refresh_token: None,
                expires_in: 3600,
            })
        }

        async fn obtain_consent(
            &self,
            _client: &ClientSecret,
            _scopes: &[String],
        ) -> Result<TokenSet, AuthError> {
            self.consent_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenSet {
                access_token: "fresh".to_string(),
                refresh_token: Some("new-refresh".to_string()),
                expires_in: 3600,
            })
        }
    }

    struct Harness {
        service: AuthService<FakeBroker>,
        refresh_calls: Arc<AtomicUsize>,
        consent_calls: Arc<AtomicUsize>,
        token_path: PathBuf,
    }

    fn scopes() -> Vec<String> {
        vec!["https://www.googleapis.com/auth/spreadsheets".to_string()]
    }

    fn write_client_secret(dir: &Path) -> PathBuf {
        let path = dir.join("credentials.json");
        std::fs::write(
            &path,
            r#"{"installed":{"client_id":"id","client_secret":"secret","auth_uri":"https://accounts.google.com/o/oauth2/auth","token_uri":"https://oauth2.googleapis.com/token"}}"#,
        )
        .unwrap();
        path
    }

    fn harness(dir: &Path, with_secret: bool) -> Harness {
        let secret_path = if with_secret {
            write_client_secret(dir)
        } else {
            dir.join("credentials.json")
        };
        let token_path = dir.join("token.json");
        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let consent_calls = Arc::new(AtomicUsize::new(0));
        let broker = FakeBroker {
            refresh_calls: Arc::clone(&refresh_calls),
            consent_calls: Arc::clone(&consent_calls),
        };
        Harness {
            service: AuthService::new(secret_path, token_path.clone(), scopes(), broker),
            refresh_calls,
            consent_calls,
            token_path,
        }
    }

    fn cached_token(expiry_offset: i64, refresh_token: Option<&str>, scopes: Vec<String>) -> StoredToken {
        StoredToken {
            access_token: "cached".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expiry_timestamp: Utc::now().timestamp() + expiry_offset,
            token_type: "Bearer".to_string(),
            scopes,
        }
    }

    fn write_token(path: &Path, token: &StoredToken) {
        std::fs::write(path, serde_json::to_string(token).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn valid_cached_token_skips_broker() {
        let tmp = tempfile::TempDir::new().unwrap();
        let h = harness(tmp.path(), true);
        write_token(&h.token_path, &cached_token(3600, Some("rt0"), scopes()));

        let token = h.service.load().await.unwrap();

        assert_eq!(token.access_token, "cached");
        assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.consent_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_refreshes_once_and_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let h = harness(tmp.path(), true);
        write_token(&h.token_path, &cached_token(-10, Some("rt0"), scopes()));

        let token = h.service.load().await.unwrap();

        assert_eq!(token.access_token, "refreshed");
        // The endpoint omitted a refresh token, so the old one is kept.
        assert_eq!(token.refresh_token.as_deref(), Some("rt0"));
        assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.consent_calls.load(Ordering::SeqCst), 0);

        // The refreshed token was written back before returning.
        let on_disk: StoredToken =
            serde_json::from_str(&std::fs::read_to_string(&h.token_path).unwrap()).unwrap();
        assert_eq!(on_disk.access_token, "refreshed");
        assert_eq!(on_disk.refresh_token.as_deref(), Some("rt0"));
    }

    #[tokio::test]
    async fn missing_cache_runs_consent_flow_and_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let h = harness(tmp.path(), true);

        let token = h.service.load().await.unwrap();

        assert_eq!(token.access_token, "fresh");
        assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.consent_calls.load(Ordering::SeqCst), 1);
        assert!(h.token_path.exists());
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_reconsents() {
        let tmp = tempfile::TempDir::new().unwrap();
        let h = harness(tmp.path(), true);
        write_token(&h.token_path, &cached_token(-10, None, scopes()));

        let token = h.service.load().await.unwrap();

        assert_eq!(token.access_token, "fresh");
        assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.consent_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scope_mismatch_forces_new_consent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let h = harness(tmp.path(), true);
        let narrow = vec!["https://www.googleapis.com/auth/drive.readonly".to_string()];
        write_token(&h.token_path, &cached_token(3600, Some("rt0"), narrow));

        let token = h.service.load().await.unwrap();

        assert_eq!(token.access_token, "fresh");
        assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.consent_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_client_secret_is_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let h = harness(tmp.path(), false);
        write_token(&h.token_path, &cached_token(3600, Some("rt0"), scopes()));

        let err = h.service.load().await.unwrap_err();

        assert!(matches!(err, AuthError::MissingClientSecret(_)));
        assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.consent_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn token_expiry_checks() {
        let token = StoredToken::from_token_set(
            TokenSet {
                access_token: "access".to_string(),
                refresh_token: Some("refresh".to_string()),
                expires_in: 3600,
            },
            &scopes(),
        );

        assert!(!token.is_expired());
        assert!(token.expires_within(4000));
        assert!(!token.expires_within(3000));
        assert_eq!(token.token_type, "Bearer");
    }

    #[test]
    fn token_scope_coverage() {
        let token = cached_token(3600, None, scopes());
        assert!(token.covers_scopes(&scopes()));
        assert!(!token.covers_scopes(&[
            "https://www.googleapis.com/auth/script.projects".to_string()
        ]));
        assert!(token.covers_scopes(&[]));
    }

    #[test]
    fn stored_token_roundtrips_through_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("token.json");
        let token = cached_token(3600, Some("rt0"), scopes());
        write_token(&path, &token);

        let reloaded: StoredToken =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded, token);
    }
}
