use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;

use crate::core::auth::{AuthError, ClientSecret, OauthBroker, TokenSet};

/// How long the loopback listener waits for the browser redirect.
const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

/// OAuth broker backed by Google's token endpoint and, when allowed, a
/// loopback browser consent flow. Constructed non-interactive it fails fast
/// with an authorization-required signal instead of opening a browser.
pub struct GoogleOauthBroker {
    http: Client,
    interactive: bool,
}

impl GoogleOauthBroker {
    pub fn new(interactive: bool) -> Self {
        Self {
            http: Client::new(),
            interactive,
        }
    }

    async fn token_endpoint_post(
        &self,
        token_uri: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenSet, AuthError> {
        let response = self
            .http
            .post(token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::TokenEndpoint(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenEndpoint(e.to_string()))?;
        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }
}

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[async_trait]
impl OauthBroker for GoogleOauthBroker {
    async fn refresh(
        &self,
        client: &ClientSecret,
        refresh_token: &str,
    ) -> Result<TokenSet, AuthError> {
        self.token_endpoint_post(
            &client.installed.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", client.installed.client_id.as_str()),
                ("client_secret", client.installed.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    async fn obtain_consent(
        &self,
        client: &ClientSecret,
        scopes: &[String],
    ) -> Result<TokenSet, AuthError> {
        if !self.interactive {
            return Err(AuthError::AuthorizationRequired);
        }

        let server = tiny_http::Server::http("127.0.0.1:0")
            .map_err(|e| AuthError::Flow(format!("failed to bind loopback listener: {e}")))?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|a| a.port())
            .ok_or_else(|| AuthError::Flow("loopback listener has no port".to_string()))?;

        // Random hex state nonce for CSRF protection.
        let state: String = {
            let mut rng = rand::thread_rng();
            (0..16).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
        };
        let redirect_uri = format!("http://127.0.0.1:{port}");
        let consent_url = build_consent_url(
            &client.installed.auth_uri,
            &client.installed.client_id,
            &redirect_uri,
            scopes,
            &state,
        );

        println!("Opening browser for authorization: {consent_url}");
        if let Err(error) = open::that(&consent_url) {
            eprintln!("Failed to open browser: {error}");
            eprintln!("Open the URL above manually, then return here.");
        }

        // tiny_http's recv blocks, so the wait runs on the blocking pool.
        let code = tokio::task::spawn_blocking(move || {
            wait_for_code(server, CONSENT_TIMEOUT, state)
        })
        .await
        .map_err(|e| AuthError::Flow(format!("consent listener panicked: {e}")))??;

        self.token_endpoint_post(
            &client.installed.token_uri,
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("client_id", client.installed.client_id.as_str()),
                ("client_secret", client.installed.client_secret.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
            ],
        )
        .await
    }
}

fn build_consent_url(
    auth_uri: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
) -> String {
    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&access_type=offline&prompt=consent",
        auth_uri,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes.join(" ")),
        urlencoding::encode(state),
    )
}

/// Block until the loopback listener receives the authorization redirect.
///
/// Loops on `recv_timeout()`, ignoring requests that carry none of the
/// expected parameters (browser favicon requests, user refreshes) that would
/// otherwise cause a false failure.
fn wait_for_code(
    server: tiny_http::Server,
    timeout: Duration,
    expected_state: String,
) -> Result<String, AuthError> {
    let deadline = std::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return Err(AuthError::Flow(format!(
                "authorization timed out after {}s",
                timeout.as_secs()
            )));
        }

        let request = match server.recv_timeout(remaining) {
            Ok(Some(req)) => req,
            Ok(None) => {
                return Err(AuthError::Flow(format!(
                    "authorization timed out after {}s",
                    timeout.as_secs()
                )));
            }
            Err(e) => return Err(AuthError::Flow(format!("listener error: {e}"))),
        };

        let url = request.url().to_string();
        let Some(query) = url.split('?').nth(1) else {
            respond_html(request, "<h1>Waiting for authorization…</h1>");
            continue;
        };

        let Some(callback) = parse_callback_query(query) else {
            respond_html(request, "<h1>Waiting for authorization…</h1>");
            continue;
        };

        if let Some(error) = callback.error {
            respond_html(request, "<h1>Authorization failed</h1><p>You can close this tab.</p>");
            return Err(AuthError::Flow(format!("authorization denied: {error}")));
        }

        if callback.state.as_deref() != Some(expected_state.as_str()) {
            respond_html(request, "<h1>Authorization failed</h1><p>State mismatch.</p>");
            return Err(AuthError::Flow(
                "state mismatch in authorization redirect".to_string(),
            ));
        }

        match callback.code {
            Some(code) => {
                respond_html(
                    request,
                    "<h1>Authorized!</h1><p>You can close this tab and return to the terminal.</p>",
                );
                return Ok(code);
            }
            None => {
                respond_html(request, "<h1>Waiting for authorization…</h1>");
                continue;
            }
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Pull `code`, `state` and `error` out of the redirect query string.
/// Returns `None` when none of them are present.
fn parse_callback_query(query: &str) -> Option<CallbackQuery> {
    let mut parsed = CallbackQuery::default();
    let mut matched = false;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            let value = urlencoding::decode(value).ok()?.into_owned();
            match key {
                "code" => {
                    parsed.code = Some(value);
                    matched = true;
                }
                "state" => {
                    parsed.state = Some(value);
                    matched = true;
                }
                "error" => {
                    parsed.error = Some(value);
                    matched = true;
                }
                _ => {}
            }
        }
    }
    matched.then_some(parsed)
}

fn respond_html(request: tiny_http::Request, body: &str) {
    let response = tiny_http::Response::from_string(format!("<html><body>{body}</body></html>"))
        .with_header(tiny_http::Header::from_bytes("Content-Type", "text/html").unwrap());
    let _ = request.respond(response);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_with_code_and_state() {
        let parsed = parse_callback_query("state=abc123&code=4%2F0AbCdEf").unwrap();
        assert_eq!(parsed.code.as_deref(), Some("4/0AbCdEf"));
        assert_eq!(parsed.state.as_deref(), Some("abc123"));
        assert_eq!(parsed.error, None);
    }

    #[test]
    fn test_parse_callback_with_error() {
        let parsed = parse_callback_query("error=access_denied&state=abc123").unwrap();
        assert_eq!(parsed.error.as_deref(), Some("access_denied"));
        assert_eq!(parsed.code, None);
    }

    #[test]
    fn test_parse_callback_ignores_unrelated_queries() {
        assert_eq!(parse_callback_query("foo=bar"), None);
        assert_eq!(parse_callback_query(""), None);
    }

    #[test]
    fn test_consent_url_contents() {
        let scopes = vec![
            "https://www.googleapis.com/auth/spreadsheets".to_string(),
            "https://www.googleapis.com/auth/drive".to_string(),
        ];
        let url = build_consent_url(
            "https://accounts.google.com/o/oauth2/auth",
            "client-id",
            "http://127.0.0.1:8000",
            &scopes,
            "nonce",
        );

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?response_type=code"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A8000"));
        // Scopes are space-separated, then encoded.
        assert!(url.contains(
            "scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fspreadsheets%20https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fdrive"
        ));
        assert!(url.contains("state=nonce"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
    }

    #[tokio::test]
    async fn test_non_interactive_broker_fails_fast() {
        let broker = GoogleOauthBroker::new(false);
        let secret: ClientSecret = serde_json::from_str(
            r#"{"installed":{"client_id":"id","client_secret":"secret","auth_uri":"https://accounts.google.com/o/oauth2/auth","token_uri":"https://oauth2.googleapis.com/token"}}"#,
        )
        .unwrap();

        let err = broker
            .obtain_consent(&secret, &["scope".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationRequired));
    }
}
