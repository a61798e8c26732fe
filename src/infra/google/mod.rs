// Reqwest clients for the three Google REST services the pipeline talks to.

pub mod drive_client;
pub mod script_client;
pub mod sheets_client;

pub use drive_client::DriveClient;
pub use script_client::ScriptClient;
pub use sheets_client::SheetsClient;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;

use crate::core::pipeline::ApiError;

/// Build a reqwest client with the bearer token installed as a default
/// header, so every request through it is authenticated.
pub(crate) fn authorized_client(access_token: &str) -> Result<Client, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| ApiError::Transport(e.to_string()))?,
    );

    Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| ApiError::Transport(e.to_string()))
}

/// Map a non-success response to an API error carrying status and body.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Api {
        status: status.as_u16(),
        message,
    })
}
