use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::pipeline::{ApiError, DriveApi};
use crate::infra::google::{authorized_client, check_status};

const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const MULTIPART_BOUNDARY: &str = "order_automation_upload";

/// Minimal Drive REST client covering the upload and copy calls.
pub struct DriveClient {
    client: Client,
    base_url: String,
    upload_url: String,
}

impl DriveClient {
    pub fn new(access_token: &str) -> Result<Self, ApiError> {
        Ok(Self {
            client: authorized_client(access_token)?,
            base_url: DRIVE_BASE_URL.to_string(),
            upload_url: DRIVE_UPLOAD_URL.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct FileMetadata {
    name: String,
}

#[derive(Debug, Serialize)]
struct CopyBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: Option<String>,
}

/// Drive's simple upload wants a `multipart/related` body (JSON metadata
/// part followed by the media part), which reqwest's form-data multipart
/// support cannot produce, so it is assembled by hand.
fn multipart_related_body(metadata_json: &str, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata_json}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{MULTIPART_BOUNDARY}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

fn extract_id(file: DriveFile) -> Result<String, ApiError> {
    file.id.ok_or_else(|| ApiError::Api {
        status: 200,
        message: "response missing file id".to_string(),
    })
}

#[async_trait]
impl DriveApi for DriveClient {
    async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        mime_type: &str,
    ) -> Result<String, ApiError> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::Transport(format!("read {}: {}", path.display(), e)))?;
        let metadata = serde_json::to_string(&FileMetadata {
            name: name.to_string(),
        })
        .map_err(|e| ApiError::Transport(e.to_string()))?;

        let response = self
            .client
            .post(&self.upload_url)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                "Content-Type",
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(multipart_related_body(&metadata, mime_type, &content))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let response = check_status(response).await?;

        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        extract_id(file)
    }

    async fn copy_file(&self, source_id: &str, new_title: &str) -> Result<String, ApiError> {
        let url = format!("{}/files/{}/copy", self.base_url, source_id);
        let response = self
            .client
            .post(&url)
            .json(&CopyBody {
                name: new_title.to_string(),
            })
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let response = check_status(response).await?;

        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        extract_id(file)
    }
}
