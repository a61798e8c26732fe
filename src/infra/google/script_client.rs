use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::pipeline::{ApiError, ScriptFile, ScriptsApi};
use crate::infra::google::{authorized_client, check_status};

const SCRIPT_BASE_URL: &str = "https://script.googleapis.com/v1";

/// Minimal Apps Script REST client: project creation and wholesale content
/// replacement.
pub struct ScriptClient {
    client: Client,
    base_url: String,
}

impl ScriptClient {
    pub fn new(access_token: &str) -> Result<Self, ApiError> {
        Ok(Self {
            client: authorized_client(access_token)?,
            base_url: SCRIPT_BASE_URL.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectBody {
    title: String,
    /// Id of the spreadsheet the project is bound to.
    parent_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptProject {
    script_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContentBody {
    files: Vec<ContentFile>,
}

#[derive(Debug, Serialize)]
struct ContentFile {
    name: String,
    #[serde(rename = "type")]
    file_type: &'static str,
    source: String,
}

fn content_body(files: &[ScriptFile]) -> ContentBody {
    ContentBody {
        files: files
            .iter()
            .map(|file| ContentFile {
                name: file.name.clone(),
                file_type: file.kind.as_api_str(),
                source: file.source.clone(),
            })
            .collect(),
    }
}

#[async_trait]
impl ScriptsApi for ScriptClient {
    async fn create_bound_project(
        &self,
        title: &str,
        parent_id: &str,
    ) -> Result<String, ApiError> {
        let url = format!("{}/projects", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CreateProjectBody {
                title: title.to_string(),
                parent_id: parent_id.to_string(),
            })
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let response = check_status(response).await?;

        let project: ScriptProject = response
            .json()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        project.script_id.ok_or_else(|| ApiError::Api {
            status: 200,
            message: "response missing scriptId".to_string(),
        })
    }

    async fn update_content(
        &self,
        script_id: &str,
        files: &[ScriptFile],
    ) -> Result<(), ApiError> {
        let url = format!("{}/projects/{}/content", self.base_url, script_id);
        let response = self
            .client
            .put(&url)
            .json(&content_body(files))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::ScriptFileKind;

    #[test]
    fn test_create_project_body_uses_camel_case() {
        let body = CreateProjectBody {
            title: "Embedded Script".to_string(),
            parent_id: "ss-1".to_string(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"title":"Embedded Script","parentId":"ss-1"}"#);
    }

    #[test]
    fn test_content_body_maps_file_kinds() {
        let files = vec![
            ScriptFile {
                name: "Code".to_string(),
                kind: ScriptFileKind::ServerJs,
                source: "function onOpen() {}".to_string(),
            },
            ScriptFile {
                name: "appsscript".to_string(),
                kind: ScriptFileKind::Json,
                source: r#"{"timeZone": "Europe/Moscow", "exceptionLogging": "CLOUD"}"#
                    .to_string(),
            },
        ];
        let json = serde_json::to_value(&content_body(&files)).unwrap();

        assert_eq!(json["files"][0]["name"], "Code");
        assert_eq!(json["files"][0]["type"], "SERVER_JS");
        assert_eq!(json["files"][1]["name"], "appsscript");
        assert_eq!(json["files"][1]["type"], "JSON");
        assert!(json["files"][1]["source"]
            .as_str()
            .unwrap()
            .contains("Europe/Moscow"));
    }

    #[test]
    fn test_script_project_deserialization() {
        let project: ScriptProject =
            serde_json::from_str(r#"{"scriptId":"script-1","title":"Embedded Script"}"#).unwrap();
        assert_eq!(project.script_id.as_deref(), Some("script-1"));
    }
}
