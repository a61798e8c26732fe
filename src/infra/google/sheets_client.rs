use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::pipeline::{ApiError, SpreadsheetsApi};
use crate::infra::google::{authorized_client, check_status};

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";

/// Minimal Sheets REST client. It deliberately exposes only the calls the
/// core layer needs.
pub struct SheetsClient {
    client: Client,
    base_url: String,
}

impl SheetsClient {
    pub fn new(access_token: &str) -> Result<Self, ApiError> {
        Ok(Self {
            client: authorized_client(access_token)?,
            base_url: SHEETS_BASE_URL.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct SpreadsheetBody {
    properties: SpreadsheetProperties,
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Serialize)]
struct SpreadsheetProperties {
    title: String,
}

#[derive(Debug, Serialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Serialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSpreadsheet {
    spreadsheet_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValueRangeBody {
    values: Vec<Vec<String>>,
}

fn spreadsheet_body(title: &str, tabs: &[String]) -> SpreadsheetBody {
    SpreadsheetBody {
        properties: SpreadsheetProperties {
            title: title.to_string(),
        },
        sheets: tabs
            .iter()
            .map(|tab| SheetEntry {
                properties: SheetProperties { title: tab.clone() },
            })
            .collect(),
    }
}

#[async_trait]
impl SpreadsheetsApi for SheetsClient {
    async fn create_spreadsheet(&self, title: &str, tabs: &[String]) -> Result<String, ApiError> {
        let url = format!("{}/spreadsheets", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&spreadsheet_body(title, tabs))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let response = check_status(response).await?;

        let created: CreatedSpreadsheet = response
            .json()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        created.spreadsheet_id.ok_or_else(|| ApiError::Api {
            status: 200,
            message: "response missing spreadsheetId".to_string(),
        })
    }

    async fn write_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), ApiError> {
        // The range lands in the URL path ("Data!A1"), so it gets encoded.
        let url = format!(
            "{}/spreadsheets/{}/values/{}",
            self.base_url,
            spreadsheet_id,
            urlencoding::encode(range)
        );
        let body = ValueRangeBody {
            values: rows.to_vec(),
        };
        let response = self
            .client
            .put(&url)
            .query(&[("valueInputOption", "RAW")])
            .json(&body)
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

    #[test]
    fn test_spreadsheet_body_serialization() {
        let tabs = vec![
            "Data".to_string(),
            "Settings".to_string(),
            "Logs".to_string(),
        ];
        let body = spreadsheet_body("Order: Automation", &tabs);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["properties"]["title"], "Order: Automation");
        assert_eq!(json["sheets"].as_array().unwrap().len(), 3);
        assert_eq!(json["sheets"][0]["properties"]["title"], "Data");
        assert_eq!(json["sheets"][2]["properties"]["title"], "Logs");
    }

    #[test]
    fn test_created_spreadsheet_deserialization() {
        let created: CreatedSpreadsheet =
            serde_json::from_str(r#"{"spreadsheetId":"abc123","spreadsheetUrl":"ignored"}"#)
                .unwrap();
        assert_eq!(created.spreadsheet_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_value_range_body_serialization() {
        let body = ValueRangeBody {
            values: vec![vec!["a".to_string(), "b".to_string()]],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"values":[["a","b"]]}"#);
    }

    #[test]
    fn test_range_is_url_encoded() {
        assert_eq!(urlencoding::encode("Data!A1"), "Data%21A1");
    }
}
