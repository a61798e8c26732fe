use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Sentinel left in place until a real presentation id is configured.
pub const PRESENTATION_PLACEHOLDER: &str = "INSERT_YOUR_PRES_ID_HERE";

/// Errors raised by the remote API seams.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP transport error: {0}")]
    Transport(String),
    #[error("Google API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Workflow step names, used to report which remote call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateSpreadsheet,
    UploadScreenshots,
    CopyPresentation,
    WriteTable,
    InjectScript,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::CreateSpreadsheet => "Spreadsheet creation",
            Step::UploadScreenshots => "Screenshot upload",
            Step::CopyPresentation => "Presentation copy",
            Step::WriteTable => "Table write",
            Step::InjectScript => "Script injection",
        };
        f.write_str(name)
    }
}

/// Errors that can abort a pipeline run. Every remote call is wrapped with
/// the step it belongs to; the driver aborts on the first remote failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{step} failed: {source}")]
    Remote {
        step: Step,
        #[source]
        source: ApiError,
    },
    #[error("Missing local asset: {0}")]
    MissingAsset(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of file inside an Apps Script project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFileKind {
    ServerJs,
    Json,
}

impl ScriptFileKind {
    /// Wire name used by the Apps Script API.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            ScriptFileKind::ServerJs => "SERVER_JS",
            ScriptFileKind::Json => "JSON",
        }
    }
}

/// One file of an Apps Script project, independent of any HTTP types.
#[derive(Debug, Clone)]
pub struct ScriptFile {
    pub name: String,
    pub kind: ScriptFileKind,
    pub source: String,
}

#[async_trait]
pub trait SpreadsheetsApi {
    /// Create a spreadsheet with the given named tabs and return its id.
    async fn create_spreadsheet(&self, title: &str, tabs: &[String]) -> Result<String, ApiError>;

    /// Write rows into the given A1 range with RAW value input.
    async fn write_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), ApiError>;
}

#[async_trait]
pub trait DriveApi {
    /// Upload a local file and return the assigned file id.
    async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        mime_type: &str,
    ) -> Result<String, ApiError>;

    /// Copy an existing file under a new title and return the copy's id.
    async fn copy_file(&self, source_id: &str, new_title: &str) -> Result<String, ApiError>;
}

#[async_trait]
pub trait ScriptsApi {
    /// Create a script project bound to the given spreadsheet.
    async fn create_bound_project(&self, title: &str, parent_id: &str)
        -> Result<String, ApiError>;

    /// Overwrite the project content wholesale.
    async fn update_content(&self, script_id: &str, files: &[ScriptFile])
        -> Result<(), ApiError>;
}

/// Everything the driver needs, spelled out so nothing hides in globals.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub spreadsheet_title: String,
    pub tab_names: Vec<String>,
    pub screenshot_files: Vec<PathBuf>,
    pub screenshot_mime_type: String,
    pub presentation_source_id: String,
    pub presentation_placeholder: String,
    pub presentation_skip_label: String,
    pub presentation_copy_title: String,
    pub script_source_path: PathBuf,
    pub script_project_title: String,
    pub script_manifest: String,
    pub table_range: String,
    /// When set, screenshots that are missing locally are written as dummy
    /// placeholder files instead of failing the run.
    pub synthesize_missing_assets: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            spreadsheet_title: "Order: Automation".to_string(),
            tab_names: vec![
                "Data".to_string(),
                "Settings".to_string(),
                "Logs".to_string(),
            ],
            screenshot_files: vec![
                "screen1.png".into(),
                "screen2.png".into(),
                "screen3.png".into(),
            ],
            screenshot_mime_type: "image/png".to_string(),
            presentation_source_id: PRESENTATION_PLACEHOLDER.to_string(),
            presentation_placeholder: PRESENTATION_PLACEHOLDER.to_string(),
            presentation_skip_label: "no_id".to_string(),
            presentation_copy_title: "Customer Presentation Copy".to_string(),
            script_source_path: "my_script.gs".into(),
            script_project_title: "Embedded Script".to_string(),
            script_manifest: r#"{"timeZone": "Europe/Moscow", "exceptionLogging": "CLOUD"}"#
                .to_string(),
            table_range: "Data!A1".to_string(),
            synthesize_missing_assets: true,
        }
    }
}

/// How a run ended short of an error.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(PipelineReport),
    /// The user script file was absent; nothing was created remotely.
    AbortedMissingScript { path: PathBuf },
}

/// Identifiers collected over a completed run.
#[derive(Debug)]
pub struct PipelineReport {
    pub spreadsheet_id: String,
    pub uploaded_file_ids: Vec<String>,
    pub presentation_id: Option<String>,
    pub script_id: String,
}

impl PipelineReport {
    pub fn spreadsheet_url(&self) -> String {
        format!(
            "https://docs.google.com/spreadsheets/d/{}",
            self.spreadsheet_id
        )
    }
}

/// Drives the six workflow steps in fixed order, threading each step's ids
/// into the next. Strictly sequential; no retries, no rollback of resources
/// already created when a later step fails.
pub struct PipelineService<S, D, G>
where
    S: SpreadsheetsApi,
    D: DriveApi,
    G: ScriptsApi,
{
    config: PipelineConfig,
    sheets: S,
    drive: D,
    scripts: G,
}

impl<S, D, G> PipelineService<S, D, G>
where
    S: SpreadsheetsApi,
    D: DriveApi,
    G: ScriptsApi,
{
    pub fn new(config: PipelineConfig, sheets: S, drive: D, scripts: G) -> Self {
        Self {
            config,
            sheets,
            drive,
            scripts,
        }
    }

    pub async fn run(&self) -> Result<PipelineOutcome, PipelineError> {
        // The user script must be readable before anything is created
        // remotely, so a half-configured setup leaves no cloud resources.
        let user_source = match std::fs::read_to_string(&self.config.script_source_path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PipelineOutcome::AbortedMissingScript {
                    path: self.config.script_source_path.clone(),
                });
            }
            Err(e) => return Err(PipelineError::Io(e)),
        };
        println!(
            "User script read from {}.",
            self.config.script_source_path.display()
        );

        println!("Creating the spreadsheet and its tabs...");
        let spreadsheet_id = self
            .sheets
            .create_spreadsheet(&self.config.spreadsheet_title, &self.config.tab_names)
            .await
            .map_err(|source| PipelineError::Remote {
                step: Step::CreateSpreadsheet,
                source,
            })?;
        println!("Spreadsheet created. ID: {spreadsheet_id}");
        tracing::info!(%spreadsheet_id, "spreadsheet created");

        println!("Uploading screenshots...");
        let uploaded_file_ids = self.upload_screenshots().await?;

        println!("Copying the presentation...");
        let presentation_id =
            if self.config.presentation_source_id == self.config.presentation_placeholder {
                println!("No presentation ID configured. Skipping this step for the test run.");
                None
            } else {
                let id = self
                    .drive
                    .copy_file(
                        &self.config.presentation_source_id,
                        &self.config.presentation_copy_title,
                    )
                    .await
                    .map_err(|source| PipelineError::Remote {
                        step: Step::CopyPresentation,
                        source,
                    })?;
                tracing::info!(presentation_id = %id, "presentation copied");
                Some(id)
            };

        println!("Filling the data table...");
        let presentation_label = presentation_id
            .clone()
            .unwrap_or_else(|| self.config.presentation_skip_label.clone());
        let rows = self.build_table_rows(&uploaded_file_ids, &presentation_label);
        self.sheets
            .write_values(&spreadsheet_id, &self.config.table_range, &rows)
            .await
            .map_err(|source| PipelineError::Remote {
                step: Step::WriteTable,
                source,
            })?;

        println!("Embedding the Apps Script project...");
        let script_id = self
            .scripts
            .create_bound_project(&self.config.script_project_title, &spreadsheet_id)
            .await
            .map_err(|source| PipelineError::Remote {
                step: Step::InjectScript,
                source,
            })?;
        let files = vec![
            ScriptFile {
                name: "Code".to_string(),
                kind: ScriptFileKind::ServerJs,
                source: user_source,
            },
            ScriptFile {
                name: "appsscript".to_string(),
                kind: ScriptFileKind::Json,
                source: self.config.script_manifest.clone(),
            },
        ];
        self.scripts
            .update_content(&script_id, &files)
            .await
            .map_err(|source| PipelineError::Remote {
                step: Step::InjectScript,
                source,
            })?;
        tracing::info!(%script_id, "script project content uploaded");

        Ok(PipelineOutcome::Completed(PipelineReport {
            spreadsheet_id,
            uploaded_file_ids,
            presentation_id,
            script_id,
        }))
    }

    async fn upload_screenshots(&self) -> Result<Vec<String>, PipelineError> {
        let mut ids = Vec::with_capacity(self.config.screenshot_files.len());
        for path in &self.config.screenshot_files {
            if !path.exists() {
                if self.config.synthesize_missing_assets {
                    tracing::warn!(path = %path.display(), "screenshot missing, writing placeholder");
                    std::fs::write(path, b"dummy image")?;
                } else {
                    return Err(PipelineError::MissingAsset(path.clone()));
                }
            }
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("screenshot.png");
            let id = self
                .drive
                .upload_file(path, name, &self.config.screenshot_mime_type)
                .await
                .map_err(|source| PipelineError::Remote {
                    step: Step::UploadScreenshots,
                    source,
                })?;
            tracing::info!(file = name, file_id = %id, "screenshot uploaded");
            ids.push(id);
        }
        Ok(ids)
    }

    /// Header plus one row per screenshot plus the presentation row: always
    /// the same shape no matter which steps were skipped.
    fn build_table_rows(&self, uploaded: &[String], presentation_label: &str) -> Vec<Vec<String>> {
        let mut rows = vec![vec![
            "Stage".to_string(),
            "File ID / Link".to_string(),
            "Type".to_string(),
            "Status".to_string(),
        ]];
        for (idx, id) in uploaded.iter().enumerate() {
            rows.push(vec![
                format!("Screenshot {}", idx + 1),
                id.clone(),
                "Image".to_string(),
                "Uploaded".to_string(),
            ]);
        }
        rows.push(vec![
            "Presentation".to_string(),
            presentation_label.to_string(),
            "Google Slides".to_string(),
            "Copied".to_string(),
        ]);
        rows
    }
}
