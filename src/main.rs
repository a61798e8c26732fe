// This is the entry point of the order-automation pipeline.
//
// **Architecture Overview:**
// - `core/` = Business logic (API-agnostic): credential loading, workflow driver
// - `infra/` = Implementations of core traits (Google REST clients, OAuth broker)
//
// This file's job is to:
// 1. Load configuration
// 2. Wire services together (dependency injection)
// 3. Run the pipeline and report the outcome

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with a pair of mod.rs files that both look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use anyhow::Context;

use crate::core::auth::AuthService;
use crate::core::pipeline::{PipelineConfig, PipelineOutcome, PipelineService};
use crate::infra::auth::GoogleOauthBroker;
use crate::infra::google::{DriveClient, ScriptClient, SheetsClient};

/// Permission grants requested for the run: spreadsheet editing, Drive file
/// management and script project management.
const SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/script.projects",
];

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

async fn run() -> anyhow::Result<()> {
    let token_cache =
        std::env::var("TOKEN_CACHE_PATH").unwrap_or_else(|_| "token.json".to_string());
    let client_secret =
        std::env::var("CLIENT_SECRET_PATH").unwrap_or_else(|_| "credentials.json".to_string());
    // NON_INTERACTIVE=true turns the consent flow into a fail-fast
    // "authorization required" error instead of opening a browser.
    let interactive = !env_flag("NON_INTERACTIVE", false);

    let mut config = PipelineConfig::default();
    if let Ok(id) = std::env::var("PRESENTATION_SOURCE_ID") {
        config.presentation_source_id = id;
    }
    if let Ok(path) = std::env::var("SCRIPT_SOURCE_PATH") {
        config.script_source_path = path.into();
    }
    config.synthesize_missing_assets = env_flag("SYNTHESIZE_MISSING_ASSETS", true);

    // A missing user script aborts before any remote traffic, including a
    // token refresh. The driver re-checks when it reads the file.
    if !config.script_source_path.exists() {
        println!(
            "Error: script file {} not found! Create it and paste your code there.",
            config.script_source_path.display()
        );
        return Ok(());
    }

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let scopes: Vec<String> = SCOPES.iter().map(|s| s.to_string()).collect();
    let auth = AuthService::new(
        client_secret,
        token_cache,
        scopes,
        GoogleOauthBroker::new(interactive),
    );
    let token = auth
        .load()
        .await
        .context("Failed to load Google credentials")?;

    let sheets =
        SheetsClient::new(&token.access_token).context("Failed to build Sheets client")?;
    let drive = DriveClient::new(&token.access_token).context("Failed to build Drive client")?;
    let scripts =
        ScriptClient::new(&token.access_token).context("Failed to build Apps Script client")?;

    let pipeline = PipelineService::new(config, sheets, drive, scripts);
    match pipeline.run().await? {
        PipelineOutcome::Completed(report) => {
            println!("{}", "-".repeat(30));
            println!("DONE!");
            println!("Spreadsheet: {}", report.spreadsheet_url());
            println!("Script embedded. To check, open the spreadsheet -> Extensions -> Apps Script.");
        }
        PipelineOutcome::AbortedMissingScript { path } => {
            println!(
                "Error: script file {} not found! Create it and paste your code there.",
                path.display()
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    if let Err(e) = run().await {
        tracing::error!("Run failed: {e:#}");
        eprintln!("Run failed: {e:#}");
        std::process::exit(1);
    }
}
