//! Strata CLI: drive the cascade against a local SQLite database.
//!
//! Usage:
//!   strata project <add|list> [--db path]
//!   strata upload <add|list|delete> [--db path]
//!   strata analyze <upload-id> [--summary] [--forecast]
//!   strata sync <project-id> [--full]
//!   strata can <tier> <capability>

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use strata::{
    AnalyzeOptions, Level, NewUpload, OpenService, Project, ProjectId, ResourceService,
    SqliteService, StageOutcome, StrataConfig, SubprocessAnalyzer, SyncMode, SyncSession,
    TierToken, UploadId, UploadSource,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Cascading resource synchronizer for project-scoped sentiment analyses"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Tier token to act with (overrides the config)
    #[arg(long, global = true)]
    tier: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Manage uploads
    Upload {
        #[command(subcommand)]
        action: UploadAction,
    },
    /// Run the sentiment engine on an upload
    Analyze {
        upload_id: String,
        /// Also produce a summary
        #[arg(long)]
        summary: bool,
        /// Also produce a forecast (days; defaults to the configured period)
        #[arg(long, num_args = 0..=1, default_missing_value = "0")]
        forecast: Option<u32>,
    },
    /// Run the cascade for a project and report each level
    Sync {
        project_id: String,
        /// Refetch every level
        #[arg(long)]
        full: bool,
    },
    /// Check whether a tier may use a capability
    Can { tier: String, capability: String },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project
    Add { name: String },
    /// List projects
    List,
}

#[derive(Subcommand)]
enum UploadAction {
    /// Submit text to a project
    Add {
        project_id: String,
        text: String,
        /// manual, newsapi, brightdata or newsdata
        #[arg(long, default_value = "manual")]
        source: String,
        /// JSON object stored with the upload
        #[arg(long)]
        metadata: Option<String>,
    },
    /// List a project's uploads
    List { project_id: String },
    /// Delete an upload
    Delete { upload_id: String },
}

struct App {
    config: StrataConfig,
    service: Arc<SqliteService>,
    session: SyncSession,
}

fn open_app(cli: &Cli, config: StrataConfig) -> Result<App, String> {
    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let service = Arc::new(
        SqliteService::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?,
    );
    let analyzer = SubprocessAnalyzer::new(service.clone(), config.analyzer.command.clone())
        .with_args(config.analyzer.args.clone())
        .with_timeout(config.analyzer.timeout());
    let token = cli
        .tier
        .as_deref()
        .map(TierToken::from)
        .unwrap_or_else(|| config.tier.clone());
    // The CLI never changes tier mid-run; the receiver keeps the last value.
    let (_tier_tx, tier_rx) = watch::channel(token);
    let session =
        SyncSession::new(service.clone(), Arc::new(analyzer), tier_rx).with_limits(config.limits());
    Ok(App {
        config,
        service,
        session,
    })
}

/// Load the project and make it the session root.
async fn enter_project(app: &App, project_id: &str) -> Result<Project, String> {
    let id = ProjectId::from(project_id);
    let project = app
        .service
        .get_project(&id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("project '{}' not found", project_id))?;
    if !project.active {
        return Err(format!("project '{}' is inactive", project_id));
    }
    app.session.select_project(Some(project.clone())).await;
    Ok(project)
}

fn cmd_project_add(app: &App, name: &str) -> i32 {
    let project = Project::new(name);
    match app.service.save_project(&project) {
        Ok(()) => {
            println!("Created project '{}' ({})", name, project.id);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_project_list(app: &App) -> i32 {
    let projects = match app.service.list_projects() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if projects.is_empty() {
        println!("No projects defined.");
        return 0;
    }
    println!("{:<36}  {:<24}  {:>6}", "ID", "NAME", "ACTIVE");
    println!("{}", "-".repeat(70));
    for project in projects {
        println!("{:<36}  {:<24}  {:>6}", project.id.as_str(), project.name, project.active);
    }
    0
}

async fn cmd_upload_add(
    app: &App,
    project_id: &str,
    text: &str,
    source: &str,
    metadata: Option<&str>,
) -> i32 {
    let source: UploadSource = match source.parse() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let project = match enter_project(app, project_id).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let mut upload = NewUpload::new(project.id, source, text);
    if let Some(raw) = metadata {
        match serde_json::from_str(raw) {
            Ok(value) => upload = upload.with_metadata(value),
            Err(e) => {
                eprintln!("Error: metadata is not valid JSON: {}", e);
                return 1;
            }
        }
    }
    match app.session.create_upload(upload).await {
        Ok(outcome) => {
            println!("Created upload {}", outcome.value.id);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_upload_list(app: &App, project_id: &str) -> i32 {
    if let Err(e) = enter_project(app, project_id).await {
        eprintln!("Error: {}", e);
        return 1;
    }
    let snapshot = app.session.snapshot();
    if snapshot.uploads.is_empty() {
        println!("No uploads.");
        return 0;
    }
    println!("{:<36}  {:<10}  {:>9}  {}", "ID", "SOURCE", "PROCESSED", "TEXT");
    println!("{}", "-".repeat(90));
    for upload in &snapshot.uploads {
        let preview: String = upload.raw_text.chars().take(30).collect();
        println!(
            "{:<36}  {:<10}  {:>9}  {}",
            upload.id.as_str(), upload.source.as_str(), upload.processed, preview
        );
    }
    0
}

async fn cmd_upload_delete(app: &App, upload_id: &str) -> i32 {
    let id = UploadId::from(upload_id);
    // Root the session at the owner so the delete re-syncs it
    if let Ok(Some(upload)) = app.service.get_upload(&id).await {
        if let Err(e) = enter_project(app, upload.project_id.as_str()).await {
            eprintln!("Error: {}", e);
            return 1;
        }
    }
    match app.session.delete_upload(&id).await {
        Ok(_) => {
            println!("Deleted upload {}", upload_id);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_analyze(app: &App, upload_id: &str, summary: bool, forecast: Option<u32>) -> i32 {
    let id = UploadId::from(upload_id);
    match app.service.get_upload(&id).await {
        Ok(Some(upload)) => {
            if let Err(e) = enter_project(app, upload.project_id.as_str()).await {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
        Ok(None) => {
            eprintln!("Error: upload '{}' not found", upload_id);
            return 1;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    }

    let mut options = AnalyzeOptions::default();
    if summary {
        options = options.with_summary();
    }
    if let Some(days) = forecast {
        let days = if days == 0 { app.config.forecast_period } else { days };
        options = options.with_forecast(days);
    }

    match app.session.request_analysis(&id, options).await {
        Ok(outcome) => {
            let a = &outcome.value.analysis;
            println!(
                "Analysis {}: {} ({:.2}), dialect {} ({:.2})",
                a.id, a.sentiment, a.sentiment_score, a.dialect, a.dialect_confidence
            );
            if let Some(s) = &outcome.value.summary {
                println!("Summary: {}", s.summary_text);
            }
            if let Some(f) = &outcome.value.forecast {
                println!("Forecast: {} points over {} days", f.forecast_json.forecast.len(), f.forecast_period);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_sync(app: &App, project_id: &str, full: bool) -> i32 {
    if let Err(e) = enter_project(app, project_id).await {
        eprintln!("Error: {}", e);
        return 1;
    }
    let mode = if full { SyncMode::Full } else { SyncMode::Incremental };
    let report = match app.session.refresh(mode).await {
        Some(r) => r,
        None => {
            eprintln!("Error: project '{}' is not active", project_id);
            return 1;
        }
    };
    let snapshot = app.session.snapshot();
    println!("{:<10}  {:>7}  {}", "LEVEL", "RECORDS", "OUTCOME");
    println!("{}", "-".repeat(40));
    for level in Level::ALL {
        let outcome = match report.outcome(level) {
            StageOutcome::Committed { .. } => "fetched".to_string(),
            StageOutcome::Unchanged => "unchanged".to_string(),
            StageOutcome::EmptyParent => "empty parent".to_string(),
            StageOutcome::Superseded => "superseded".to_string(),
            StageOutcome::Failed(e) => format!("failed: {}", e),
            StageOutcome::NotReached => "not reached".to_string(),
            StageOutcome::Inactive => "inactive".to_string(),
        };
        println!("{:<10}  {:>7}  {}", level.as_str(), snapshot.len(level), outcome);
    }
    if report.is_complete() {
        0
    } else {
        1
    }
}

fn cmd_can(tier: &str, capability: &str) -> i32 {
    if strata::can_perform(tier, capability) {
        println!("yes: '{}' may use {}", tier, capability);
    } else {
        println!("no: '{}' may not use {}", tier, capability);
    }
    0
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Can { tier, capability } = &cli.command {
        std::process::exit(cmd_can(tier, capability));
    }

    let config = match StrataConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config.log_filter);

    let app = match open_app(&cli, config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match &cli.command {
        Commands::Project { action } => match action {
            ProjectAction::Add { name } => cmd_project_add(&app, name),
            ProjectAction::List => cmd_project_list(&app),
        },
        Commands::Upload { action } => match action {
            UploadAction::Add {
                project_id,
                text,
                source,
                metadata,
            } => cmd_upload_add(&app, project_id, text, source, metadata.as_deref()).await,
            UploadAction::List { project_id } => cmd_upload_list(&app, project_id).await,
            UploadAction::Delete { upload_id } => cmd_upload_delete(&app, upload_id).await,
        },
        Commands::Analyze {
            upload_id,
            summary,
            forecast,
        } => cmd_analyze(&app, upload_id, *summary, *forecast).await,
        Commands::Sync { project_id, full } => cmd_sync(&app, project_id, *full).await,
        Commands::Can { .. } => 0,
    };
    std::process::exit(code);
}
