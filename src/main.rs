//! hivreport - AI-assisted UNICEF HIV report generator
//!
//! Asks a language model about the prepared UNICEF HIV dataset and turns the
//! country/year it selects into a filtered Tableau dashboard link.
//!
//! ## Usage
//!
//! ### Data preparation
//! ```bash
//! hivreport prepare --input-dir Data --output unicef_hiv_tech.csv
//! ```
//!
//! ### CLI Mode
//! ```bash
//! OPENAI_API_KEY=sk-... hivreport ask --question "Which country needs support most?"
//! hivreport analyze --response answer.txt --url-mode single-param --country-field country
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! hivreport serve --port 3000
//! ```

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use hivreport::{
    dashboard::{
        DashboardConfig, DashboardUrlBuilder, UrlMode, DEFAULT_COUNTRY_FIELD, DEFAULT_DASHBOARD_URL,
        DEFAULT_REGION_FIELD, DEFAULT_YEAR_FIELD,
    },
    dataset::{Dataset, PROMPT_RECENT_YEARS, PROMPT_TOP_COUNTRIES},
    llm::{LlmConfig, OpenAiClient, DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL},
    prep,
    prompts::DEFAULT_QUESTION,
    report::{ReportOutcome, ReportPipeline},
    resolver::{Fallbacks, DEFAULT_FALLBACK_COUNTRY, DEFAULT_FALLBACK_REGION, DEFAULT_FALLBACK_YEAR},
};
use serde::Deserialize;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// AI-assisted UNICEF HIV report generator with filtered dashboard links
#[derive(Parser)]
#[command(name = "hivreport")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the model a question and build the filtered dashboard link
    Ask {
        /// Question for the HIV policy consultant (defaults to the built-in question)
        #[arg(short, long)]
        question: Option<String>,

        /// Directory to save the report (JSON and markdown)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        dashboard: DashboardArgs,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Resolve filters from a model response that was obtained elsewhere
    Analyze {
        /// File with the model response ("-" reads stdin)
        #[arg(short, long, default_value = "-")]
        response: PathBuf,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        dashboard: DashboardArgs,
    },

    /// Merge the raw UNICEF exports into the prepared dataset
    Prepare {
        /// Directory holding the three raw CSV exports
        #[arg(short, long, default_value = "Data")]
        input_dir: PathBuf,

        /// Output CSV path
        #[arg(short, long, default_value = prep::DEFAULT_OUTPUT_FILE)]
        output: PathBuf,
    },

    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        dashboard: DashboardArgs,

        #[command(flatten)]
        llm: LlmArgs,
    },
}

#[derive(Args, Clone)]
struct DataArgs {
    /// Prepared dataset CSV
    #[arg(long, env = "HIVREPORT_DATA", default_value = prep::DEFAULT_OUTPUT_FILE)]
    data: PathBuf,

    /// Country used when the model's choice is missing or unknown
    #[arg(long, default_value = DEFAULT_FALLBACK_COUNTRY)]
    fallback_country: String,

    /// Region used when the selected country has none
    #[arg(long, default_value = DEFAULT_FALLBACK_REGION)]
    fallback_region: String,

    /// Year used only when the dataset is empty
    #[arg(long, default_value_t = DEFAULT_FALLBACK_YEAR)]
    fallback_year: i32,
}

impl DataArgs {
    fn fallbacks(&self) -> Fallbacks {
        Fallbacks {
            country: self.fallback_country.clone(),
            region: self.fallback_region.clone(),
            year: self.fallback_year,
        }
    }

    /// Load the dataset and reduce it to the rows the model is shown.
    fn load_sample(&self) -> Result<Dataset> {
        let full = Dataset::load_csv(&self.data)
            .with_context(|| format!("Failed to load dataset {}", self.data.display()))?;
        Ok(full.prompt_sample(PROMPT_RECENT_YEARS, PROMPT_TOP_COUNTRIES))
    }
}

#[derive(Args, Clone)]
struct DashboardArgs {
    /// Tableau dashboard URL
    #[arg(long, env = "HIVREPORT_DASHBOARD_URL", default_value = DEFAULT_DASHBOARD_URL)]
    dashboard_url: String,

    /// Query string style
    #[arg(long, value_enum, default_value_t = UrlMode::MultiParam)]
    url_mode: UrlMode,

    /// Dashboard filter name for the country
    #[arg(long, default_value = DEFAULT_COUNTRY_FIELD)]
    country_field: String,

    /// Dashboard filter name for the year
    #[arg(long, default_value = DEFAULT_YEAR_FIELD)]
    year_field: String,

    /// Dashboard filter name for the region
    #[arg(long, default_value = DEFAULT_REGION_FIELD)]
    region_field: String,
}

impl DashboardArgs {
    fn builder(&self) -> Result<DashboardUrlBuilder> {
        let config = DashboardConfig {
            base_url: self.dashboard_url.clone(),
            mode: self.url_mode,
            country_field: self.country_field.clone(),
            year_field: self.year_field.clone(),
            region_field: self.region_field.clone(),
        };
        Ok(DashboardUrlBuilder::new(config)?)
    }
}

#[derive(Args, Clone)]
struct LlmArgs {
    /// LLM API base URL
    #[arg(long, env = "HIVREPORT_LLM_BASE_URL", default_value = DEFAULT_LLM_BASE_URL)]
    llm_base_url: String,

    /// LLM API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    llm_key: Option<String>,

    /// LLM model name
    #[arg(long, env = "HIVREPORT_LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    llm_model: String,
}

impl LlmArgs {
    fn client(&self) -> Result<OpenAiClient> {
        let config = LlmConfig::new(
            self.llm_base_url.clone(),
            self.llm_key.clone().unwrap_or_default(),
            self.llm_model.clone(),
        );
        OpenAiClient::new(config).context("Set OPENAI_API_KEY or pass --llm-key")
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; flags and real environment variables take precedence
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.log_json {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    match cli.command {
        Commands::Ask {
            question,
            output,
            json,
            data,
            dashboard,
            llm,
        } => {
            let question = question.unwrap_or_else(|| DEFAULT_QUESTION.to_string());
            run_ask(&question, output, json, &data, &dashboard, &llm).await
        }
        Commands::Analyze {
            response,
            json,
            data,
            dashboard,
        } => run_analyze(&response, json, &data, &dashboard),
        Commands::Prepare { input_dir, output } => run_prepare(&input_dir, &output),
        Commands::Serve {
            port,
            host,
            data,
            dashboard,
            llm,
        } => run_server(host, port, &data, &dashboard, &llm).await,
    }
}

// ============================================================================
// Report Commands
// ============================================================================

async fn run_ask(
    question: &str,
    output: Option<PathBuf>,
    json: bool,
    data: &DataArgs,
    dashboard: &DashboardArgs,
    llm: &LlmArgs,
) -> Result<()> {
    let sample = data.load_sample()?;
    if sample.is_empty() {
        anyhow::bail!(
            "{} has no usable rows for analysis; run `hivreport prepare` first",
            data.data.display()
        );
    }

    let urls = dashboard.builder()?;
    let pipeline = ReportPipeline::new(&sample, data.fallbacks(), &urls)?;
    let client = llm.client()?;

    println!(
        "Analyzing {} rows ({} countries) with {}...",
        sample.len(),
        sample.countries().len(),
        client.model()
    );

    let outcome = pipeline.run(&client, question).await;
    print_outcome(&outcome, &urls, json)?;

    if let Some(dir) = output {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let saved = outcome
            .save(&dir, &stamp, &urls)
            .with_context(|| format!("Failed to save report to {}", dir.display()))?;
        println!("\nSaved: {:?}", saved.json_path);
        println!("Saved: {:?}", saved.markdown_path);
    }

    if outcome.status.api_failed {
        error!("Analysis failed; check the API key and account balance");
    }
    Ok(())
}

fn run_analyze(response: &Path, json: bool, data: &DataArgs, dashboard: &DashboardArgs) -> Result<()> {
    let text = read_response(response)?;
    let sample = data.load_sample()?;
    if sample.is_empty() {
        warn!("Dataset is empty; every field will use its fallback");
    }

    let urls = dashboard.builder()?;
    let pipeline = ReportPipeline::new(&sample, data.fallbacks(), &urls)?;
    let outcome = pipeline.analyze(text);
    print_outcome(&outcome, &urls, json)
}

fn read_response(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read response from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn print_outcome(outcome: &ReportOutcome, urls: &DashboardUrlBuilder, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    println!("\n--- Draft Report ---\n");
    println!("{}", outcome.display_text);
    println!("\n--- Dashboard Filters ---\n");
    print!("{}", outcome.filter_summary(urls));
    Ok(())
}

// ============================================================================
// Data Preparation
// ============================================================================

fn run_prepare(input_dir: &Path, output: &Path) -> Result<()> {
    let summary = prep::prepare(input_dir, output)
        .with_context(|| format!("Failed to prepare dataset from {}", input_dir.display()))?;

    for file in &summary.skipped_files {
        println!("Skipped (could not load): {}", input_dir.join(file).display());
    }
    println!(
        "\n✓ Wrote {} rows with {} columns to {}",
        summary.rows,
        summary.columns.len(),
        summary.output.display()
    );
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(
    host: String,
    port: u16,
    data: &DataArgs,
    dashboard: &DashboardArgs,
    llm: &LlmArgs,
) -> Result<()> {
    let dataset = data.load_sample()?;
    let urls = dashboard.builder()?;
    let fallbacks = data.fallbacks();

    let client = match llm.client() {
        Ok(client) => Some(client),
        Err(e) => {
            warn!(error = %e, "LLM client unavailable; /report is disabled");
            None
        }
    };

    info!(host = %host, port = port, rows = dataset.len(), "Starting HTTP server");

    let app_state = Arc::new(AppState::new(dataset, fallbacks, urls, client)?);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/report", post(report_handler))
        .route("/analyze", post(analyze_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

/// Read-only state shared by all requests
struct AppState {
    pipeline: ReportPipeline<'static>,
    client: Option<OpenAiClient>,
}

impl AppState {
    /// The dataset and URL builder live until the process exits, so the
    /// pipeline (resolver and tag matchers included) is built once here.
    fn new(
        dataset: Dataset,
        fallbacks: Fallbacks,
        urls: DashboardUrlBuilder,
        client: Option<OpenAiClient>,
    ) -> Result<Self> {
        let dataset: &'static Dataset = Box::leak(Box::new(dataset));
        let urls: &'static DashboardUrlBuilder = Box::leak(Box::new(urls));
        let pipeline = ReportPipeline::new(dataset, fallbacks, urls)?;
        Ok(Self { pipeline, client })
    }
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Report request body
#[derive(Debug, Deserialize)]
struct ReportRequest {
    #[serde(default)]
    question: Option<String>,
}

/// Analyze request body
#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    response: String,
}

/// Ask the model and return the full outcome
async fn report_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ReportOutcome>, (StatusCode, String)> {
    let Some(client) = state.client.as_ref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "LLM API key is not configured".to_string(),
        ));
    };

    let question = req
        .question
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_QUESTION.to_string());
    info!(question_len = question.len(), "Report request");

    let outcome = state.pipeline.run(client, &question).await;
    if outcome.status.api_failed {
        error!("Completion failed for report request");
    }
    Ok(Json(outcome))
}

/// Resolve filters for a caller-supplied model response
async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Json<ReportOutcome> {
    Json(state.pipeline.analyze(req.response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivreport::dataset::Record;

    fn record(country: &str, year: i32) -> Record {
        Record {
            country: country.to_string(),
            year,
            unicef_region: Some("Eastern and Southern Africa".to_string()),
            plhiv_0_19: Some(1000.0),
            ..Default::default()
        }
    }

    fn state() -> Arc<AppState> {
        let dataset = Dataset::from_records(vec![record("Kenya", 2022), record("South Africa", 2023)]);
        let urls = DashboardUrlBuilder::new(DashboardConfig::default()).expect("urls");
        Arc::new(AppState::new(dataset, Fallbacks::default(), urls, None).expect("state"))
    }

    #[tokio::test]
    async fn test_analyze_handler_shares_one_pipeline() {
        let state = state();

        let Json(first) = analyze_handler(
            State(state.clone()),
            Json(AnalyzeRequest {
                response: "Kenya.\n[FILTER_COUNTRY: Kenya][FILTER_YEAR: 2022]".to_string(),
            }),
        )
        .await;
        let Json(second) = analyze_handler(
            State(state),
            Json(AnalyzeRequest {
                response: "No tag line.".to_string(),
            }),
        )
        .await;

        assert_eq!(first.selection.country, "Kenya");
        assert_eq!(first.selection.year, "2022");
        assert_eq!(first.display_text, "Kenya.");
        assert_eq!(second.selection.country, "South Africa");
        assert_eq!(second.selection.year, "2023");
        assert!(second.status.used_fallback());
    }

    #[tokio::test]
    async fn test_report_handler_without_client() {
        let result = report_handler(State(state()), Json(ReportRequest { question: None })).await;
        match result {
            Err((code, _)) => assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE),
            Ok(_) => panic!("expected 503 without an API key"),
        }
    }

    #[test]
    fn test_app_state_rejects_unknown_fallback_country() {
        let dataset = Dataset::from_records(vec![record("Kenya", 2022)]);
        let urls = DashboardUrlBuilder::new(DashboardConfig::default()).expect("urls");
        assert!(AppState::new(dataset, Fallbacks::default(), urls, None).is_err());
    }
}
