//! Chronology CLI
//!
//! Reads exhibits from a JSON file, runs the chronology engine against
//! OpenAI, and writes the result as JSON.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chronology::ai::OpenAI;
use chronology::pipeline::RateLimitedLlm;
use chronology::{CaseInfo, ChronologyEngine, ExhibitInput, LlmClient};
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Build a medical chronology from case exhibits.
#[derive(Debug, Parser)]
#[command(name = "chronology", version)]
pub struct Args {
    /// Exhibits JSON: an array of exhibits, or {"exhibits": [...], "case_info": {...}}
    pub input: PathBuf,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Engine config JSON (defaults apply to anything left out)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Visit-type schema registry JSON
    #[arg(long)]
    pub schemas: Option<PathBuf>,

    /// Model name (overrides CHRONOLOGY_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// Exhibits processed at once (overrides CHRONOLOGY_MAX_CONCURRENT)
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Source layout: raw_ssa, processed, court_transcript or unknown
    #[arg(long)]
    pub format: Option<String>,

    /// Abort the whole run after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Cap LLM requests per second
    #[arg(long)]
    pub requests_per_second: Option<u32>,

    /// Keep extraction order instead of sorting by date
    #[arg(long)]
    pub no_sort: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InputFile {
    Case {
        exhibits: Vec<ExhibitInput>,
        #[serde(default)]
        case_info: Option<CaseInfo>,
    },
    Bare(Vec<ExhibitInput>),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chronology=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = Config::load(&args)?;

    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let (exhibits, case_info) = match serde_json::from_str(&raw)
        .with_context(|| format!("invalid exhibits JSON in {}", args.input.display()))?
    {
        InputFile::Case {
            exhibits,
            case_info,
        } => (exhibits, case_info),
        InputFile::Bare(exhibits) => (exhibits, None),
    };

    let openai = OpenAI::from_env()?.with_model(config.engine.model.model.clone());
    let llm: Arc<dyn LlmClient> = match config.requests_per_second {
        Some(rps) => Arc::new(RateLimitedLlm::new(openai, rps)),
        None => Arc::new(openai),
    };

    tracing::info!(
        exhibits = exhibits.len(),
        model = %config.engine.model.model,
        max_concurrent = config.engine.parallel.max_concurrent,
        "Starting chronology run"
    );

    let engine = ChronologyEngine::with_registry(llm, Arc::new(config.schemas), config.engine);
    let result = engine.generate_chronology(exhibits, case_info).await;

    let json = serde_json::to_string_pretty(&result)?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", json),
    }

    if let Some(error) = &result.error {
        bail!("chronology run {} failed: {}", result.run_id, error);
    }
    tracing::info!(
        run_id = %result.run_id,
        events = result.events.len(),
        failed_exhibits = result.failed_exhibits,
        "Chronology written"
    );
    Ok(())
}
