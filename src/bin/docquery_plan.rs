//! Plans a keyspace term from a JSON fixture and prints the chosen operator.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use docquery::{IndexDef, InMemoryDatastore, PlanRequest, Planner, PlannerConfig, PlannerOutput};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "docquery-plan",
    version,
    about = "Choose index scans for a document query fixture"
)]
struct Cli {
    #[arg(value_name = "FIXTURE", help = "JSON file with `indexes` and `request`")]
    fixture: PathBuf,

    #[arg(long, value_name = "FILE", env = "DOCQUERY_CONFIG", help = "Planner configuration (TOML)")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_enum,
        default_value_t = OutputFormat::Json,
        help = "Output format"
    )]
    format: OutputFormat,

    #[arg(long, help = "Wrap user data in <ud> markers in text output")]
    redact: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    indexes: Vec<IndexDef>,
    request: PlanRequest,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PlannerConfig::from_path(path)?,
        None => PlannerConfig::default(),
    };

    let raw = fs::read_to_string(&cli.fixture)?;
    let fixture: Fixture = serde_json::from_str(&raw)?;
    let datastore = fixture
        .indexes
        .into_iter()
        .fold(InMemoryDatastore::new(), InMemoryDatastore::with_index);

    let planner = Planner::new(config, Arc::new(datastore));
    let output = match planner.plan(&fixture.request) {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(code = err.code(), error = %err, "cli.plan.failed");
            return Err(err.into());
        }
    };
    match cli.format {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Text => print_text(&output, cli.redact),
    }
    Ok(())
}

fn print_json(output: &PlannerOutput) -> Result<(), Box<dyn Error>> {
    let plan = output.plan.to_json()?;
    let value = json!({
        "request_id": output.request_id,
        "plan": plan,
        "plan_hash": format!("{:016x}", output.plan_hash),
        "max_parallelism": output.max_parallelism,
        "covering_scans": output.covering_scans,
        "pushed": output.pushed,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_text(output: &PlannerOutput, redact: bool) {
    if let Some(id) = &output.request_id {
        println!("request: {id}");
    }
    print!("{}", output.explain.root.render(redact));
    println!("plan_hash: {:016x}", output.explain.plan_hash);
    if !output.covering_scans.is_empty() {
        println!("covering: {}", output.covering_scans.join(", "));
    }
}
