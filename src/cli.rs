use serde::Serialize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::data::ingest::{fetch_source, reshape, IngestError};
use crate::data::observation::{format_midnight_utc, MetricKind, Observation};
use crate::data::table::WideTable;
use crate::server;

const USAGE: &str = "usage: covid-odata <serve|ingest|help>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Serve,
    Ingest,
    Help,
}

pub fn parse_command(args: &[String]) -> Option<Command> {
    match args.get(1).map(String::as_str) {
        Some("serve") => Some(Command::Serve),
        Some("ingest") => Some(Command::Ingest),
        Some("help" | "--help" | "-h") => Some(Command::Help),
        _ => None,
    }
}

pub fn run_with_args(args: &[String]) -> i32 {
    match parse_command(args) {
        Some(Command::Serve) => handle_serve(),
        Some(Command::Ingest) => handle_ingest(args),
        Some(Command::Help) => {
            println!("{USAGE}");
            println!("  serve                      load all datasets and serve the OData API");
            println!("  ingest <metric> [source]   fetch and reshape one dataset, print a summary");
            println!("metrics: confirmed, deaths, recovered");
            0
        }
        None => {
            eprintln!("{USAGE}");
            2
        }
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn runtime() -> Option<tokio::runtime::Runtime> {
    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => Some(rt),
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            None
        }
    }
}

fn load_config() -> Option<Config> {
    match Config::load() {
        Ok(config) => Some(config),
        Err(err) => {
            eprintln!("configuration error: {err}");
            None
        }
    }
}

fn handle_serve() -> i32 {
    init_tracing();
    let Some(config) = load_config() else {
        return 1;
    };
    let Some(rt) = runtime() else {
        return 1;
    };

    match rt.block_on(server::run_server(config)) {
        Ok(()) => 0,
        Err(err) => {
            error!("server error: {err}");
            eprintln!("server error: {err}");
            1
        }
    }
}

#[derive(Debug, Serialize)]
struct IngestSummary {
    metric: MetricKind,
    source: String,
    records: usize,
    rows: usize,
    date_columns: usize,
    skipped_columns: Vec<String>,
    malformed_cells: usize,
    first_date: Option<String>,
    last_date: Option<String>,
}

fn handle_ingest(args: &[String]) -> i32 {
    let Some(raw_metric) = args.get(2) else {
        eprintln!("usage: covid-odata ingest <confirmed|deaths|recovered> [source]");
        return 2;
    };
    let metric = match raw_metric.parse::<MetricKind>() {
        Ok(metric) => metric,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    init_tracing();
    let Some(config) = load_config() else {
        return 1;
    };
    let source = args
        .get(3)
        .cloned()
        .unwrap_or_else(|| config.sources.get(metric).to_string());
    let Some(rt) = runtime() else {
        return 1;
    };

    match rt.block_on(summarize(metric, source, &config)) {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(payload) => {
                println!("{payload}");
                0
            }
            Err(err) => {
                eprintln!("failed to serialize ingest summary: {err}");
                1
            }
        },
        Err(err) => {
            eprintln!("ingest failed: {err}");
            1
        }
    }
}

async fn summarize(
    metric: MetricKind,
    source: String,
    config: &Config,
) -> Result<IngestSummary, IngestError> {
    let client = config.fetch.client()?;
    let text = fetch_source(&client, &source, &config.fetch).await?;
    let table = WideTable::parse(&text).map_err(|e| IngestError::Table {
        source_url: source.clone(),
        source: e,
    })?;
    let outcome = reshape(&table, metric);

    let dates = outcome.observations.iter().map(Observation::date);
    let first_date = dates.clone().min().map(format_midnight_utc);
    let last_date = dates.max().map(format_midnight_utc);

    Ok(IngestSummary {
        metric,
        records: outcome.observations.len(),
        rows: outcome.rows,
        date_columns: outcome.date_columns,
        skipped_columns: outcome.skipped_columns,
        malformed_cells: outcome.malformed_cells,
        first_date,
        last_date,
        source,
    })
}
