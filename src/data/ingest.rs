//! Ingestion pipeline: fetch a wide-format time-series table and reshape it into
//! one [`Observation`] per (row, date column).

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::observation::{MetricKind, Observation};
use crate::data::registry::ObservationCollection;
use crate::data::table::WideTable;

pub const COUNTRY_COLUMNS: [&str; 2] = ["Country/Region", "Country"];
pub const PROVINCE_COLUMNS: [&str; 2] = ["Province/State", "Province"];

const DATE_HEADER_FORMATS: [&str; 3] = ["%m/%d/%y", "%m/%d/%Y", "%Y-%m-%d"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to fetch {source_url}: {source}")]
    Fetch {
        source_url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{source_url} responded with {status}")]
    Status { source_url: String, status: StatusCode },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse table from {source_url}: {source}")]
    Table {
        source_url: String,
        #[source]
        source: csv::Error,
    },

    #[error("ingestion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { .. } => true,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Timeout and retry behaviour for remote sources.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Delay before the first retry; doubled on each later retry.
    pub backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl FetchPolicy {
    pub fn client(&self) -> Result<Client, IngestError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(IngestError::Client)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Result of reshaping one table, with the recovered-error statistics.
#[derive(Debug, Clone, Default)]
pub struct ReshapeOutcome {
    pub observations: Vec<Observation>,
    pub rows: usize,
    pub date_columns: usize,
    /// Headers that were neither identifying columns nor dates.
    pub skipped_columns: Vec<String>,
    /// Cells that did not parse as a non-negative integer and were stored as 0.
    pub malformed_cells: usize,
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Parse a column header as a calendar date (`1/22/20`, `1/22/2020` or `2020-01-22`).
pub fn parse_date_header(header: &str) -> Option<NaiveDate> {
    let header = header.trim();
    DATE_HEADER_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(header, format).ok())
}

pub fn parse_count(cell: &str) -> Option<u64> {
    cell.trim().parse().ok()
}

/// Expand every row of a wide table into one observation per date column.
///
/// Output is row-major: source row order, then column order within the row.
pub fn reshape(table: &WideTable, metric: MetricKind) -> ReshapeOutcome {
    let country_idx = table.column_index(&COUNTRY_COLUMNS);
    let province_idx = table.column_index(&PROVINCE_COLUMNS);

    let mut skipped_columns = Vec::new();
    let date_columns: Vec<(usize, NaiveDate)> = table
        .headers()
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != country_idx && Some(*i) != province_idx)
        .filter_map(|(i, header)| match parse_date_header(header) {
            Some(date) => Some((i, date)),
            None => {
                skipped_columns.push(header.clone());
                None
            }
        })
        .collect();

    let mut observations = Vec::with_capacity(table.row_count() * date_columns.len());
    let mut malformed_cells = 0;

    for row in table.rows() {
        let country = country_idx.and_then(|i| row.cell(i)).unwrap_or("");
        let province = province_idx.and_then(|i| row.cell(i)).unwrap_or("");

        for &(index, date) in &date_columns {
            let raw = row.cell(index).unwrap_or("");
            let count = parse_count(raw).unwrap_or_else(|| {
                debug!(%metric, country, province, %date, cell = raw, "malformed count cell, using 0");
                malformed_cells += 1;
                0
            });
            observations.push(Observation::new(country, province, date, metric, count));
        }
    }

    ReshapeOutcome {
        observations,
        rows: table.row_count(),
        date_columns: date_columns.len(),
        skipped_columns,
        malformed_cells,
    }
}

async fn fetch_once(client: &Client, url: &str) -> Result<String, IngestError> {
    let response = client.get(url).send().await.map_err(|source| IngestError::Fetch {
        source_url: url.to_string(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::Status {
            source_url: url.to_string(),
            status,
        });
    }

    response.text().await.map_err(|source| IngestError::Fetch {
        source_url: url.to_string(),
        source,
    })
}

/// Retrieve the raw table text. Remote sources retry with backoff; anything that
/// is not an `http(s)://` URL is read as a local path.
pub async fn fetch_source(
    client: &Client,
    source: &str,
    policy: &FetchPolicy,
) -> Result<String, IngestError> {
    if !is_remote(source) {
        return tokio::fs::read_to_string(source)
            .await
            .map_err(|err| IngestError::Read {
                path: source.to_string(),
                source: err,
            });
    }

    let mut attempt = 0;
    loop {
        match fetch_once(client, source).await {
            Ok(text) => return Ok(text),
            Err(err) if attempt < policy.retries && err.is_retryable() => {
                let delay = policy.delay_for(attempt);
                warn!("Fetch attempt {} for {source} failed: {err}; retrying in {delay:?}", attempt + 1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Fetch, parse and reshape one metric's dataset.
pub async fn ingest(
    client: &Client,
    source: &str,
    metric: MetricKind,
    policy: &FetchPolicy,
) -> Result<ObservationCollection, IngestError> {
    info!("Fetching {metric} data from {source}");
    let text = fetch_source(client, source, policy).await?;

    let source_url = source.to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        WideTable::parse(&text)
            .map(|table| reshape(&table, metric))
            .map_err(|source| IngestError::Table { source_url, source })
    })
    .await??;

    if outcome.malformed_cells > 0 {
        warn!(
            %metric,
            malformed = outcome.malformed_cells,
            "some count cells were not integers and were stored as 0"
        );
    }
    info!(
        %metric,
        rows = outcome.rows,
        date_columns = outcome.date_columns,
        records = outcome.observations.len(),
        "dataset ingested"
    );

    Ok(ObservationCollection::new(metric, source, outcome.observations))
}
