use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, routing::get, Router};
use chrono::NaiveDate;
use covid_odata::config::SourceUrls;
use covid_odata::data::ingest::{fetch_source, ingest, reshape, FetchPolicy, IngestError};
use covid_odata::data::observation::MetricKind;
use covid_odata::data::registry::{DataRegistry, ObservationCollection};
use covid_odata::data::table::WideTable;

const CONFIRMED_CSV: &str = include_str!("fixtures/confirmed.csv");
const MALFORMED_CSV: &str = include_str!("fixtures/malformed.csv");

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn quick_policy(retries: u32) -> FetchPolicy {
    FetchPolicy {
        timeout: Duration::from_secs(5),
        retries,
        backoff: Duration::from_millis(10),
    }
}

fn tuples(collection: &ObservationCollection) -> BTreeSet<(String, String, NaiveDate, u64)> {
    collection
        .observations()
        .iter()
        .map(|o| (o.country().to_string(), o.province().to_string(), o.date(), o.count()))
        .collect()
}

/// Serve `body` at `/data.csv` from an in-process listener and return the URL.
async fn serve_csv(body: &'static str) -> String {
    let app = Router::new().route("/data.csv", get(move || async move { body }));
    serve(app).await
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fixture server should run");
    });
    format!("http://{addr}/data.csv")
}

#[test]
fn reshape_emits_one_observation_per_row_and_date_column() {
    let table = WideTable::parse(CONFIRMED_CSV).expect("fixture should parse");
    let outcome = reshape(&table, MetricKind::Confirmed);

    assert_eq!(outcome.rows, 4);
    assert_eq!(outcome.date_columns, 3);
    assert_eq!(outcome.observations.len(), 12);
    assert_eq!(outcome.malformed_cells, 0);
    assert_eq!(outcome.skipped_columns, vec!["Lat".to_string(), "Long".to_string()]);
    assert!(outcome
        .observations
        .iter()
        .all(|o| o.metric() == MetricKind::Confirmed));
}

#[test]
fn single_us_row_yields_two_observations() {
    let csv = "Country/Region,Province/State,1/22/20,1/23/20\n\"US\",\"\",10,15\n";
    let table = WideTable::parse(csv).expect("table should parse");
    let outcome = reshape(&table, MetricKind::Confirmed);

    let got: Vec<_> = outcome
        .observations
        .iter()
        .map(|o| (o.country(), o.province(), o.date(), o.metric(), o.count()))
        .collect();
    assert_eq!(
        got,
        vec![
            ("US", "", NaiveDate::from_ymd_opt(2020, 1, 22).unwrap(), MetricKind::Confirmed, 10),
            ("US", "", NaiveDate::from_ymd_opt(2020, 1, 23).unwrap(), MetricKind::Confirmed, 15),
        ]
    );
}

#[test]
fn reshape_is_row_major_and_keeps_blank_provinces() {
    let table = WideTable::parse(CONFIRMED_CSV).expect("fixture should parse");
    let outcome = reshape(&table, MetricKind::Confirmed);

    let us: Vec<_> = outcome
        .observations
        .iter()
        .take(3)
        .map(|o| (o.country(), o.province(), o.date().to_string(), o.count()))
        .collect();
    assert_eq!(
        us,
        vec![
            ("US", "", "2020-01-22".to_string(), 1),
            ("US", "", "2020-01-23".to_string(), 1),
            ("US", "", "2020-01-24".to_string(), 2),
        ]
    );
    assert_eq!(outcome.observations[3].province(), "Hubei");
    assert_eq!(outcome.observations[3].count(), 444);
}

#[test]
fn malformed_cells_become_zero_and_unknown_columns_are_skipped() {
    let table = WideTable::parse(MALFORMED_CSV).expect("fixture should parse");
    let outcome = reshape(&table, MetricKind::Deaths);

    assert_eq!(outcome.observations.len(), 4);
    assert_eq!(outcome.malformed_cells, 2);
    assert_eq!(
        outcome.skipped_columns,
        vec!["Lat".to_string(), "Long".to_string(), "Notes".to_string()]
    );

    let counts: Vec<u64> = outcome.observations.iter().map(|o| o.count()).collect();
    assert_eq!(counts, vec![5, 0, 0, 7]);
}

#[test]
fn every_observation_gets_a_distinct_id() {
    let table = WideTable::parse(CONFIRMED_CSV).expect("fixture should parse");
    let outcome = reshape(&table, MetricKind::Confirmed);
    let ids: BTreeSet<_> = outcome.observations.iter().map(|o| o.id()).collect();
    assert_eq!(ids.len(), outcome.observations.len());
}

#[tokio::test]
async fn reingesting_the_same_file_yields_the_same_tuples() {
    let policy = quick_policy(0);
    let client = policy.client().expect("client should build");
    let path = fixture("confirmed.csv");

    let first = ingest(&client, &path, MetricKind::Confirmed, &policy)
        .await
        .expect("first ingest should succeed");
    let second = ingest(&client, &path, MetricKind::Confirmed, &policy)
        .await
        .expect("second ingest should succeed");

    assert_eq!(tuples(&first), tuples(&second));
    assert_ne!(first.observations()[0].id(), second.observations()[0].id());
    assert_eq!(first.source(), path);
}

#[tokio::test]
async fn http_source_matches_local_file() {
    let policy = quick_policy(0);
    let client = policy.client().expect("client should build");
    let url = serve_csv(CONFIRMED_CSV).await;

    let remote = ingest(&client, &url, MetricKind::Confirmed, &policy)
        .await
        .expect("http ingest should succeed");
    let local = ingest(&client, &fixture("confirmed.csv"), MetricKind::Confirmed, &policy)
        .await
        .expect("file ingest should succeed");

    assert_eq!(remote.len(), 12);
    assert_eq!(tuples(&remote), tuples(&local));
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/data.csv",
        get(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::SERVICE_UNAVAILABLE, "")
                } else {
                    (StatusCode::OK, CONFIRMED_CSV)
                }
            }
        }),
    );
    let url = serve(app).await;

    let policy = quick_policy(2);
    let client = policy.client().expect("client should build");
    let text = fetch_source(&client, &url, &policy)
        .await
        .expect("second attempt should succeed");

    assert_eq!(text, CONFIRMED_CSV);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_remote_file_reports_status() {
    let url = serve_csv(CONFIRMED_CSV).await.replace("data.csv", "missing.csv");
    let policy = quick_policy(2);
    let client = policy.client().expect("client should build");

    let err = ingest(&client, &url, MetricKind::Deaths, &policy)
        .await
        .expect_err("404 should fail the ingest");
    assert!(
        matches!(err, IngestError::Status { status, .. } if status == StatusCode::NOT_FOUND),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn unreachable_source_fails_with_fetch_error() {
    // Bind then drop to get a port with nothing listening on it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");
    drop(listener);

    let policy = quick_policy(1);
    let client = policy.client().expect("client should build");
    let err = fetch_source(&client, &format!("http://{addr}/data.csv"), &policy)
        .await
        .expect_err("nothing is listening");
    assert!(matches!(err, IngestError::Fetch { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn missing_local_file_fails_with_read_error() {
    let policy = quick_policy(0);
    let client = policy.client().expect("client should build");
    let err = ingest(&client, &fixture("nope.csv"), MetricKind::Recovered, &policy)
        .await
        .expect_err("file does not exist");
    assert!(matches!(err, IngestError::Read { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn registry_load_fails_when_one_local_source_is_missing() {
    let missing = fixture("recovered-missing.csv");
    let sources = SourceUrls {
        confirmed: fixture("confirmed.csv"),
        deaths: fixture("deaths.csv"),
        recovered: missing.clone(),
    };

    let err = DataRegistry::load(&sources, &quick_policy(0))
        .await
        .expect_err("a missing dataset must abort loading");
    match &err {
        IngestError::Read { path, .. } => assert_eq!(path, &missing),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains(&missing));
}

#[tokio::test]
async fn registry_load_fails_when_one_remote_source_is_not_found() {
    let missing = serve_csv(CONFIRMED_CSV).await.replace("data.csv", "deaths.csv");
    let sources = SourceUrls {
        confirmed: fixture("confirmed.csv"),
        deaths: missing.clone(),
        recovered: fixture("recovered.csv"),
    };

    let err = DataRegistry::load(&sources, &quick_policy(1))
        .await
        .expect_err("a 404 dataset must abort loading");
    assert!(
        matches!(&err, IngestError::Status { source_url, status } if source_url == &missing && *status == StatusCode::NOT_FOUND),
        "unexpected error: {err}"
    );
    assert!(err.to_string().contains(&missing));
}
