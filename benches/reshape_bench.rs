//! Ingestion and query throughput on a synthetic table shaped like the global
//! time-series files (~280 rows, ~1100 date columns).
//!
//! Run with: `cargo bench`

use std::fmt::Write as _;

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use covid_odata::aggregate::latest_by_country;
use covid_odata::data::ingest::reshape;
use covid_odata::data::observation::MetricKind;
use covid_odata::data::table::WideTable;
use covid_odata::odata::{execute, QueryOptions};

const ROWS: usize = 280;
const DAYS: i64 = 1100;

fn synthetic_csv() -> String {
    let start = NaiveDate::from_ymd_opt(2020, 1, 22).unwrap();
    let mut csv = String::from("Province/State,Country/Region,Lat,Long");
    for day in 0..DAYS {
        let date = start + Duration::days(day);
        let _ = write!(csv, ",{}", date.format("%-m/%-d/%y"));
    }
    csv.push('\n');

    for row in 0..ROWS {
        let _ = write!(csv, "Province {row},Country {},0.0,0.0", row / 4);
        for day in 0..DAYS {
            let _ = write!(csv, ",{}", (row as i64 + 1) * day);
        }
        csv.push('\n');
    }
    csv
}

fn bench_reshape(c: &mut Criterion) {
    let csv = synthetic_csv();
    let table = WideTable::parse(&csv).unwrap();

    let mut group = c.benchmark_group("ingest");
    group.sample_size(20);
    group.throughput(Throughput::Elements((ROWS as u64) * (DAYS as u64)));

    group.bench_function("parse_table", |b| {
        b.iter(|| WideTable::parse(black_box(&csv)).unwrap())
    });
    group.bench_function("reshape", |b| {
        b.iter(|| reshape(black_box(&table), MetricKind::Confirmed))
    });
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let csv = synthetic_csv();
    let table = WideTable::parse(&csv).unwrap();
    let observations = reshape(&table, MetricKind::Confirmed).observations;

    let latest_probe = QueryOptions::from_params(
        [("$select", "Date"), ("$orderby", "Date desc"), ("$top", "1")],
        100_000,
    )
    .unwrap();
    let country_filter =
        QueryOptions::from_params([("$filter", "Country eq 'Country 12'"), ("$count", "true")], 100_000)
            .unwrap();

    let mut group = c.benchmark_group("query");
    group.sample_size(20);
    group.bench_function("latest_date_probe", |b| {
        b.iter(|| execute(black_box(&observations), &latest_probe).rows.len())
    });
    group.bench_function("country_filter", |b| {
        b.iter(|| execute(black_box(&observations), &country_filter).count)
    });
    group.bench_function("latest_by_country", |b| {
        b.iter(|| latest_by_country(black_box(&observations)).countries.len())
    });
    group.finish();
}

criterion_group!(benches, bench_reshape, bench_queries);
criterion_main!(benches);
