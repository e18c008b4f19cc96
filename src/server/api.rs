//! Response payloads for the service document, health and summary endpoints.

use serde::Serialize;

use crate::aggregate::{CountryAggregate, SummaryView};
use crate::data::observation::{format_midnight_utc, MetricKind, Observation};
use crate::data::registry::DataRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub datasets: Vec<DatasetStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetStatus {
    pub metric: MetricKind,
    pub entity_set: &'static str,
    pub source: String,
    pub records: usize,
    pub latest_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitySetRef {
    pub name: &'static str,
    pub kind: &'static str,
    pub url: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceDocument {
    pub value: Vec<EntitySetRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResponse {
    pub view: &'static str,
    pub date: Option<String>,
    pub value: Vec<CountryAggregate>,
}

pub fn health_payload(registry: &DataRegistry) -> HealthResponse {
    let datasets = registry
        .collections()
        .map(|collection| DatasetStatus {
            metric: collection.metric(),
            entity_set: collection.metric().entity_set(),
            source: collection.source().to_string(),
            records: collection.len(),
            latest_date: collection
                .observations()
                .iter()
                .map(Observation::date)
                .max()
                .map(format_midnight_utc),
        })
        .collect();

    HealthResponse {
        status: "ok",
        service: "covid-odata",
        version: env!("CARGO_PKG_VERSION"),
        datasets,
    }
}

pub fn service_document() -> ServiceDocument {
    ServiceDocument {
        value: MetricKind::ALL
            .into_iter()
            .map(|metric| EntitySetRef {
                name: metric.entity_set(),
                kind: "EntitySet",
                url: metric.entity_set(),
            })
            .collect(),
    }
}

pub fn summary_payload(registry: &DataRegistry, view: SummaryView) -> SummaryResponse {
    let summary = view.compute(registry);
    SummaryResponse {
        view: view.slug(),
        date: summary.date.map(format_midnight_utc),
        value: summary.countries,
    }
}
