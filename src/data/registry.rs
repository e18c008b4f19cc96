//! Startup-loaded dataset registry.
//! Built once after ingestion, then shared read-only through `Arc` with every request handler.

use std::sync::Arc;

use futures_util::future::try_join3;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SourceUrls;
use crate::data::ingest::{ingest, FetchPolicy, IngestError};
use crate::data::observation::{MetricKind, Observation};

/// All observations for one metric, in ingestion order.
#[derive(Debug, Clone)]
pub struct ObservationCollection {
    metric: MetricKind,
    source: String,
    observations: Vec<Observation>,
}

impl ObservationCollection {
    pub fn new(metric: MetricKind, source: impl Into<String>, observations: Vec<Observation>) -> Self {
        Self {
            metric,
            source: source.into(),
            observations,
        }
    }

    pub fn metric(&self) -> MetricKind {
        self.metric
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{found} collection supplied for the {expected} slot")]
pub struct MislabeledCollection {
    pub expected: MetricKind,
    pub found: MetricKind,
}

/// Read-only mapping from metric to its collection.
#[derive(Debug)]
pub struct DataRegistry {
    confirmed: ObservationCollection,
    deaths: ObservationCollection,
    recovered: ObservationCollection,
}

impl DataRegistry {
    /// Assemble a registry from pre-built collections. Each slot must hold
    /// the matching metric.
    pub fn new(
        confirmed: ObservationCollection,
        deaths: ObservationCollection,
        recovered: ObservationCollection,
    ) -> Result<Self, MislabeledCollection> {
        for (expected, collection) in [
            (MetricKind::Confirmed, &confirmed),
            (MetricKind::Deaths, &deaths),
            (MetricKind::Recovered, &recovered),
        ] {
            if collection.metric() != expected {
                return Err(MislabeledCollection {
                    expected,
                    found: collection.metric(),
                });
            }
        }
        Ok(Self {
            confirmed,
            deaths,
            recovered,
        })
    }

    /// Ingest all three metrics concurrently. Fails on the first dataset that
    /// cannot be fetched; nothing is served until all three are loaded.
    pub async fn load(sources: &SourceUrls, policy: &FetchPolicy) -> Result<Arc<Self>, IngestError> {
        let client = policy.client()?;

        let (confirmed, deaths, recovered) = try_join3(
            ingest(&client, sources.get(MetricKind::Confirmed), MetricKind::Confirmed, policy),
            ingest(&client, sources.get(MetricKind::Deaths), MetricKind::Deaths, policy),
            ingest(&client, sources.get(MetricKind::Recovered), MetricKind::Recovered, policy),
        )
        .await?;

        // `ingest` stamps each collection with the metric it was asked for.
        let registry = Self {
            confirmed,
            deaths,
            recovered,
        };
        for collection in registry.collections() {
            if collection.is_empty() {
                warn!("{} dataset from {} is empty", collection.metric(), collection.source());
            }
        }
        info!("All datasets loaded");

        Ok(Arc::new(registry))
    }

    pub fn get(&self, metric: MetricKind) -> &ObservationCollection {
        match metric {
            MetricKind::Confirmed => &self.confirmed,
            MetricKind::Deaths => &self.deaths,
            MetricKind::Recovered => &self.recovered,
        }
    }

    pub fn collections(&self) -> impl Iterator<Item = &ObservationCollection> {
        MetricKind::ALL.into_iter().map(move |metric| self.get(metric))
    }
}
