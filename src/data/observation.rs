//! Observation records: one metric reading for one region on one date.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// The closed set of metrics published by the time-series tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MetricKind {
    Confirmed,
    Deaths,
    Recovered,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [Self::Confirmed, Self::Deaths, Self::Recovered];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "Confirmed",
            Self::Deaths => "Deaths",
            Self::Recovered => "Recovered",
        }
    }

    /// Lowercase name used in CLI arguments, config keys and summary routes.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Deaths => "deaths",
            Self::Recovered => "recovered",
        }
    }

    /// Name of the OData entity set serving this metric.
    pub fn entity_set(self) -> &'static str {
        match self {
            Self::Confirmed => "CovidConfirmed",
            Self::Deaths => "CovidDeaths",
            Self::Recovered => "CovidRecovered",
        }
    }

    /// Entity-set lookup ignores ASCII case.
    pub fn from_entity_set(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.entity_set().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown metric '{0}' (expected Confirmed, Deaths or Recovered)")]
pub struct UnknownMetric(pub String);

impl FromStr for MetricKind {
    type Err = UnknownMetric;

    /// Accepts the display name or the slug, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownMetric(trimmed.to_string()))
    }
}

/// A single (country, province, date, metric, count) reading.
///
/// Fields are private: an observation never changes after ingestion builds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Observation {
    id: Uuid,
    country: String,
    province: String,
    #[serde(serialize_with = "serialize_midnight_utc")]
    date: NaiveDate,
    #[serde(rename = "Value")]
    metric: MetricKind,
    count: u64,
}

impl Observation {
    pub fn new(
        country: impl Into<String>,
        province: impl Into<String>,
        date: NaiveDate,
        metric: MetricKind,
        count: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            country: country.into(),
            province: province.into(),
            date,
            metric,
            count,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn province(&self) -> &str {
        &self.province
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn metric(&self) -> MetricKind {
        self.metric
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Wire form of a calendar date: midnight UTC, second precision.
pub fn format_midnight_utc(date: NaiveDate) -> String {
    format!("{}T00:00:00Z", date.format("%Y-%m-%d"))
}

fn serialize_midnight_utc<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_midnight_utc(*date))
}
