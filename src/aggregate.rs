//! Per-country views built by composing query primitives.
//!
//! Every view follows the latest-date protocol: a cheap probe for the maximum
//! `Date` (`$orderby=Date desc&$top=1`), then a fetch filtered to that date.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;

use crate::data::observation::{MetricKind, Observation};
use crate::data::registry::DataRegistry;
use crate::odata::{execute, CmpOp, Direction, Field, Filter, Literal, QueryOptions};

pub const UNKNOWN_COUNTRY: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryAggregate {
    pub country: String,
    pub count: u64,
}

/// A derived view together with the snapshot date it was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountrySummary {
    pub date: Option<NaiveDate>,
    pub countries: Vec<CountryAggregate>,
}

impl CountrySummary {
    fn empty() -> Self {
        Self {
            date: None,
            countries: Vec::new(),
        }
    }
}

/// Join key for country names: trimmed and case-folded.
pub fn country_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn display_name(name: &str) -> &str {
    match name.trim() {
        "" => UNKNOWN_COUNTRY,
        trimmed => trimmed,
    }
}

/// Probe for the most recent date, optionally strictly before `before`.
pub fn latest_date(observations: &[Observation], before: Option<NaiveDate>) -> Option<NaiveDate> {
    let mut probe = QueryOptions::default()
        .select(&[Field::Date])
        .order_by(Field::Date, Direction::Desc)
        .top(1);
    if let Some(before) = before {
        probe = probe.filter(Filter::compare(Field::Date, CmpOp::Lt, Literal::Date(before)));
    }
    execute(observations, &probe).rows.first().map(|obs| obs.date())
}

/// All observations on `date`, projected to `Country, Count`.
pub fn snapshot(observations: &[Observation], date: NaiveDate) -> Vec<&Observation> {
    let fetch = QueryOptions::default()
        .filter(Filter::compare(Field::Date, CmpOp::Eq, Literal::Date(date)))
        .select(&[Field::Country, Field::Count]);
    execute(observations, &fetch).rows
}

/// Sum counts per country, keeping the first-seen spelling of each name.
pub fn country_totals<'a>(rows: impl IntoIterator<Item = &'a Observation>) -> Vec<CountryAggregate> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut totals: Vec<CountryAggregate> = Vec::new();

    for obs in rows {
        match index.entry(country_key(obs.country())) {
            Entry::Occupied(entry) => {
                let total = &mut totals[*entry.get()];
                total.count = total.count.saturating_add(obs.count());
            }
            Entry::Vacant(entry) => {
                entry.insert(totals.len());
                totals.push(CountryAggregate {
                    country: display_name(obs.country()).to_string(),
                    count: obs.count(),
                });
            }
        }
    }

    totals
}

fn totals_by_key(totals: &[CountryAggregate]) -> HashMap<String, u64> {
    totals
        .iter()
        .map(|agg| (country_key(&agg.country), agg.count))
        .collect()
}

fn sorted(mut countries: Vec<CountryAggregate>) -> Vec<CountryAggregate> {
    countries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.country.cmp(&b.country)));
    countries
}

/// Country totals on the most recent date in the collection.
pub fn latest_by_country(observations: &[Observation]) -> CountrySummary {
    let Some(date) = latest_date(observations, None) else {
        return CountrySummary::empty();
    };
    CountrySummary {
        date: Some(date),
        countries: sorted(country_totals(snapshot(observations, date))),
    }
}

/// `max(0, confirmed - deaths - recovered)` per confirmed country, each term
/// taken from its own collection's latest snapshot.
pub fn active_by_country(
    confirmed: &[Observation],
    deaths: &[Observation],
    recovered: &[Observation],
) -> CountrySummary {
    let confirmed = latest_by_country(confirmed);
    let deaths = totals_by_key(&latest_by_country(deaths).countries);
    let recovered = totals_by_key(&latest_by_country(recovered).countries);

    let countries = confirmed
        .countries
        .into_iter()
        .map(|agg| {
            let key = country_key(&agg.country);
            let dead = deaths.get(&key).copied().unwrap_or(0);
            let healed = recovered.get(&key).copied().unwrap_or(0);
            CountryAggregate {
                count: agg.count.saturating_sub(dead).saturating_sub(healed),
                country: agg.country,
            }
        })
        .collect();

    CountrySummary {
        date: confirmed.date,
        countries: sorted(countries),
    }
}

/// Latest-date total minus the previous date's total, floored at zero.
pub fn daily_increase_by_country(observations: &[Observation]) -> CountrySummary {
    let Some(latest) = latest_date(observations, None) else {
        return CountrySummary::empty();
    };
    let current = country_totals(snapshot(observations, latest));
    let previous = latest_date(observations, Some(latest))
        .map(|date| totals_by_key(&country_totals(snapshot(observations, date))))
        .unwrap_or_default();

    let countries = current
        .into_iter()
        .map(|agg| {
            let before = previous.get(&country_key(&agg.country)).copied().unwrap_or(0);
            CountryAggregate {
                count: agg.count.saturating_sub(before),
                country: agg.country,
            }
        })
        .collect();

    CountrySummary {
        date: Some(latest),
        countries: sorted(countries),
    }
}

/// Derived views offered by the summary endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryView {
    Metric(MetricKind),
    Active,
    DailyIncrease,
}

impl SummaryView {
    pub fn slug(self) -> &'static str {
        match self {
            Self::Metric(metric) => metric.slug(),
            Self::Active => "active",
            Self::DailyIncrease => "daily-increase",
        }
    }

    pub fn compute(self, registry: &DataRegistry) -> CountrySummary {
        match self {
            Self::Metric(metric) => latest_by_country(registry.get(metric).observations()),
            Self::Active => active_by_country(
                registry.get(MetricKind::Confirmed).observations(),
                registry.get(MetricKind::Deaths).observations(),
                registry.get(MetricKind::Recovered).observations(),
            ),
            Self::DailyIncrease => {
                daily_increase_by_country(registry.get(MetricKind::Confirmed).observations())
            }
        }
    }
}

impl fmt::Display for SummaryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for SummaryView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "daily-increase" | "daily_increase" => Ok(Self::DailyIncrease),
            other => other
                .parse::<MetricKind>()
                .map(Self::Metric)
                .map_err(|_| format!("unknown summary view '{s}'")),
        }
    }
}
