use std::cmp::Ordering;

use rayon::prelude::*;
use serde_json::{Map, Value};

use super::options::{Direction, OrderKey, QueryOptions};
use super::Field;
use crate::data::observation::Observation;

/// Matching observations after filter, order, skip and top; projection is
/// applied when rendering.
#[derive(Debug, Clone)]
pub struct QueryResult<'a> {
    /// Total matches before skip/top, present when `$count=true`.
    pub count: Option<usize>,
    pub rows: Vec<&'a Observation>,
    pub projection: Vec<Field>,
}

impl QueryResult<'_> {
    /// Render the OData response envelope: `{ "@odata.count"?, "value": [...] }`.
    pub fn to_json(&self) -> Value {
        let value: Vec<Value> = self
            .rows
            .iter()
            .map(|obs| {
                let record: Map<String, Value> = self
                    .projection
                    .iter()
                    .map(|field| (field.name().to_string(), field.project(obs)))
                    .collect();
                Value::Object(record)
            })
            .collect();

        let mut envelope = Map::new();
        if let Some(count) = self.count {
            envelope.insert("@odata.count".to_string(), Value::from(count));
        }
        envelope.insert("value".to_string(), Value::Array(value));
        Value::Object(envelope)
    }
}

fn compare_keys(keys: &[OrderKey], a: &Observation, b: &Observation) -> Ordering {
    keys.iter()
        .map(|key| match key.direction {
            Direction::Asc => key.field.compare(a, b),
            Direction::Desc => key.field.compare(b, a),
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Run a query against an immutable slice of observations.
///
/// Filtering keeps source order and sorting is stable, so ties stay in
/// ingestion order.
pub fn execute<'a>(observations: &'a [Observation], options: &QueryOptions) -> QueryResult<'a> {
    let mut rows: Vec<&Observation> = match &options.filter {
        Some(filter) => observations.par_iter().filter(|obs| filter.matches(obs)).collect(),
        None => observations.iter().collect(),
    };

    let count = options.count.then_some(rows.len());

    if !options.order_by.is_empty() {
        rows.par_sort_by(|a, b| compare_keys(&options.order_by, a, b));
    }

    let rows = rows
        .into_iter()
        .skip(options.skip)
        .take(options.top.unwrap_or(usize::MAX))
        .collect();

    QueryResult {
        count,
        rows,
        projection: options.projection().to_vec(),
    }
}
