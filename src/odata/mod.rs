//! OData-style query layer over an observation collection.
//!
//! Supports the subset of system query options the dashboard contract needs:
//! `$select`, `$filter`, `$orderby`, `$top`, `$skip` and `$count`.

use std::cmp::Ordering;

use serde_json::Value;
use thiserror::Error;

use crate::data::observation::{format_midnight_utc, Observation, UnknownMetric};

pub mod execute;
pub mod filter;
pub mod options;

pub use execute::{execute, QueryResult};
pub use filter::{CmpOp, Filter, Literal, TextFn};
pub use options::{Direction, OrderKey, QueryOptions};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unsupported query option '{0}'")]
    UnknownOption(String),

    #[error("unknown property '{0}'")]
    UnknownField(String),

    #[error("invalid value '{value}' for {option}: expected a non-negative integer")]
    InvalidNumber { option: &'static str, value: String },

    #[error("invalid value '{0}' for $count: expected true or false")]
    InvalidBoolean(String),

    #[error("$top {requested} exceeds the maximum of {max}")]
    TopTooLarge { requested: usize, max: usize },

    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("cannot compare {field} with {literal}")]
    TypeMismatch { field: &'static str, literal: String },

    #[error(transparent)]
    UnknownMetric(#[from] UnknownMetric),

    #[error("invalid date literal '{0}'")]
    InvalidDate(String),

    #[error("invalid literal '{value}' for {field}")]
    InvalidLiteral { field: &'static str, value: String },

    #[error("invalid $orderby clause '{0}'")]
    InvalidOrder(String),
}

/// Properties of the observation entity as exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Country,
    Province,
    Date,
    Value,
    Count,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Self::Id,
        Self::Country,
        Self::Province,
        Self::Date,
        Self::Value,
        Self::Count,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "Id",
            Self::Country => "Country",
            Self::Province => "Province",
            Self::Date => "Date",
            Self::Value => "Value",
            Self::Count => "Count",
        }
    }

    /// Property names are matched case-insensitively.
    pub fn parse(name: &str) -> Result<Self, QueryError> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| QueryError::UnknownField(name.to_string()))
    }

    pub fn project(self, obs: &Observation) -> Value {
        match self {
            Self::Id => Value::String(obs.id().to_string()),
            Self::Country => Value::String(obs.country().to_string()),
            Self::Province => Value::String(obs.province().to_string()),
            Self::Date => Value::String(format_midnight_utc(obs.date())),
            Self::Value => Value::String(obs.metric().as_str().to_string()),
            Self::Count => Value::from(obs.count()),
        }
    }

    pub fn compare(self, a: &Observation, b: &Observation) -> Ordering {
        match self {
            Self::Id => a.id().cmp(&b.id()),
            Self::Country => a.country().cmp(b.country()),
            Self::Province => a.province().cmp(b.province()),
            Self::Date => a.date().cmp(&b.date()),
            Self::Value => a.metric().cmp(&b.metric()),
            Self::Count => a.count().cmp(&b.count()),
        }
    }
}
