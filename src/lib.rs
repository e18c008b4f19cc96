//! Time-series COVID-19 tables reshaped into observations and served over an
//! OData-style query API.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod data;
pub mod odata;
pub mod server;
