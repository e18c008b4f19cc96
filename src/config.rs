//! Runtime configuration: built-in defaults, then an optional YAML file, then
//! environment variables.

use std::env;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::data::ingest::FetchPolicy;
use crate::data::observation::MetricKind;

const JHU_TIME_SERIES_BASE: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series";

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_ODATA_PREFIX: &str = "odata";
pub const DEFAULT_MAX_TOP: usize = 100_000;
pub const CONFIG_PATH_VAR: &str = "COVID_ODATA_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Source location of each metric's wide-format table. Either an `http(s)://`
/// URL or a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrls {
    pub confirmed: String,
    pub deaths: String,
    pub recovered: String,
}

impl Default for SourceUrls {
    fn default() -> Self {
        Self {
            confirmed: format!("{JHU_TIME_SERIES_BASE}/time_series_covid19_confirmed_global.csv"),
            deaths: format!("{JHU_TIME_SERIES_BASE}/time_series_covid19_deaths_global.csv"),
            recovered: format!("{JHU_TIME_SERIES_BASE}/time_series_covid19_recovered_global.csv"),
        }
    }
}

impl SourceUrls {
    pub fn get(&self, metric: MetricKind) -> &str {
        match metric {
            MetricKind::Confirmed => &self.confirmed,
            MetricKind::Deaths => &self.deaths,
            MetricKind::Recovered => &self.recovered,
        }
    }

    fn set(&mut self, metric: MetricKind, source: String) {
        match metric {
            MetricKind::Confirmed => self.confirmed = source,
            MetricKind::Deaths => self.deaths = source,
            MetricKind::Recovered => self.recovered = source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    /// Path segment the OData entity sets are mounted under.
    pub odata_prefix: String,
    pub max_top: usize,
    pub fetch: FetchPolicy,
    pub sources: SourceUrls,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            odata_prefix: DEFAULT_ODATA_PREFIX.to_string(),
            max_top: DEFAULT_MAX_TOP,
            fetch: FetchPolicy::default(),
            sources: SourceUrls::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    bind: Option<String>,
    odata_prefix: Option<String>,
    max_top: Option<usize>,
    fetch_timeout_secs: Option<u64>,
    fetch_retries: Option<u32>,
    #[serde(default)]
    sources: SourcesFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourcesFile {
    confirmed: Option<String>,
    deaths: Option<String>,
    recovered: Option<String>,
}

impl Config {
    /// Load configuration from `COVID_ODATA_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = env::var(CONFIG_PATH_VAR) {
            info!("Loading config file {path}");
            config.apply_file(Path::new(&path))?;
        }
        config.apply_env()?;
        config.validate()?;

        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        self.apply_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_yaml(&mut self, raw: &str) -> Result<(), serde_yaml::Error> {
        let file: ConfigFile = serde_yaml::from_str(raw)?;

        if let Some(bind) = file.bind {
            self.bind = bind;
        }
        if let Some(prefix) = file.odata_prefix {
            self.odata_prefix = prefix;
        }
        if let Some(max_top) = file.max_top {
            self.max_top = max_top;
        }
        if let Some(secs) = file.fetch_timeout_secs {
            self.fetch.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = file.fetch_retries {
            self.fetch.retries = retries;
        }
        for (metric, source) in [
            (MetricKind::Confirmed, file.sources.confirmed),
            (MetricKind::Deaths, file.sources.deaths),
            (MetricKind::Recovered, file.sources.recovered),
        ] {
            if let Some(source) = source {
                self.sources.set(metric, source);
            }
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(bind) = var("COVID_ODATA_BIND") {
            self.bind = bind;
        }
        if let Some(prefix) = var("COVID_ODATA_PREFIX") {
            self.odata_prefix = prefix;
        }
        if let Some(max_top) = try_load("COVID_ODATA_MAX_TOP")? {
            self.max_top = max_top;
        }
        if let Some(secs) = try_load("COVID_ODATA_FETCH_TIMEOUT_SECS")? {
            self.fetch.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = try_load("COVID_ODATA_FETCH_RETRIES")? {
            self.fetch.retries = retries;
        }
        for metric in MetricKind::ALL {
            let key = format!("COVID_ODATA_{}_URL", metric.slug().to_ascii_uppercase());
            if let Some(source) = var(&key) {
                self.sources.set(metric, source);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        self.odata_prefix = self.odata_prefix.trim_matches('/').to_string();
        if self.odata_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                key: "odata_prefix".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.fetch.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "fetch_timeout_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        for metric in MetricKind::ALL {
            if self.sources.get(metric).trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: format!("sources.{}", metric.slug()),
                    message: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => {
            info!("{key} not set, using default");
            None
        }
    }
}

fn try_load<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: Display,
{
    let Some(raw) = var(key) else {
        return Ok(None);
    };
    raw.trim().parse().map(Some).map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }
    })
}
