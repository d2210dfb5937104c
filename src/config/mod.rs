//! Typed configuration.
//!
//! Process-level settings come from environment variables (`Config`).
//! Per-run crawl parameters (`RunConfig`) come from an optional TOML file,
//! overridden by command-line flags, and are validated before any seed is
//! read.

pub mod secrets;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::model::{GeoPoint, Params};
use secrets::SecretString;

/// Sentinel input path meaning "read standard input".
pub const STDIN: &str = "stdin";
/// Sentinel results path meaning "write standard output".
pub const STDOUT: &str = "stdout";

#[derive(Debug)]
pub struct Config {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub proxies: Vec<SecretString>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        if log_level.trim().is_empty() {
            return Err(Error::Config("LOG_LEVEL is set but empty".to_string()));
        }

        Ok(Self {
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok().filter(|s| !s.is_empty()),
            log_level,
            proxies: std::env::var("CRAWLQ_PROXIES")
                .map(|raw| secrets::parse_proxy_list(&raw))
                .unwrap_or_default(),
        })
    }
}

/// Parameters for one crawl run.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Seed source: a file path or `stdin`.
    pub input: String,
    /// Result destination: a file path or `stdout`.
    pub results: String,
    pub lang: String,
    pub max_depth: u32,
    /// `lat,lon`. Required in fast mode.
    pub geo: Option<String>,
    pub zoom: u8,
    /// Search radius in meters.
    pub radius: f64,
    pub email: bool,
    pub extra_reviews: bool,
    pub fast_mode: bool,
    /// Maximum items executing at once.
    pub concurrency: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub exit_on_inactivity: Duration,
    /// Collapse repeated queries into one seed. Queries are compared with
    /// case and runs of whitespace folded.
    pub dedup_queries: bool,
    /// Executable run once per work item by the hook executor.
    pub hook: Option<PathBuf>,
    #[serde(skip)]
    pub proxies: Vec<SecretString>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input: STDIN.to_string(),
            results: STDOUT.to_string(),
            lang: "en".to_string(),
            max_depth: 10,
            geo: None,
            zoom: 15,
            radius: 10_000.0,
            email: false,
            extra_reviews: false,
            fast_mode: false,
            concurrency: default_concurrency(),
            exit_on_inactivity: Duration::from_secs(180),
            dedup_queries: false,
            hook: None,
            proxies: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Load run parameters from a TOML file. Missing keys keep defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read run config {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad run config {}: {e}", path.display())))
    }

    /// Check the parameters before any run state exists.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.exit_on_inactivity.is_zero() {
            return Err(Error::Config(
                "exit-on-inactivity must be greater than zero".to_string(),
            ));
        }
        if self.lang.trim().is_empty() {
            return Err(Error::Config("language code must not be empty".to_string()));
        }

        let geo = self.geo_point()?;
        if self.fast_mode {
            if geo.is_none() {
                return Err(Error::Config(
                    "geo coordinates are required in fast mode".to_string(),
                ));
            }
            if !(1..=21).contains(&self.zoom) {
                return Err(Error::Config(format!(
                    "invalid zoom level {}: must be between 1 and 21",
                    self.zoom
                )));
            }
            if self.radius < 0.0 {
                return Err(Error::Config(format!(
                    "invalid radius {}: must not be negative",
                    self.radius
                )));
            }
        }

        Ok(())
    }

    /// The parameter bag every seed (and so every descendant) carries.
    pub fn params(&self) -> Result<Params> {
        Ok(Params {
            lang: self.lang.clone(),
            geo: self.geo_point()?,
            zoom: self.zoom,
            radius: self.radius,
            email: self.email,
            extra_reviews: self.extra_reviews,
            fast_mode: self.fast_mode,
        })
    }

    fn geo_point(&self) -> Result<Option<GeoPoint>> {
        self.geo
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .map(|g| g.parse::<GeoPoint>())
            .transpose()
    }
}

/// Half the available CPUs, at least one.
pub fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cpus / 2).max(1)
}

/// Parse `90s`, `3m`, `1h`, `250ms`, or bare seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let bad = || Error::Config(format!("invalid duration: {raw:?}"));

    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().map_err(|_| bad())?;

    let secs = |per: u64| {
        value
            .checked_mul(per)
            .map(Duration::from_secs)
            .ok_or_else(|| Error::Config(format!("duration out of range: {raw:?}")))
    };

    match unit {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => secs(60),
        "h" => secs(3600),
        _ => Err(bad()),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
