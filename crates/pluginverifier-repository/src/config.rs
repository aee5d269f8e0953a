use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::files::DiskSpaceSetting;
use crate::resources::SpaceAmount;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// Tags appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "pluginverifier".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Disk limits of the download repository.
///
/// Without `max_space`, downloaded files are kept until they are removed explicitly.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct DownloadsConfig {
    pub max_space: Option<SpaceAmount>,
    /// Defaults to 80% of `max_space`.
    pub low_space_threshold: Option<SpaceAmount>,
}

impl DownloadsConfig {
    pub fn disk_space(&self) -> Option<DiskSpaceSetting> {
        let max_space = self.max_space?;
        let mut setting = DiskSpaceSetting::new(max_space);
        if let Some(threshold) = self.low_space_threshold {
            setting.low_space_threshold = threshold.min(max_space);
        }
        Some(setting)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ArchivesConfig {
    /// How long an archive stays open after its last user released it.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for ArchivesConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RepositoriesConfig {
    pub downloads: DownloadsConfig,
    pub archives: ArchivesConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory of all file repositories.
    pub cache_dir: Option<PathBuf>,

    pub logging: Logging,

    pub metrics: Metrics,

    pub repositories: RepositoriesConfig,
}

impl Config {
    /// Return a cache directory `dir`, it is joined with the configured base cache directory.
    pub fn cache_dir<P>(&self, dir: P) -> Option<PathBuf>
    where
        P: AsRef<Path>,
    {
        self.cache_dir.as_ref().map(|base| base.join(dir))
    }

    /// Loads the configuration from `path`, or returns the defaults without a path.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

/// Default value for the "cache_dir" configuration.
fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("plugin-verifier"))
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: default_cache_dir(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            repositories: RepositoriesConfig::default(),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    const LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

    let level = String::deserialize(deserializer)?;
    if !LEVELS.contains(&level.as_str()) {
        return Err(de::Error::unknown_variant(&level, LEVELS));
    }
    LevelFilter::from_str(&level).map_err(de::Error::custom)
}
