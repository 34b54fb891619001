#![forbid(unsafe_code)]

mod error;
mod inference;
mod prefetch;
mod segment_cache;
mod selector;

pub use error::Error;
pub use inference::InferenceConfig;
pub use prefetch::{PrefetchConfig, PreloadHorizons};
pub use segment_cache::SegmentCacheConfig;
pub use selector::{Band, BandTable, MAX_TOTAL_SCORE, SelectorConfig};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variables with this prefix override file values. Nested keys
/// are separated by `__`, e.g. `EDGED_SEGMENT_CACHE__L1_MAX_MB`.
pub const ENV_PREFIX: &str = "EDGED_";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub segment_cache: SegmentCacheConfig,
    pub prefetch: PrefetchConfig,
    pub inference: InferenceConfig,
    pub selector: SelectorConfig,
}

impl Config {
    /// Built-in defaults, no file or environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overlaid by the TOML file at `path`, overlaid by the
    /// environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::InvalidPath(path.to_owned()));
        }
        Self::extract(
            Self::defaults()
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Defaults overlaid by the environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::extract(Self::defaults().merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn to_toml_string(&self) -> Result<String, Error> {
        Ok(toml_edit::ser::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: &str| Err(Error::Invalid(msg.to_owned()));

        if self.segment_cache.l1_max_mb == 0 {
            return invalid("segment_cache.l1_max_mb must be positive");
        }
        if self.segment_cache.l2_max_gb == 0 {
            return invalid("segment_cache.l2_max_gb must be positive");
        }
        if self.segment_cache.l2_cleanup_interval.is_zero() {
            return invalid("segment_cache.l2_cleanup_interval must be positive");
        }
        if self.prefetch.workers == 0 {
            return invalid("prefetch.workers must be positive");
        }
        if self.prefetch.queue_capacity == 0 {
            return invalid("prefetch.queue_capacity must be positive");
        }
        if self.prefetch.segment_duration.is_zero() {
            return invalid("prefetch.segment_duration must be positive");
        }
        if self.prefetch.sweep_interval.is_zero() {
            return invalid("prefetch.sweep_interval must be positive");
        }
        if self.inference.max_entries == 0 {
            return invalid("inference.max_entries must be positive");
        }
        if self.selector.max_score() > MAX_TOTAL_SCORE {
            return Err(Error::Invalid(format!(
                "selector band tables award up to {} points, more than {MAX_TOTAL_SCORE}",
                self.selector.max_score()
            )));
        }
        for (name, table) in self.selector.tables() {
            if !table.is_ascending() {
                return Err(Error::Invalid(format!(
                    "selector.{name} thresholds must be finite and strictly ascending"
                )));
            }
        }
        Ok(())
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    fn extract(figment: Figment) -> Result<Self, Error> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}
