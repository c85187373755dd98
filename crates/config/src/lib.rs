//! Layered configuration for strata.
//!
//! Values are merged from, in increasing order of precedence: built-in
//! defaults, an optional configuration file (TOML, YAML or JSON, chosen by
//! extension), and environment variables prefixed with `STRATA_` where `__`
//! separates nested keys (e.g. `STRATA_CACHE__MAX_SIZE_BYTES=1073741824`).

mod cache;
pub mod error;

pub use crate::cache::{CacheConfig, DEFAULT_SALT};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::instrument;

const ENV_PREFIX: &str = "STRATA_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
}
impl Config {
    /// Load configuration from defaults, an optional file, and the environment.
    #[instrument(level = "debug")]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let figment = Self::figment(file)?.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
    }

    /// Defaults merged with an optional file, without the environment.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let Some(path) = file else {
            return Ok(figment);
        };
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Ok(match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        })
    }

    /// Extract and validate a configuration from any figment.
    pub fn extract(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        if let Err(reason) = config.cache.validate() {
            exn::bail!(ErrorKind::Invalid(reason));
        }
        tracing::debug!(root = %config.cache.root.display(), "Loaded configuration");
        Ok(config)
    }
}
