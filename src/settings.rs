use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_SOURCE_URL: &str = "https://licensinginfo.lcb.wa.gov/EntireStateWeb.asp";
pub const DEFAULT_GEOCODIO_URL: &str = "https://api.geocod.io/v1.7";
pub const DEFAULT_DB_PATH: &str = "data/licenses.sqlite";
pub const DEFAULT_RETENTION_DAYS: i64 = 180;
/// Upper bound on the retention window, far inside what chrono can represent.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Sqlite,
    /// Nothing survives the process; useful for dry runs.
    Memory,
}

/// Process-wide settings, loaded once in `main` and passed down by reference.
#[derive(Clone, Deserialize)]
pub struct Settings {
    pub source_url: String,
    pub db_path: PathBuf,
    pub store: StoreKind,
    pub geocodio_api_key: Option<String>,
    pub geocodio_url: String,
    pub retention_days: i64,
    pub sweep: bool,
}

impl Settings {
    /// Defaults, then `licensing.toml` (optional), then `LCB_*` environment variables.
    pub fn load() -> Result<Self> {
        let cfg = Config::builder()
            .set_default("source_url", DEFAULT_SOURCE_URL)?
            .set_default("db_path", DEFAULT_DB_PATH)?
            .set_default("store", "sqlite")?
            .set_default("geocodio_url", DEFAULT_GEOCODIO_URL)?
            .set_default("retention_days", DEFAULT_RETENTION_DAYS)?
            .set_default("sweep", true)?
            .add_source(File::with_name("licensing").required(false))
            .add_source(Environment::with_prefix("LCB").try_parsing(true))
            .build()?;

        let mut settings: Settings = cfg.try_deserialize()?;
        if settings.geocodio_api_key.is_none() {
            settings.geocodio_api_key = std::env::var("GEOCODIO_API_KEY").ok();
        }
        settings.geocodio_api_key = settings.geocodio_api_key.filter(|k| !k.trim().is_empty());
        settings.validate()?;
        Ok(settings)
    }

    /// A non-positive window would put the sweep cutoff at or after now.
    fn validate(&self) -> Result<()> {
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(Error::InvalidSetting(
                "retention_days",
                format!(
                    "must be between 1 and {}, got {}",
                    MAX_RETENTION_DAYS, self.retention_days
                ),
            ));
        }
        Ok(())
    }

    /// The geocoder key is only needed for a scrape run, not for schema setup.
    pub fn require_geocodio_key(&self) -> Result<&str> {
        self.geocodio_api_key
            .as_deref()
            .ok_or(Error::MissingSetting("geocodio_api_key", "GEOCODIO_API_KEY"))
    }
}

// Hand-written so the API key never reaches the logs.
impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("source_url", &self.source_url)
            .field("db_path", &self.db_path)
            .field("store", &self.store)
            .field("geocodio_api_key", &self.geocodio_api_key.as_ref().map(|_| "<redacted>"))
            .field("geocodio_url", &self.geocodio_url)
            .field("retention_days", &self.retention_days)
            .field("sweep", &self.sweep)
            .finish()
    }
}

#[cfg(test)]
impl Settings {
    pub fn for_tests() -> Self {
        Settings {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            store: StoreKind::Memory,
            geocodio_api_key: None,
            geocodio_url: DEFAULT_GEOCODIO_URL.to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
            sweep: true,
        }
    }
}
