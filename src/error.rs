use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required setting `{0}` (set LCB_{1} or add it to licensing.toml)")]
    MissingSetting(&'static str, &'static str),

    #[error("invalid setting `{0}`: {1}")]
    InvalidSetting(&'static str, String),

    #[error("source page returned HTTP {0}")]
    FetchStatus(reqwest::StatusCode),

    #[error("geocoder returned HTTP {0}")]
    GeocoderStatus(reqwest::StatusCode),

    #[error("geocoder returned {got} results for {sent} addresses")]
    GeocoderShape { sent: usize, got: usize },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
