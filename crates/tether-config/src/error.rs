//! Configuration error types.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors from reading, writing or checking tether config files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render config as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value the session store cannot run with.
    #[error("invalid config: {0}")]
    Invalid(String),
}
