//! Configuration system for tether.
//!
//! Provides TOML-based configuration with:
//! - A `[session]` section mapping onto the store's `StoreConfig`
//! - `[database]`, `[sweeps]` and `[logging]` sections for the server
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, Layer, LayerStatus, LoadedConfig, load_config, load_config_file, load_config_with_options, save_config,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
