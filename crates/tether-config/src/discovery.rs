//! Locating and layering `tether` config files.
//!
//! Two layers are read, the second overriding the first section by section:
//!
//! - the user file, `config.toml` in `$TETHER_CONFIG_DIR` or the platform
//!   config dir (`~/.config/tether` on Linux)
//! - the project file, `tether.toml` in the working directory
//!
//! Command-line flags are applied on top by the binary.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, TetherConfig};

const PROJECT_FILE_NAME: &str = "tether.toml";
const USER_FILE_NAME: &str = "config.toml";
const CONFIG_SUBDIR: &str = "tether";
const CONFIG_DIR_VAR: &str = "TETHER_CONFIG_DIR";

/// Which layer a config file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    User,
    Project,
}

/// What happened to one candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerStatus {
    Loaded,
    Missing,
    /// Present but unreadable or not valid TOML; the message says why.
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: Layer,
    pub path: PathBuf,
    pub status: LayerStatus,
}

impl ConfigSource {
    pub fn is_loaded(&self) -> bool {
        self.status == LayerStatus::Loaded
    }
}

/// Merged configuration plus a record of every file considered, lowest
/// precedence first.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: TetherConfig,
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    /// Files that contributed to the merged config.
    pub fn loaded_from(&self) -> impl Iterator<Item = &Path> {
        self.sources
            .iter()
            .filter(|source| source.is_loaded())
            .map(|source| source.path.as_path())
    }

    /// One line per rejected file, for logging.
    pub fn warnings(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter_map(|source| match &source.status {
                LayerStatus::Rejected(reason) => {
                    Some(format!("ignoring {}: {reason}", source.path.display()))
                }
                _ => None,
            })
            .collect()
    }
}

/// Discover and merge the user and project layers.
///
/// `project_dir` defaults to the working directory.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], reading the user layer from `config_dir` instead of
/// `$TETHER_CONFIG_DIR` or the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let user_file = config_dir
        .map(|dir| dir.join(USER_FILE_NAME))
        .or_else(xdg_config_path);
    let project_file = match project_dir {
        Some(dir) => dir.join(PROJECT_FILE_NAME),
        None => PathBuf::from(PROJECT_FILE_NAME),
    };

    let candidates = user_file
        .map(|path| (Layer::User, path))
        .into_iter()
        .chain(std::iter::once((Layer::Project, project_file)));

    let mut config = TetherConfig::new();
    let sources = candidates
        .map(|(layer, path)| {
            let status = apply_layer(&mut config, &path);
            ConfigSource {
                layer,
                path,
                status,
            }
        })
        .collect();

    Ok(LoadedConfig { config, sources })
}

/// Read one config file without discovery or layering.
pub fn load_config_file(path: &Path) -> Result<TetherConfig> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    TetherConfig::from_toml(&text)
}

/// Write `config` to `path`, creating missing parent directories.
pub fn save_config(config: &TetherConfig, path: &Path) -> Result<()> {
    let write_error = |at: &Path| {
        let at = at.to_path_buf();
        move |source| ConfigError::WriteFile { path: at, source }
    };

    let text = config.to_toml()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error(parent))?;
    }
    fs::write(path, text).map_err(write_error(path))
}

/// The user-level config file, if a config directory can be determined.
pub fn xdg_config_path() -> Option<PathBuf> {
    Some(xdg_config_dir()?.join(USER_FILE_NAME))
}

/// `$TETHER_CONFIG_DIR` when set and non-empty, else `<config dir>/tether`.
pub fn xdg_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_VAR) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|base| base.join(CONFIG_SUBDIR)),
    }
}

fn apply_layer(config: &mut TetherConfig, path: &Path) -> LayerStatus {
    if !path.is_file() {
        return LayerStatus::Missing;
    }
    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            LayerStatus::Loaded
        }
        Err(e) => LayerStatus::Rejected(e.to_string()),
    }
}
