use super::types::BeaconConfig;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration.
    ///
    /// With an explicit path only that file is read. Otherwise the user config
    /// is layered under the project config. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<BeaconConfig> {
        let paths: Vec<PathBuf> = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => Self::user_config_path()
                .into_iter()
                .chain(std::iter::once(Self::project_config_path()))
                .filter(|p| p.exists())
                .collect(),
        };

        let mut config = Self::load_layers(&paths)?;
        config.exposures = config
            .exposures
            .apply_env_overrides(|name| std::env::var(name).ok());
        config.exposures.validate()?;
        Ok(config)
    }

    /// Merge the given files in order (later files override earlier ones)
    pub fn load_layers(paths: &[PathBuf]) -> Result<BeaconConfig> {
        let mut merged = toml::Table::new();

        for path in paths {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let layer: toml::Table = toml::from_str(&contents)
                .with_context(|| format!("parsing config {}", path.display()))?;
            merge_tables(&mut merged, layer);
        }

        let config: BeaconConfig = toml::Value::Table(merged).try_into()?;
        Ok(config)
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "beacon").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with BEACON_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("BEACON_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".beacon/config.toml")
        }
    }
}

/// Overlay values replace base values; nested tables merge key by key
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge_tables(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
