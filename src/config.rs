use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::PkgError;

pub const CONFIG_FILE: &str = "config.json";
pub const DEFAULT_CATALOG_URL: &str = "https://orbispatches.com";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub merge: Option<bool>,
    #[serde(default)]
    pub delete_pieces: Option<bool>,
    #[serde(default)]
    pub catalog_url: Option<String>,
}

/// Command line values that win over whatever the config file says.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_dir: Option<Utf8PathBuf>,
    pub merge: Option<bool>,
    pub delete_pieces: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub output_dir: Utf8PathBuf,
    pub merge: bool,
    pub delete_pieces: bool,
    pub catalog_url: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, PkgError> {
        let config = match path {
            Some(path) => Self::read(Utf8Path::new(path))?,
            None => match Self::discover() {
                Some(found) => Self::read(&found)?,
                None => {
                    tracing::debug!("no config file found, using defaults");
                    Config::default()
                }
            },
        };

        Ok(Self::resolve_config(config, overrides))
    }

    pub fn resolve_config(config: Config, overrides: &ConfigOverrides) -> ResolvedConfig {
        let output_dir = overrides
            .output_dir
            .clone()
            .or_else(|| {
                config
                    .output_dir
                    .filter(|dir| !dir.trim().is_empty())
                    .map(Utf8PathBuf::from)
            })
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        let catalog_url = config
            .catalog_url
            .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        ResolvedConfig {
            output_dir,
            merge: overrides.merge.or(config.merge).unwrap_or(true),
            delete_pieces: overrides
                .delete_pieces
                .or(config.delete_pieces)
                .unwrap_or(false),
            catalog_url,
        }
    }

    fn read(path: &Utf8Path) -> Result<Config, PkgError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| PkgError::ConfigRead(path.to_path_buf()))?;
        tracing::debug!(path = %path, "loaded config");
        serde_json::from_str(&content).map_err(|err| PkgError::ConfigParse(err.to_string()))
    }

    fn discover() -> Option<Utf8PathBuf> {
        let local = Utf8PathBuf::from(CONFIG_FILE);
        if local.as_std_path().is_file() {
            return Some(local);
        }
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.config_dir()
                        .join(env!("CARGO_PKG_NAME"))
                        .join(CONFIG_FILE),
                )
                .ok()
            })
            .filter(|path| path.as_std_path().is_file())
    }
}
