use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::McpComposerConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "mcp_composer.toml",
    "mcp_composer.yaml",
    "mcp_composer.yml",
    "mcp_composer.json",
];

const APP_NAME: &str = "mcp-composer";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<McpComposerConfig> {
    let raw = read_substituted(path)?;
    parse_config(&raw, path)
}

/// Load the config as an untyped JSON tree, after env substitution.
///
/// Used by validation to look at keys the typed schema would silently drop.
pub fn load_config_value(path: &Path) -> Result<serde_json::Value> {
    let raw = read_substituted(path)?;
    parse_config_value(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./mcp_composer.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/mcp-composer/mcp_composer.{toml,yaml,yml,json}` (user-global)
///
/// Returns `McpComposerConfig::default()` if no config file is found or the
/// one found cannot be parsed.
pub fn discover_and_load() -> McpComposerConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    McpComposerConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    find_config_file_in(Path::new("."), config_dir().as_deref())
}

fn find_config_file_in(local_dir: &Path, global_dir: Option<&Path>) -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(|name| local_dir.join(name));
    let global = global_dir
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/mcp-composer/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|d| d.config_dir().to_path_buf())
}

fn read_substituted(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(substitute_env(&raw))
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

/// Parse already-substituted config text, picking the format from `path`.
pub fn parse_config(raw: &str, path: &Path) -> Result<McpComposerConfig> {
    match extension(path) {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

fn parse_config_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    match extension(path) {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            serde_json::to_value(v).context("TOML document has no JSON equivalent")
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            serde_json::to_value(v).context("YAML document has no JSON equivalent")
        },
        "json" => Ok(serde_json::from_str(raw)?),
        ext => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}
