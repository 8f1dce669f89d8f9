//! Configuration file loader for the `.diagmon/` directory structure.
//!
//! This module loads:
//! - `config.toml`: Global settings
//! - `rules/*.yaml` / `rules/*.yml`: Collection rule definitions

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::AppConfig;
use dm_protocol::config_models::GlobalConfig;
use dm_protocol::rule_models::CollectionRuleOptions;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name of the configuration directory under the root.
pub const CONFIG_DIR: &str = ".diagmon";

/// Loads all configuration from the `.diagmon/` directory.
///
/// # Arguments
///
/// * `root` - Root directory containing the `.diagmon/` folder
///
/// # Returns
///
/// An `AppConfig` containing all loaded configuration. Missing directories
/// or files yield defaults rather than errors.
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - Files exist but cannot be read
/// - Files have invalid TOML or YAML syntax
/// - Two rule files define the same rule name
///
/// # Example
///
/// ```rust,no_run
/// use dm_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Loaded {} rules", config.rules.len());
/// # Ok(())
/// # }
/// ```
pub async fn load_config(root: &Path) -> ConfigResult<AppConfig> {
    let config_dir = root.join(CONFIG_DIR);

    if !config_dir.exists() {
        tracing::debug!(path = %config_dir.display(), "no configuration directory, using defaults");
        return Ok(AppConfig::default());
    }

    let global = load_global_config(&config_dir)?;
    let rules = load_rules(&config_dir)?;
    tracing::debug!(rules = rules.len(), "configuration loaded");

    Ok(AppConfig { global, rules })
}

/// Loads global configuration from `config.toml`.
fn load_global_config(config_dir: &Path) -> ConfigResult<GlobalConfig> {
    let config_path = config_dir.join("config.toml");

    if !config_path.exists() {
        return Ok(GlobalConfig::default());
    }

    let content =
        std::fs::read_to_string(&config_path).map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: config_path,
        source,
    })
}

/// Loads every collection rule from `rules/`, one rule per file.
fn load_rules(config_dir: &Path) -> ConfigResult<Vec<CollectionRuleOptions>> {
    let rules_dir = config_dir.join("rules");

    if !rules_dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(&rules_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| ConfigError::DirectoryWalk {
            path: rules_dir.clone(),
            source,
        })?;

        let path = entry.path();
        let ext = path.extension().and_then(|s| s.to_str());
        if ext == Some("yaml") || ext == Some("yml") {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();

    let mut names = HashSet::new();
    let mut rules = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
            path: path.clone(),
            source,
        })?;

        let rule: CollectionRuleOptions =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlParse {
                path: path.clone(),
                source,
            })?;

        if !names.insert(rule.name.clone()) {
            return Err(ConfigError::DuplicateRule {
                path,
                name: rule.name,
            });
        }
        rules.push(rule);
    }

    Ok(rules)
}
