//! Error types for configuration loading.
//!
//! This module defines all errors that can occur while reading and parsing
//! the files under `.diagmon/`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// `config.toml` is not valid TOML or does not match `GlobalConfig`.
    #[error("Invalid global configuration in {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A rule file is not valid YAML or does not match `CollectionRuleOptions`.
    #[error("Invalid collection rule in {path}: {source}")]
    YamlParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Cannot list rule files under {path}: {source}")]
    DirectoryWalk {
        path: PathBuf,
        source: walkdir::Error,
    },

    /// Two rule files define a rule with the same name.
    #[error("Duplicate collection rule '{name}' in {path}")]
    DuplicateRule { path: PathBuf, name: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
