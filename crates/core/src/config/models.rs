//! Configuration models that aggregate all settings.

use dm_protocol::config_models::GlobalConfig;
use dm_protocol::rule_models::CollectionRuleOptions;

/// Unified configuration loaded from the `.diagmon/` directory.
///
/// - `config.toml`: Global settings (limits, egress providers, rule defaults)
/// - `rules/*.yaml`: Collection rule definitions
///
/// # Example
///
/// ```rust,no_run
/// use dm_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Loaded {} collection rules", config.rules.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    /// Global settings from `config.toml`.
    pub global: GlobalConfig,

    /// Collection rules from `rules/*.yaml`, ordered by file name.
    pub rules: Vec<CollectionRuleOptions>,
}

impl AppConfig {
    pub fn rule(&self, name: &str) -> Option<&CollectionRuleOptions> {
        self.rules.iter().find(|rule| rule.name == name)
    }
}
