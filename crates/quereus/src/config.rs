//! Engine-wide configuration, built with the `Config` builder-closure
//! extension trait used throughout the corpus for option structs
//! (`cfg.config(|c| { ... })` rather than a separate builder type).

use quereus_helpers::Config;

/// Options handed to `Database::open`. Every field has a sane default, so
/// `EngineConfig::default()` (or `Database::open(Default::default())`) is
/// always a valid starting point.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The module name a `CREATE TABLE` statement registers its table
    /// under.
    pub default_module: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { default_module: "memory".to_string() }
    }
}

impl Config for EngineConfig {}
