// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistence service configuration.

use serde::{Deserialize, Serialize};

/// Persistence service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file path.
    pub db_path: String,

    /// Seconds to wait after a change before writing it (`spec.md` §5
    /// "Persistence adapter": `DB_SHORT_SAVE_DELAY`).
    pub short_save_delay_secs: u64,

    /// Seconds to wait before a second, coalescing write
    /// (`DB_LONG_SAVE_DELAY`).
    pub long_save_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "drc_persist.db".to_string(),
            short_save_delay_secs: 1,
            long_save_delay_secs: 60,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Fluent builder mirroring `drc::config::RuntimeConfigBuilder`.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    db_path: Option<String>,
    short_save_delay_secs: Option<u64>,
    long_save_delay_secs: Option<u64>,
}

impl ConfigBuilder {
    pub fn db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn short_save_delay_secs(mut self, secs: u64) -> Self {
        self.short_save_delay_secs = Some(secs);
        self
    }

    pub fn long_save_delay_secs(mut self, secs: u64) -> Self {
        self.long_save_delay_secs = Some(secs);
        self
    }

    pub fn build(self) -> Config {
        let defaults = Config::default();
        Config {
            db_path: self.db_path.unwrap_or(defaults.db_path),
            short_save_delay_secs: self.short_save_delay_secs.unwrap_or(defaults.short_save_delay_secs),
            long_save_delay_secs: self.long_save_delay_secs.unwrap_or(defaults.long_save_delay_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_only_touched_fields() {
        let cfg = Config::builder().db_path("/tmp/x.db").build();
        assert_eq!(cfg.db_path, "/tmp/x.db");
        assert_eq!(cfg.short_save_delay_secs, Config::default().short_save_delay_secs);
    }
}
