use std::path::PathBuf;

use serde::Deserialize;

/// Snapshot store backend configuration
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "dir", rename_all(deserialize = "lowercase"))]
pub enum StoreConfig {
    /// In-memory store, data is lost on restart
    Memory,
    /// Directory backed store
    Local(PathBuf),
}

impl Default for StoreConfig {
    #[inline]
    fn default() -> Self {
        StoreConfig::Local(PathBuf::from("/var/lib/snapvault"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn store_config_should_deserialize() {
        /// helper wrapper to give toml a table to parse into
        #[derive(Deserialize)]
        struct Wrapper {
            /// the store section under test
            store: StoreConfig,
        }

        let local: Wrapper = toml::from_str(
            r#"
            [store]
            type = "local"
            dir = "/data/backups"
            "#,
        )
        .unwrap();
        assert_eq!(local.store, StoreConfig::Local(PathBuf::from("/data/backups")));

        let memory: Wrapper = toml::from_str(
            r#"
            [store]
            type = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(memory.store, StoreConfig::Memory);
    }
}
