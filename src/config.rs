use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;

/// Environment variable pointing at a JSON cluster configuration file.
pub const CONFIG_ENV_VAR: &str = "CLUSTER_CONFIG";

/// Configuration handed to the engine factory when creating an owned
/// instance.
///
/// The engine itself owns the interpretation of `properties`; this crate only
/// loads and forwards them. A missing configuration is not an error - the
/// engine proceeds with its built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Logical cluster name; instances with different names must not join
    /// each other.
    #[serde(default)]
    pub cluster_name: Option<String>,

    /// Free-form engine properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ClusterConfig {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: Some(cluster_name.into()),
            properties: BTreeMap::new(),
        }
    }

    /// Load configuration from the file named by `CLUSTER_CONFIG`.
    ///
    /// Returns `None` when the variable is unset or the file does not exist.
    /// An unreadable or unparsable file is logged and also yields `None`;
    /// the caller falls back to engine defaults either way.
    pub fn from_env() -> Option<Self> {
        let path = env::var(CONFIG_ENV_VAR).ok()?;
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(%path, "Cluster config file not found");
                return None;
            }
            Err(e) => {
                tracing::error!(%path, "Failed to read cluster config: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(config) => {
                tracing::info!(%path, "Loaded cluster configuration");
                Some(config)
            }
            Err(e) => {
                tracing::error!(%path, "Failed to parse cluster config: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_default_is_empty() {
        let config = ClusterConfig::default();
        assert_eq!(config.cluster_name, None);
        assert!(config.properties.is_empty());
    }

    #[test]
    #[serial]
    fn test_from_env_unset_returns_none() {
        env::remove_var(CONFIG_ENV_VAR);
        assert_eq!(ClusterConfig::from_env(), None);
    }

    #[test]
    #[serial]
    fn test_from_env_missing_file_returns_none() {
        env::set_var(CONFIG_ENV_VAR, "/nonexistent/cluster.json");
        assert_eq!(ClusterConfig::from_env(), None);
        env::remove_var(CONFIG_ENV_VAR);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_json_file() {
        let dir = env::temp_dir().join(format!("cluster-bridge-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cluster.json");
        fs::write(
            &path,
            r#"{"cluster_name":"prod","properties":{"backup_count":"2"}}"#,
        )
        .unwrap();

        env::set_var(CONFIG_ENV_VAR, &path);
        let config = ClusterConfig::from_env().expect("config should load");
        env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.cluster_name.as_deref(), Some("prod"));
        assert_eq!(
            config.properties.get("backup_count").map(String::as_str),
            Some("2")
        );
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    #[serial]
    fn test_from_env_malformed_file_returns_none() {
        let dir = env::temp_dir().join(format!("cluster-bridge-bad-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cluster.json");
        fs::write(&path, "not json").unwrap();

        env::set_var(CONFIG_ENV_VAR, &path);
        assert_eq!(ClusterConfig::from_env(), None);
        env::remove_var(CONFIG_ENV_VAR);
        fs::remove_dir_all(&dir).ok();
    }
}
