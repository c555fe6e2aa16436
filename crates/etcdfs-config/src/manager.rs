use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{Config, ConfigError};

/// Holds the live configuration and swaps in reloaded versions atomically.
pub struct ConfigManager<T: Config> {
    config: ArcSwap<T>,
    path: Option<PathBuf>,
}

impl<T: Config> ConfigManager<T> {
    pub fn new(config: T) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            path: None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = T::from_toml_str(&content)?;
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> arc_swap::Guard<Arc<T>> {
        self.config.load()
    }

    pub fn update(&self, new_config: T) -> Result<(), ConfigError> {
        new_config.validate()?;
        self.config.store(Arc::new(new_config));
        Ok(())
    }
}

impl<T: Config + Clone> ConfigManager<T> {
    /// Re-read the backing file and apply only its hot-updatable fields.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = std::fs::read_to_string(path)?;
        let new_config = T::from_toml_str(&content)?;

        let mut current = (*self.config.load_full()).clone();
        current.hot_update(&new_config);
        current.validate()?;
        self.config.store(Arc::new(current));

        tracing::info!(path = %path.display(), "config reloaded");
        Ok(())
    }

    pub fn snapshot(&self) -> T {
        (*self.config.load_full()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Clone, Debug, Config)]
    struct PingConfig {
        #[config(default = "_ping")]
        key: String,
        #[config(default = 3000, min = 1, hot_updated)]
        timeout_ms: u64,
    }

    #[derive(Clone, Debug, Config)]
    struct ServiceConfig {
        #[config(default = ["127.0.0.1:2379"])]
        endpoints: Vec<String>,
        #[config(default = false)]
        verbose: bool,
        #[config(section)]
        ping: PingConfig,
    }

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.endpoints, vec!["127.0.0.1:2379".to_string()]);
        assert!(!cfg.verbose);
        assert_eq!(cfg.ping.key, "_ping");
        assert_eq!(cfg.ping.timeout_ms, 3000);
    }

    #[test]
    fn test_load_and_get() {
        let file = write_config(
            r#"
            endpoints = ["10.0.0.1:2379", "10.0.0.2:2379"]
            [ping]
            timeout_ms = 500
            "#,
        );
        let mgr = ConfigManager::<ServiceConfig>::load(file.path()).unwrap();
        let cfg = mgr.get();
        assert_eq!(cfg.endpoints.len(), 2);
        assert_eq!(cfg.ping.timeout_ms, 500);
        assert_eq!(cfg.ping.key, "_ping");
        assert_eq!(mgr.path(), Some(file.path()));
    }

    #[test]
    fn test_type_mismatch() {
        let err = ServiceConfig::from_toml_str(r#"endpoints = "not-a-list""#).unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { ref field, .. } if field == "endpoints"));

        let err = ServiceConfig::from_toml_str("endpoints = [1, 2]").unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));
    }

    #[test]
    fn test_out_of_range() {
        let err = ServiceConfig::from_toml_str("[ping]\ntimeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { ref field, .. } if field == "timeout_ms"));
    }

    #[test]
    fn test_reload_applies_hot_fields_only() {
        let file = write_config("verbose = false\n[ping]\ntimeout_ms = 100\n");
        let mgr = ConfigManager::<ServiceConfig>::load(file.path()).unwrap();

        std::fs::write(
            file.path(),
            "verbose = true\n[ping]\nkey = \"other\"\ntimeout_ms = 900\n",
        )
        .unwrap();
        mgr.reload().unwrap();

        let cfg = mgr.snapshot();
        assert_eq!(cfg.ping.timeout_ms, 900);
        assert_eq!(cfg.ping.key, "_ping");
        assert!(!cfg.verbose);
    }

    #[test]
    fn test_update_rejects_invalid() {
        let mgr = ConfigManager::new(ServiceConfig::default());
        let mut bad = ServiceConfig::default();
        bad.ping.timeout_ms = 0;
        assert!(mgr.update(bad).is_err());
        assert_eq!(mgr.get().ping.timeout_ms, 3000);
    }

    #[test]
    fn test_render_parses_back() {
        let mut cfg = ServiceConfig::default();
        cfg.endpoints = vec!["a:1".into(), "b:2".into()];
        cfg.ping.timeout_ms = 42;
        let rendered = cfg.render();
        let parsed = ServiceConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed.endpoints, cfg.endpoints);
        assert_eq!(parsed.ping.timeout_ms, 42);
    }
}
