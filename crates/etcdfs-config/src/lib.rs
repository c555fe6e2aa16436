//! Typed TOML configuration with defaults, range validation and hot reload.
//!
//! Structs opt in with `#[derive(Config)]`; each field declares its default
//! and optionally `min`/`max` bounds, `hot_updated`, `section` (a nested
//! `Config` table) or `serde` (a table decoded through serde).

extern crate self as etcdfs_config;

mod manager;

pub use etcdfs_config_derive::Config;
pub use manager::ConfigManager;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("field `{field}` has wrong type, expected {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("field `{field}` = {value} is out of range (min {min:?}, max {max:?})")]
    OutOfRange {
        field: String,
        value: String,
        min: Option<String>,
        max: Option<String>,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A configuration struct that can be parsed, rendered, validated and
/// partially updated in place.
pub trait Config: Sized + Send + Sync + 'static {
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError>;

    /// Copy every `hot_updated` field (recursively through sections) from `other`.
    fn hot_update(&mut self, other: &Self);

    fn render(&self) -> String;

    fn validate(&self) -> Result<(), ConfigError>;

    fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let value: toml::Value = s.parse()?;
        let config = Self::from_toml(&value)?;
        config.validate()?;
        Ok(config)
    }
}
