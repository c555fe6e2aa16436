//! Mount configuration.
//!
//! Fields marked `hot_updated` are picked up on SIGHUP without remounting.

use std::time::Duration;

use etcdfs_config::Config;

use crate::readdir::ListLimits;

#[derive(Clone, Debug, Config)]
pub struct FuseConfig {
    /// Filesystem mount point.
    #[config(default = "")]
    pub mountpoint: String,

    /// Source name shown in the mount table.
    #[config(default = "etcdfs")]
    pub fs_name: String,

    /// Extra `-o` options passed through to the kernel as is.
    #[config(default = [])]
    pub mount_options: Vec<String>,

    #[config(default = false)]
    pub allow_other: bool,

    #[config(default = false)]
    pub auto_unmount: bool,

    #[config(default = false)]
    pub readonly: bool,

    // ---- Kernel cache TTLs ----
    #[config(default = 200, hot_updated)]
    pub attr_timeout_ms: u64,

    #[config(default = 200, hot_updated)]
    pub entry_timeout_ms: u64,

    /// Open files with `FOPEN_DIRECT_IO` so reads always hit the buffer.
    #[config(default = true)]
    pub direct_io: bool,

    // ---- Directory listing ----
    /// Keys fetched per range scan.
    #[config(default = 500, min = 1, max = 10000, hot_updated)]
    pub readdir_page_size: usize,

    /// Children listed before a directory is cut off with a warning.
    #[config(default = 1000, min = 1, max = 1000000, hot_updated)]
    pub readdir_max_entries: usize,

    /// Largest value a single file may grow to, in bytes.
    #[config(default = 67108864, min = 1)]
    pub max_file_size: u64,
}

impl FuseConfig {
    pub fn attr_timeout(&self) -> Duration {
        Duration::from_millis(self.attr_timeout_ms)
    }

    pub fn entry_timeout(&self) -> Duration {
        Duration::from_millis(self.entry_timeout_ms)
    }

    pub fn list_limits(&self) -> ListLimits {
        ListLimits {
            page_size: self.readdir_page_size,
            max_entries: self.readdir_max_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = FuseConfig::default();
        assert_eq!(cfg.fs_name, "etcdfs");
        assert!(cfg.mount_options.is_empty());
        assert!(!cfg.readonly);
        assert!(cfg.direct_io);
        assert_eq!(cfg.attr_timeout(), Duration::from_millis(200));
        assert_eq!(cfg.entry_timeout(), Duration::from_millis(200));
        assert_eq!(cfg.list_limits(), ListLimits::default());
        assert_eq!(cfg.max_file_size, 64 << 20);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let value: toml::Value = r#"
            mountpoint = "/mnt/etcd"
            mount_options = ["noatime", "default_permissions"]
            readonly = true
            readdir_page_size = 64
        "#
        .parse()
        .unwrap();
        let cfg = FuseConfig::from_toml(&value).unwrap();
        assert_eq!(cfg.mountpoint, "/mnt/etcd");
        assert_eq!(cfg.mount_options, vec!["noatime", "default_permissions"]);
        assert!(cfg.readonly);
        assert_eq!(cfg.list_limits().page_size, 64);
        assert_eq!(cfg.list_limits().max_entries, 1000);
    }

    #[test]
    fn test_validate_page_size_bounds() {
        let zero = FuseConfig {
            readdir_page_size: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        let huge = FuseConfig {
            readdir_page_size: 10001,
            ..Default::default()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_hot_update_only_touches_hot_fields() {
        let mut current = FuseConfig::default();
        let incoming = FuseConfig {
            attr_timeout_ms: 5000,
            readdir_max_entries: 10,
            readonly: true,
            mountpoint: "/elsewhere".into(),
            ..Default::default()
        };
        current.hot_update(&incoming);
        assert_eq!(current.attr_timeout_ms, 5000);
        assert_eq!(current.readdir_max_entries, 10);
        assert!(!current.readonly);
        assert_eq!(current.mountpoint, "");
    }
}
