use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use etcdfs_app::{force_exit_on_second_signal, wait_for_shutdown_signal, SignalListener};
use etcdfs_config::{Config, ConfigManager};
use etcdfs_fuse::session::spawn_mount;
use etcdfs_fuse::{EtcdFileSystem, FuseConfig};
use etcdfs_kv::KvStore;
use etcdfs_kv_backends::{EtcdConfig, EtcdKvStore, MemKvStore};
use etcdfs_logging::LogConfig;
use etcdfs_types::Ownership;

const UNMOUNT_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Config)]
struct EtcdfsConfig {
    #[config(section)]
    etcd: EtcdConfig,

    #[config(section)]
    fuse: FuseConfig,

    #[config(serde)]
    log: LogConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Etcd,
    /// Empty in-process store, gone on unmount.
    Memory,
}

/// Mount etcd as a local filesystem
#[derive(Parser, Debug)]
#[command(name = "etcdfs", version, about)]
struct Args {
    /// Where to mount
    mountpoint: Option<PathBuf>,

    /// etcd endpoints
    #[arg(long, value_delimiter = ',')]
    endpoints: Vec<String>,

    /// Dial timeout for client connections, in milliseconds
    #[arg(long, value_name = "MS")]
    dial_timeout: Option<u64>,

    /// Timeout for reading and writing to etcd, in milliseconds
    #[arg(long, value_name = "MS")]
    read_timeout: Option<u64>,

    #[arg(short, long)]
    verbose: bool,

    /// Identify secure client using this TLS certificate file
    #[arg(long)]
    cert: Option<String>,

    /// Identify secure client using this TLS key file
    #[arg(long)]
    key: Option<String>,

    /// Verify certificates of TLS-enabled secure servers using this CA bundle
    #[arg(long)]
    cacert: Option<String>,

    /// Options passed as -o to the kernel mount
    #[arg(long, value_delimiter = ',')]
    mount_options: Vec<String>,

    /// Mount read-only
    #[arg(long)]
    readonly: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::Etcd)]
    backend: Backend,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

impl Args {
    /// Layer command line flags over the file configuration.
    fn apply(&self, config: &mut EtcdfsConfig) -> anyhow::Result<()> {
        if let Some(mountpoint) = &self.mountpoint {
            let abs = std::path::absolute(mountpoint)
                .with_context(|| format!("resolving mount point {}", mountpoint.display()))?;
            config.fuse.mountpoint = abs.to_string_lossy().into_owned();
        }
        if !self.endpoints.is_empty() {
            config.etcd.endpoints = self.endpoints.clone();
        }
        if let Some(ms) = self.dial_timeout {
            config.etcd.dial_timeout_ms = ms;
        }
        if let Some(ms) = self.read_timeout {
            config.etcd.command_timeout_ms = ms;
        }
        if let Some(cert) = &self.cert {
            config.etcd.cert_file = cert.clone();
        }
        if let Some(key) = &self.key {
            config.etcd.key_file = key.clone();
        }
        if let Some(ca) = &self.cacert {
            config.etcd.trusted_ca_file = ca.clone();
        }
        if !self.mount_options.is_empty() {
            config.fuse.mount_options = self.mount_options.clone();
        }
        if self.readonly {
            config.fuse.readonly = true;
        }
        if self.verbose {
            config.log = config.log.clone().verbose(true);
        }
        Ok(())
    }
}

async fn open_store(backend: Backend, config: &EtcdConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    match backend {
        Backend::Memory => {
            tracing::warn!("using the in-memory backend, nothing survives unmount");
            Ok(Arc::new(MemKvStore::new()))
        }
        Backend::Etcd => {
            let store = EtcdKvStore::connect(config)
                .await
                .context("failed to connect to etcd")?;
            store.ping().await.context("etcd is not serving")?;
            Ok(Arc::new(store))
        }
    }
}

fn reload(manager: &ConfigManager<EtcdfsConfig>, fs: &EtcdFileSystem) {
    match manager.reload() {
        Ok(()) => fs.update_config(manager.get().fuse.clone()),
        Err(e) => tracing::warn!(error = %e, "config reload failed, keeping current settings"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", EtcdfsConfig::default().render());
        return Ok(());
    }

    let manager = match &args.config {
        Some(path) => ConfigManager::<EtcdfsConfig>::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigManager::new(EtcdfsConfig::default()),
    };
    let mut config = manager.snapshot();
    args.apply(&mut config)?;
    manager
        .update(config.clone())
        .context("invalid configuration")?;

    let _log_guard = etcdfs_logging::init_logging(&config.log)?;

    if config.fuse.mountpoint.is_empty() {
        anyhow::bail!("no mount point given, see --help");
    }

    let store = match open_store(args.backend, &config.etcd).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "startup failed");
            return Err(e);
        }
    };

    let fs = Arc::new(EtcdFileSystem::new(
        store,
        config.fuse.clone(),
        Ownership::current(),
    ));
    let mount = spawn_mount(fs.clone(), &config.fuse, tokio::runtime::Handle::current())
        .with_context(|| format!("failed to mount {}", config.fuse.mountpoint))?;
    tracing::info!(
        mountpoint = %mount.mountpoint(),
        "mounted, use ctrl+c to terminate"
    );

    let mut signals = SignalListener::new().context("installing signal handlers")?;
    let externally_unmounted = tokio::select! {
        _ = wait_for_shutdown_signal(&mut signals, || reload(&manager, &fs)) => false,
        _ = mount.closed() => true,
    };
    if externally_unmounted {
        tracing::info!("unmounted externally");
    } else {
        force_exit_on_second_signal(signals);
        mount.unmount(UNMOUNT_GRACE).await;
    }

    tracing::info!("bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file() {
        let mut config = EtcdfsConfig::from_toml_str(
            r#"
            [etcd]
            endpoints = ["10.0.0.1:2379"]
            dial_timeout_ms = 500

            [fuse]
            fs_name = "kv"
            attr_timeout_ms = 1000

            [log]
            level = "warn"
            "#,
        )
        .unwrap();
        assert_eq!(config.log.level, "warn");

        let args = Args::parse_from([
            "etcdfs",
            "/mnt/etcd",
            "--endpoints",
            "a:2379,b:2379",
            "--read-timeout",
            "9000",
            "--mount-options",
            "noatime",
            "-v",
        ]);
        args.apply(&mut config).unwrap();

        assert_eq!(config.fuse.mountpoint, "/mnt/etcd");
        assert_eq!(config.etcd.endpoints, vec!["a:2379", "b:2379"]);
        assert_eq!(config.etcd.dial_timeout_ms, 500);
        assert_eq!(config.etcd.command_timeout_ms, 9000);
        assert_eq!(config.fuse.mount_options, vec!["noatime"]);
        assert_eq!(config.fuse.fs_name, "kv");
        assert_eq!(config.fuse.attr_timeout_ms, 1000);
        assert_eq!(config.log.level, "debug");
        assert!(!config.fuse.readonly);
        assert_eq!(args.backend, Backend::Etcd);
    }

    #[test]
    fn test_tls_flags() {
        let mut config = EtcdfsConfig::default();
        let args = Args::parse_from([
            "etcdfs",
            "--cert",
            "c.pem",
            "--key",
            "k.pem",
            "--cacert",
            "ca.pem",
            "--backend",
            "memory",
        ]);
        args.apply(&mut config).unwrap();
        assert!(config.etcd.tls_enabled());
        assert_eq!(config.etcd.trusted_ca_file, "ca.pem");
        assert_eq!(config.fuse.mountpoint, "");
        assert_eq!(args.backend, Backend::Memory);
    }

    #[test]
    fn test_default_config_renders_and_parses_back() {
        let rendered = EtcdfsConfig::default().render();
        assert!(rendered.contains("[etcd]"));
        assert!(rendered.contains("[fuse]"));
        let parsed = EtcdfsConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed.fuse.readdir_page_size, 500);
        assert_eq!(parsed.etcd.ping_key, "_ping");
    }

    #[tokio::test]
    async fn test_memory_backend_opens_without_network() {
        let store = open_store(Backend::Memory, &EtcdConfig::default())
            .await
            .unwrap();
        store.put(b"/a", b"1").await.unwrap();
        assert_eq!(store.get(b"/a").await.unwrap(), Some(b"1".to_vec()));
    }
}
