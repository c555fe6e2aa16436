//! etcd v3 backend.
//!
//! Scans are keys-only range reads; values are only fetched by `get`. Every
//! call runs under the configured command timeout and clones the client,
//! which is a cheap handle over a shared gRPC channel.

use std::path::Path;

use async_trait::async_trait;
use etcd_client::{
    Certificate, Client, ConnectOptions, GetOptions, Identity, SortOrder as EtcdSortOrder,
    SortTarget, TlsOptions,
};

use etcdfs_kv::{with_timeout, KvStore, RangeEnd, ScanRequest, ScanResult, SortOrder};
use etcdfs_types::{make_error_msg, status_code_t, KvCode, RPCCode, Result, Status};

use crate::EtcdConfig;

/// PEM material read from the configured files.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct TlsMaterial {
    pub ca: Option<Vec<u8>>,
    pub identity: Option<(Vec<u8>, Vec<u8>)>,
}

fn read_pem(kind: &str, path: &str) -> Result<Vec<u8>> {
    std::fs::read(Path::new(path)).map_err(|e| {
        Status::with_message(
            KvCode::TLS_CONFIG_ERROR,
            format!("cannot read {} {}: {}", kind, path, e),
        )
    })
}

/// Load the TLS files named in `config`. A certificate without a key (or the
/// reverse) is a configuration error.
pub(crate) fn load_tls_material(config: &EtcdConfig) -> Result<Option<TlsMaterial>> {
    if !config.tls_enabled() {
        return Ok(None);
    }
    let mut material = TlsMaterial::default();
    if !config.trusted_ca_file.is_empty() {
        material.ca = Some(read_pem("CA bundle", &config.trusted_ca_file)?);
    }
    match (config.cert_file.is_empty(), config.key_file.is_empty()) {
        (false, false) => {
            let cert = read_pem("certificate", &config.cert_file)?;
            let key = read_pem("private key", &config.key_file)?;
            material.identity = Some((cert, key));
        }
        (true, true) => {}
        _ => {
            return make_error_msg(
                KvCode::TLS_CONFIG_ERROR,
                "cert_file and key_file must be set together",
            )
        }
    }
    Ok(Some(material))
}

fn connect_options(config: &EtcdConfig) -> Result<ConnectOptions> {
    let mut options = ConnectOptions::new()
        .with_connect_timeout(config.dial_timeout())
        .with_timeout(config.command_timeout())
        .with_keep_alive(config.keepalive_interval(), config.dial_timeout());

    if let Some(material) = load_tls_material(config)? {
        let mut tls = TlsOptions::new();
        if let Some(ca) = material.ca {
            tls = tls.ca_certificate(Certificate::from_pem(ca));
        }
        if let Some((cert, key)) = material.identity {
            tls = tls.identity(Identity::from_pem(cert, key));
        }
        options = options.with_tls(tls);
    }
    Ok(options)
}

fn kv_error(code: status_code_t, op: &str, err: etcd_client::Error) -> Status {
    Status::with_message(code, format!("etcd {} failed: {}", op, err))
}

/// A [`KvStore`] over an etcd cluster.
#[derive(Clone)]
pub struct EtcdKvStore {
    client: Client,
    config: EtcdConfig,
}

impl std::fmt::Debug for EtcdKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdKvStore")
            .field("endpoints", &self.config.endpoints)
            .finish()
    }
}

impl EtcdKvStore {
    /// Connect to the cluster. This does not prove the cluster is reachable;
    /// call [`EtcdKvStore::ping`] for that.
    pub async fn connect(config: &EtcdConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return make_error_msg(RPCCode::CONNECT_FAILED, "no etcd endpoints configured");
        }
        let options = connect_options(config)?;
        tracing::info!(endpoints = ?config.endpoints, tls = config.tls_enabled(), "connecting to etcd");

        let connect = async {
            Client::connect(config.endpoints.clone(), Some(options))
                .await
                .map_err(|e| kv_error(RPCCode::CONNECT_FAILED, "connect", e))
        };
        let client = with_timeout(config.dial_timeout(), "connect", connect).await?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Read the ping key once; any failure means the cluster is unusable.
    pub async fn ping(&self) -> Result<()> {
        let key = self.config.ping_key.as_bytes();
        self.get(key).await.map(|_| ()).map_err(|status| {
            Status::with_message(
                RPCCode::CONNECT_FAILED,
                format!("etcd ping of {:?} failed: {}", self.config.ping_key, status),
            )
        })
    }

    fn read_options(&self) -> GetOptions {
        let options = GetOptions::new();
        if self.config.serializable_reads {
            options.with_serializable()
        } else {
            options
        }
    }
}

#[async_trait]
impl KvStore for EtcdKvStore {
    async fn scan(&self, req: &ScanRequest) -> Result<ScanResult> {
        let mut options = self.read_options().with_keys_only();
        options = match &req.end {
            RangeEnd::Bounded(end) => options.with_range(end.clone()),
            RangeEnd::Unbounded => options.with_from_key(),
        };
        options = match req.order {
            SortOrder::Ascend => options.with_sort(SortTarget::Key, EtcdSortOrder::Ascend),
            SortOrder::Descend => options.with_sort(SortTarget::Key, EtcdSortOrder::Descend),
            SortOrder::None => options,
        };
        if req.limit > 0 {
            options = options.with_limit(req.limit as i64);
        }

        let mut client = self.client.clone();
        let call = async {
            client
                .get(req.start.clone(), Some(options))
                .await
                .map_err(|e| kv_error(KvCode::SCAN_ERROR, "scan", e))
        };
        let resp = with_timeout(self.config.command_timeout(), "scan", call).await?;
        Ok(ScanResult {
            keys: resp.kvs().iter().map(|kv| kv.key().to_vec()).collect(),
            has_more: resp.more(),
        })
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let options = self.read_options();
        let mut client = self.client.clone();
        let call = async {
            client
                .get(key, Some(options))
                .await
                .map_err(|e| kv_error(KvCode::GET_ERROR, "get", e))
        };
        let resp = with_timeout(self.config.command_timeout(), "get", call).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut client = self.client.clone();
        let call = async {
            client
                .put(key, value, None)
                .await
                .map_err(|e| kv_error(KvCode::PUT_ERROR, "put", e))
        };
        with_timeout(self.config.command_timeout(), "put", call).await?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let mut client = self.client.clone();
        let call = async {
            client
                .delete(key, None)
                .await
                .map_err(|e| kv_error(KvCode::DELETE_ERROR, "delete", e))
        };
        with_timeout(self.config.command_timeout(), "delete", call).await?;
        Ok(())
    }
}
