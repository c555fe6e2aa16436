//! [`etcdfs_kv::KvStore`] implementations.
//!
//! - **memdb** -- in-memory ordered store with fault injection (always available).
//! - **etcd** -- etcd v3 over gRPC (feature `"etcd"`, on by default).

pub mod config;
pub mod memdb;

#[cfg(feature = "etcd")]
pub mod etcd;

pub use config::EtcdConfig;
pub use memdb::MemKvStore;

#[cfg(feature = "etcd")]
pub use etcd::EtcdKvStore;
