//! Storage for Trinity relayers.
//!
//! Provides a [`KvStore`](traits::KvStore) trait with in-memory and SQLite
//! backends, and [`RelayerStore`](relayer_store::RelayerStore), the typed view
//! the relayer uses for lane nonces, watcher cursors and submission records.

pub mod error;
pub mod memory;
pub mod relayer_store;
pub mod sqlite;
pub mod traits;
