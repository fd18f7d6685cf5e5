//! Storage write contract.
//!
//! The registration path needs exactly one thing from the relational store: a
//! parameterized insert of `(uuid, mac, firmware, created_at, updated_at)`
//! that hands back the storage-assigned numeric id. Implementations own the
//! connection pool; checkout and checkin happen inside
//! [`DeviceStore::insert_device`].

use crate::{StoreError, device::DeviceRecord};
use async_trait::async_trait;

/// A relational backend able to persist device records.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Backend name used as the `db` telemetry label (e.g. `postgres`).
    fn backend(&self) -> &'static str;

    /// Performs one insert round trip and returns the assigned id.
    ///
    /// Implementations must not retry. Dropping the returned future aborts
    /// the round trip and releases the connection.
    async fn insert_device(&self, record: &DeviceRecord) -> Result<i64, StoreError>;
}
