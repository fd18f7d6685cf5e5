use device_logging_core::{StoreError, device::DeviceRecord, store::DeviceStore};

/// A store whose round trip never completes.
pub(crate) struct StalledStore;

#[tonic::async_trait]
impl DeviceStore for StalledStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn insert_device(&self, _record: &DeviceRecord) -> Result<i64, StoreError> {
        std::future::pending().await
    }
}
