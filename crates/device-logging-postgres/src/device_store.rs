use crate::PostgresClient;
use async_trait::async_trait;
use device_logging_core::{StoreError, device::DeviceRecord, store::DeviceStore};
use tracing::{debug, instrument};

/// Backend name reported as the `db` telemetry label.
pub const BACKEND: &str = "postgres";

const INSERT_DEVICE: &str = "INSERT INTO grpc_device (uuid, mac, firmware, created_at, updated_at)
     VALUES ($1, $2, $3, $4, $5)
     RETURNING id";

/// PostgreSQL implementation of the [`DeviceStore`] trait
#[derive(Clone)]
pub struct PostgresDeviceStore {
    client: PostgresClient,
}

impl PostgresDeviceStore {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceStore for PostgresDeviceStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self, record), fields(uuid = %record.uuid(), mac = %record.mac()))]
    async fn insert_device(&self, record: &DeviceRecord) -> Result<i64, StoreError> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(|e| StoreError::Pool(e.into()))?;

        let stmt = conn
            .prepare_cached(INSERT_DEVICE)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let uuid = record.uuid();
        let created_at = record.created_at();
        let updated_at = record.updated_at();

        let row = conn
            .query_one(
                &stmt,
                &[
                    &uuid,
                    &record.mac(),
                    &record.firmware(),
                    &created_at,
                    &updated_at,
                ],
            )
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let id: i64 = row.try_get(0).map_err(|e| StoreError::Backend(e.into()))?;
        debug!(id, "inserted grpc_device row");
        Ok(id)
    }
}
