//! gRPC service implementation for device registration.
//!
//! This module defines [`DeviceService`], the concrete implementation of the
//! [`CloudService`] gRPC service defined in `device.proto`.
//!
//! ## Responsibilities
//!
//! - Turn `CreateDevice` requests into [`DeviceRecord`]s and persist them
//!   through the [`RegistrationWriter`].
//! - Count and log failed inserts, then map them to a gRPC status.
//! - Serve the fixed sample listing for `GetDevices`.
//! - Refuse new registrations once shutdown has cancelled in-flight work.

use crate::server::service::samples::sample_devices;
use device_logging_core::{
    Error,
    device::{DeviceRecord, RegistrationWriter},
    proto::{
        CreateDeviceRequest, CreateDeviceResponse, GetDevicesRequest, GetDevicesResponse,
        cloud_service_server::CloudService,
    },
};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

/// gRPC front end of the device registration path.
///
/// Every `CreateDevice` call builds its own record and runs one insert
/// through the shared [`RegistrationWriter`]. Calls do not coordinate with
/// each other.
#[derive(Clone)]
pub struct DeviceService {
    writer: RegistrationWriter,
    shutdown_token: CancellationToken,
}

impl DeviceService {
    /// `shutdown_token` cancels in-flight inserts when graceful shutdown
    /// gives up waiting for them.
    pub const fn new(writer: RegistrationWriter, shutdown_token: CancellationToken) -> Self {
        Self {
            writer,
            shutdown_token,
        }
    }
}

#[tonic::async_trait]
impl CloudService for DeviceService {
    #[tracing::instrument(skip_all)]
    async fn get_devices(
        &self,
        _req: Request<GetDevicesRequest>,
    ) -> Result<Response<GetDevicesResponse>, Status> {
        Ok(Response::new(GetDevicesResponse {
            devices: sample_devices(),
        }))
    }

    /// Registers one device.
    ///
    /// On failure the error counter is incremented under the writer's
    /// `{op, db}` labels and a warning is logged before the error is
    /// returned to the client.
    #[tracing::instrument(
        skip_all,
        fields(mac = %req.get_ref().mac, firmware = %req.get_ref().firmware)
    )]
    async fn create_device(
        &self,
        req: Request<CreateDeviceRequest>,
    ) -> Result<Response<CreateDeviceResponse>, Status> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown.into());
        }

        let CreateDeviceRequest { mac, firmware } = req.into_inner();
        let mut record = DeviceRecord::build(mac, firmware);
        let cancel = self.shutdown_token.child_token();

        let mut abandoned = AbandonedInsert::arm(&self.writer);
        let res = self.writer.insert(&mut record, &cancel).await;
        abandoned.disarm();

        if let Err(e) = res {
            let labels = self.writer.labels();
            self.writer.metrics().increment_errors(labels);
            tracing::warn!(error = %e, db = labels.db, "failed to save device");
            return Err(Error::from(e).into());
        }

        tracing::debug!(
            id = ?record.id(),
            mac = record.mac(),
            firmware = record.firmware(),
            "device saved"
        );

        Ok(Response::new(CreateDeviceResponse {
            device: Some(record.into()),
        }))
    }
}

/// Counts an insert as failed when the handler future is dropped before the
/// insert returns, e.g. once the client's deadline has passed.
struct AbandonedInsert<'a> {
    writer: &'a RegistrationWriter,
    armed: bool,
}

impl<'a> AbandonedInsert<'a> {
    fn arm(writer: &'a RegistrationWriter) -> Self {
        Self {
            writer,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonedInsert<'_> {
    fn drop(&mut self) {
        if self.armed {
            let labels = self.writer.labels();
            self.writer.metrics().increment_errors(labels);
            tracing::warn!(db = labels.db, "failed to save device: request dropped by the client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::service::testing::StalledStore;
    use core::time::Duration;
    use device_logging_core::{
        StoreError,
        metrics::{MockMetricsSink, OpLabels},
        store::MockDeviceStore,
    };
    use std::sync::Arc;
    use tonic::Code;

    fn service(store: MockDeviceStore, metrics: MockMetricsSink) -> DeviceService {
        let writer = RegistrationWriter::new(
            Arc::new(store),
            Arc::new(metrics),
            Duration::from_secs(5),
        );
        DeviceService::new(writer, CancellationToken::new())
    }

    fn postgres_store() -> MockDeviceStore {
        let mut store = MockDeviceStore::new();
        store.expect_backend().return_const("postgres");
        store
    }

    fn create_request() -> Request<CreateDeviceRequest> {
        Request::new(CreateDeviceRequest {
            mac: "EF-2B-C4-F5-D6-34".to_string(),
            firmware: "2.1.5".to_string(),
        })
    }

    #[tokio::test]
    async fn test_create_device_success() {
        let mut store = postgres_store();
        store
            .expect_insert_device()
            .withf(|r| r.mac() == "EF-2B-C4-F5-D6-34" && r.firmware() == "2.1.5")
            .times(1)
            .returning(|_| Ok(17));

        let mut metrics = MockMetricsSink::new();
        metrics
            .expect_observe_duration()
            .withf(|labels, _| *labels == OpLabels::insert("postgres"))
            .times(1)
            .return_const(());
        metrics.expect_increment_errors().never();

        let response = service(store, metrics)
            .create_device(create_request())
            .await
            .expect("create should succeed")
            .into_inner();

        let device = response.device.expect("device in response");
        assert_eq!(device.id, 17);
        assert_eq!(device.mac, "EF-2B-C4-F5-D6-34");
        assert_eq!(device.firmware, "2.1.5");
        assert_eq!(device.created_at, device.updated_at);
        assert!(!device.uuid.is_empty());
    }

    #[tokio::test]
    async fn test_create_device_storage_failure_counts_error() {
        let mut store = postgres_store();
        store
            .expect_insert_device()
            .times(1)
            .returning(|_| Err(StoreError::Backend("connection refused".into())));

        let mut metrics = MockMetricsSink::new();
        metrics
            .expect_observe_duration()
            .withf(|labels, _| *labels == OpLabels::insert("postgres"))
            .times(1)
            .return_const(());
        metrics
            .expect_increment_errors()
            .withf(|labels| *labels == OpLabels::insert("postgres"))
            .times(1)
            .return_const(());

        let status = service(store, metrics)
            .create_device(create_request())
            .await
            .expect_err("create should fail");

        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("device insert failed"));
        assert!(status.message().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_create_device_after_shutdown_is_unavailable() {
        let mut store = postgres_store();
        store.expect_insert_device().never();
        let mut metrics = MockMetricsSink::new();
        metrics.expect_observe_duration().never();
        metrics.expect_increment_errors().never();

        let svc = service(store, metrics);
        svc.shutdown_token.cancel();

        let status = svc
            .create_device(create_request())
            .await
            .expect_err("shutdown should refuse new work");
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_get_devices_returns_samples_without_storage() {
        let mut store = MockDeviceStore::new();
        store.expect_insert_device().never();

        let response = service(store, MockMetricsSink::new())
            .get_devices(Request::new(GetDevicesRequest {}))
            .await
            .expect("listing should succeed")
            .into_inner();

        let ids: Vec<i64> = response.devices.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(response.devices[0].mac, "EF-2B-C4-F5-D6-34");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_device_dropped_by_client_counts_error() {
        let mut metrics = MockMetricsSink::new();
        metrics
            .expect_observe_duration()
            .withf(|labels, _| *labels == OpLabels::insert("postgres"))
            .times(1)
            .return_const(());
        metrics
            .expect_increment_errors()
            .withf(|labels| *labels == OpLabels::insert("postgres"))
            .times(1)
            .return_const(());

        let writer = RegistrationWriter::new(
            Arc::new(StalledStore),
            Arc::new(metrics),
            Duration::from_secs(5),
        );
        let svc = DeviceService::new(writer, CancellationToken::new());

        let res =
            tokio::time::timeout(Duration::from_secs(1), svc.create_device(create_request())).await;
        assert!(res.is_err(), "client deadline should drop the call");
    }
}
