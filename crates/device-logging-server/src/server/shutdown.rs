//! Graceful shutdown sequence.
//!
//! 1. Wait for SIGINT or SIGTERM.
//! 2. Report NOT_SERVING for the overall server (`""`) and for
//!    `device.v1.CloudService`.
//! 3. Keep accepting for the drain delay so load balancers can deregister
//!    the instance, then stop accepting.
//! 4. Give in-flight calls the shutdown timeout to finish. Inserts still
//!    running after that are cancelled through the service token.

use crate::server::service::handler::DeviceService;
use core::future::Future;
use core::time::Duration;
use device_logging_core::proto::cloud_service_server::CloudServiceServer;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic_health::ServingStatus;
use tonic_health::server::HealthReporter;

/// Resolves once the server should stop accepting new calls. Passed to
/// `serve_with_incoming_shutdown`.
pub async fn shutdown_signal(
    health_reporter: HealthReporter,
    drain_delay: Duration,
    stopping: CancellationToken,
) {
    wait_for_signal().await;
    drain(&health_reporter, drain_delay, &stopping).await;
}

async fn wait_for_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}

/// Publishes NOT_SERVING, waits `drain_delay` and then cancels `stopping`.
pub async fn drain(
    health_reporter: &HealthReporter,
    drain_delay: Duration,
    stopping: &CancellationToken,
) {
    health_reporter
        .set_service_status("", ServingStatus::NotServing)
        .await;
    health_reporter
        .set_not_serving::<CloudServiceServer<DeviceService>>()
        .await;

    if !drain_delay.is_zero() {
        tracing::info!(delay = ?drain_delay, "Draining before shutdown");
        tokio::time::sleep(drain_delay).await;
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    stopping.cancel();
}

/// Drives `server` to completion. Once `stopping` fires, in-flight work gets
/// `shutdown_timeout` to finish; after that `service_token` is cancelled and
/// the server is awaited until the cancelled calls have returned.
pub async fn serve_with_deadline<F>(
    server: F,
    stopping: &CancellationToken,
    service_token: &CancellationToken,
    shutdown_timeout: Duration,
) -> F::Output
where
    F: Future,
{
    tokio::pin!(server);

    let deadline = async {
        stopping.cancelled().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        res = &mut server => res,
        () = deadline => {
            tracing::warn!(
                timeout = ?shutdown_timeout,
                "in-flight calls did not finish in time, cancelling them"
            );
            service_token.cancel();
            server.await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::service::testing::StalledStore;
    use device_logging_core::{
        device::RegistrationWriter,
        metrics::{MockMetricsSink, OpLabels},
        proto::{CreateDeviceRequest, cloud_service_server::CloudService},
    };
    use std::sync::Arc;
    use tokio::time::Instant;
    use tonic::{Code, Request};
    use tonic_health::pb::{
        HealthCheckRequest, health_check_response::ServingStatus as HealthStatus,
        health_server::Health,
    };
    use tonic_health::server::{HealthService, health_reporter};

    const DRAIN: Duration = Duration::from_secs(5);
    const TIMEOUT: Duration = Duration::from_secs(10);

    async fn health_status(health: &HealthService, service: &str) -> HealthStatus {
        health
            .check(Request::new(HealthCheckRequest {
                service: service.to_string(),
            }))
            .await
            .expect("service should be registered")
            .into_inner()
            .status()
    }

    #[tokio::test]
    async fn drain_reports_not_serving_for_server_and_service() {
        let (reporter, _) = health_reporter();
        reporter
            .set_serving::<CloudServiceServer<DeviceService>>()
            .await;
        let health = HealthService::from_health_reporter(reporter.clone());
        assert_eq!(health_status(&health, "").await, HealthStatus::Serving);

        let stopping = CancellationToken::new();
        drain(&reporter, Duration::ZERO, &stopping).await;

        assert_eq!(health_status(&health, "").await, HealthStatus::NotServing);
        assert_eq!(
            health_status(&health, "device.v1.CloudService").await,
            HealthStatus::NotServing
        );
        assert!(stopping.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_insert_is_cancelled_after_drain_and_timeout() {
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

        // Longer than drain plus timeout, so only shutdown can end the call.
        let writer = RegistrationWriter::new(
            Arc::new(StalledStore),
            Arc::new(metrics),
            Duration::from_secs(600),
        );
        let service_token = CancellationToken::new();
        let svc = DeviceService::new(writer, service_token.clone());

        let (reporter, _) = health_reporter();
        let health = HealthService::from_health_reporter(reporter.clone());
        let stopping = CancellationToken::new();

        let call = svc.create_device(Request::new(CreateDeviceRequest {
            mac: "68-93-9B-B5-33-B9".to_string(),
            firmware: "4.3.1".to_string(),
        }));

        let start = Instant::now();
        let ((), res) = tokio::join!(
            drain(&reporter, DRAIN, &stopping),
            serve_with_deadline(call, &stopping, &service_token, TIMEOUT),
        );

        let status = res.expect_err("stalled insert should be cancelled");
        assert_eq!(status.code(), Code::Cancelled);
        assert!(status.message().starts_with("device insert failed"));
        assert!(start.elapsed() >= DRAIN + TIMEOUT);
        assert!(service_token.is_cancelled());
        assert_eq!(health_status(&health, "").await, HealthStatus::NotServing);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_server_leaves_service_token_alone() {
        let stopping = CancellationToken::new();
        let service_token = CancellationToken::new();
        stopping.cancel();

        let out = serve_with_deadline(async { 7 }, &stopping, &service_token, TIMEOUT).await;

        assert_eq!(out, 7);
        assert!(!service_token.is_cancelled());
    }
}
