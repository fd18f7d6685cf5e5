#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use device_logging_core::{
    device::RegistrationWriter,
    proto::{FILE_DESCRIPTOR_SET, cloud_service_server::CloudServiceServer},
};
use device_logging_postgres::{PostgresClient, PostgresDeviceStore, ensure_schema};
use futures::Stream;
use server::config::{CliArgs, ServerConfig};
use server::metrics::OtelMetrics;
use server::service::handler::DeviceService;
use server::shutdown::{serve_with_deadline, shutdown_signal};
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(&config.telemetry)?;

    let client = PostgresClient::new(&config.postgres)?;
    client
        .ping()
        .await
        .context("failed to reach postgres at startup")?;
    if config.ensure_schema {
        ensure_schema(&client).await?;
    }

    let metrics = Arc::new(OtelMetrics::new(&providers.meter()));
    let store = Arc::new(PostgresDeviceStore::new(client.clone()));
    let writer = RegistrationWriter::new(store, metrics, config.insert_timeout);
    let service_token = CancellationToken::new();
    let service = DeviceService::new(writer, service_token.clone());

    let res = if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)
                .with_context(|| format!("failed to bind unix socket `{uds_path}`"))?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(service, service_token, incoming, &config).await;
            // Best effort; a panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path)
            .await
            .with_context(|| format!("failed to bind `{tcp_path}`"))?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(service, service_token, incoming, &config).await
    };

    client.close();
    shutdown_telemetry(providers);
    res
}

async fn run_server_with_incoming<I, IO, IE>(
    service: DeviceService,
    service_token: CancellationToken,
    incoming: I,
    config: &ServerConfig,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<CloudServiceServer<DeviceService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    // Cancelled once the server stops accepting new calls.
    let stopping = CancellationToken::new();

    let server = Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_device_service(service))
        .serve_with_incoming_shutdown(
            incoming,
            shutdown_signal(health_reporter, config.drain_delay, stopping.clone()),
        );

    serve_with_deadline(server, &stopping, &service_token, config.shutdown_timeout).await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting device service on {} with full config: {:#?}",
            addr,
            config
        );
    } else {
        tracing::info!(
            "Starting device service on {} with a pool of {} connections",
            addr,
            config.postgres.max_pool_size
        );
    }
}

fn build_device_service(service: DeviceService) -> CloudServiceServer<DeviceService> {
    CloudServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

fn shutdown_telemetry(providers: TelemetryProviders) {
    tracing::info!("Flushing telemetry");
    providers.shutdown();
    eprintln!("Shutdown complete");
}
