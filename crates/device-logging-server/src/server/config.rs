use anyhow::{Context, bail};
use clap::Parser;
use core::fmt;
use core::time::Duration;
use device_logging_postgres::PostgresConfig;

/// Runtime configuration for the `device-logging-server` binary.
///
/// Every value is parsed from a CLI argument or its environment variable
/// (a `.env` file is loaded first), with defaults suitable for local
/// development against a Postgres on `localhost`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "device-logging-server",
    version,
    about = "A gRPC service for registering devices"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/device-logging.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    ///
    /// Environment variable: `DEBUG`
    #[arg(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Environment variable: `POSTGRES_HOST`
    #[arg(long, env = "POSTGRES_HOST", default_value_t = String::from("localhost"))]
    pub postgres_host: String,

    /// Environment variable: `POSTGRES_PORT`
    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    /// Environment variable: `POSTGRES_DATABASE`
    #[arg(long, env = "POSTGRES_DATABASE", default_value_t = String::from("devices"))]
    pub postgres_database: String,

    /// Environment variable: `POSTGRES_USERNAME`
    #[arg(long, env = "POSTGRES_USERNAME", default_value_t = String::from("postgres"))]
    pub postgres_username: String,

    /// Environment variable: `POSTGRES_PASSWORD`
    #[arg(
        long,
        env = "POSTGRES_PASSWORD",
        default_value_t = String::from("postgres"),
        hide_env_values = true
    )]
    pub postgres_password: String,

    /// Maximum number of pooled Postgres connections shared by all requests.
    ///
    /// Environment variable: `POSTGRES_MAX_POOL_SIZE`
    #[arg(long, env = "POSTGRES_MAX_POOL_SIZE", default_value_t = 10)]
    pub postgres_max_pool_size: usize,

    /// Create the `grpc_device` table at startup if it does not exist.
    ///
    /// Environment variable: `ENSURE_SCHEMA`
    #[arg(long, env = "ENSURE_SCHEMA", default_value_t = false)]
    pub ensure_schema: bool,

    /// Upper bound for a single device insert round trip, in milliseconds.
    ///
    /// Environment variable: `INSERT_TIMEOUT_MS`
    #[arg(long, env = "INSERT_TIMEOUT_MS", default_value_t = 5_000)]
    pub insert_timeout_ms: u64,

    /// Seconds to keep serving after health flips to NOT_SERVING, so load
    /// balancers can deregister the instance before it stops accepting.
    ///
    /// Environment variable: `DRAIN_DELAY_SECS`
    #[arg(long, env = "DRAIN_DELAY_SECS", default_value_t = 5)]
    pub drain_delay_secs: u64,

    /// Seconds to wait for in-flight calls once the server stops accepting.
    /// Calls still running afterwards are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// OTLP collector endpoint. Required when built with the `otlp` feature.
    ///
    /// Environment variable: `OTLP_ENDPOINT`
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Extra gRPC metadata sent to the collector, as `key=value` pairs
    /// separated by commas.
    ///
    /// Environment variable: `OTLP_HEADERS`
    #[arg(long, env = "OTLP_HEADERS", hide_env_values = true)]
    pub otlp_headers: Option<String>,

    /// Compression used for OTLP export (`gzip` or `zstd`).
    ///
    /// Environment variable: `OTLP_COMPRESSION`
    #[arg(long, env = "OTLP_COMPRESSION", default_value_t = String::from("gzip"))]
    pub otlp_compression: String,

    /// Interval between periodic metric exports, in seconds.
    ///
    /// Environment variable: `EXPORT_INTERVAL_SECS`
    #[arg(long, env = "EXPORT_INTERVAL_SECS", default_value_t = 5)]
    pub export_interval_secs: u64,
}

/// Telemetry settings handed to [`init_telemetry`](super::telemetry::init_telemetry).
#[derive(Clone)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: &'static str,
    pub otlp_endpoint: Option<String>,
    pub otlp_headers: Vec<(String, String)>,
    pub otlp_compression: String,
    pub export_interval: Duration,
}

// Header values usually carry collector API keys; only names are shown.
impl fmt::Debug for TelemetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .otlp_headers
            .iter()
            .map(|(name, _)| (name.as_str(), "<redacted>"))
            .collect();
        f.debug_struct("TelemetryConfig")
            .field("default_filter", &self.default_filter)
            .field("otlp_endpoint", &self.otlp_endpoint)
            .field("otlp_headers", &headers)
            .field("otlp_compression", &self.otlp_compression)
            .field("export_interval", &self.export_interval)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub postgres: PostgresConfig,
    pub ensure_schema: bool,
    pub insert_timeout: Duration,
    pub drain_delay: Duration,
    pub shutdown_timeout: Duration,
    pub telemetry: TelemetryConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.postgres_max_pool_size == 0 {
            bail!("POSTGRES_MAX_POOL_SIZE must be greater than 0");
        }

        if args.insert_timeout_ms == 0 {
            bail!("INSERT_TIMEOUT_MS must be greater than 0");
        }

        if args.export_interval_secs == 0 {
            bail!("EXPORT_INTERVAL_SECS must be greater than 0");
        }

        let otlp_headers = args
            .otlp_headers
            .as_deref()
            .map(parse_headers)
            .transpose()
            .context("invalid OTLP_HEADERS")?
            .unwrap_or_default();

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            postgres: PostgresConfig {
                host: args.postgres_host,
                port: args.postgres_port,
                database: args.postgres_database,
                username: args.postgres_username,
                password: args.postgres_password,
                max_pool_size: args.postgres_max_pool_size,
            },
            ensure_schema: args.ensure_schema,
            insert_timeout: Duration::from_millis(args.insert_timeout_ms),
            drain_delay: Duration::from_secs(args.drain_delay_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            telemetry: TelemetryConfig {
                default_filter: if args.debug { "debug" } else { "info" },
                otlp_endpoint: args.otlp_endpoint,
                otlp_headers,
                otlp_compression: args.otlp_compression.to_ascii_lowercase(),
                export_interval: Duration::from_secs(args.export_interval_secs),
            },
        })
    }
}

/// Parses `k1=v1,k2=v2`. Empty segments are skipped.
fn parse_headers(raw: &str) -> anyhow::Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| -> anyhow::Result<(String, String)> {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("expected `key=value`, got `{pair}`"))?;
            let key = key.trim();
            if key.is_empty() {
                bail!("empty header name in `{pair}`");
            }
            Ok((key.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}
