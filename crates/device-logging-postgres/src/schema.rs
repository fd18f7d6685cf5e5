use crate::PostgresClient;
use anyhow::{Context, Result};
use tracing::info;

/// DDL for the table device registrations are written to.
pub const CREATE_GRPC_DEVICE: &str = include_str!("../migrations/0001_create_grpc_device.sql");

/// Creates the `grpc_device` table if it does not exist yet.
pub async fn ensure_schema(client: &PostgresClient) -> Result<()> {
    let conn = client
        .get_connection()
        .await
        .context("failed to check out a postgres connection")?;
    conn.batch_execute(CREATE_GRPC_DEVICE)
        .await
        .context("failed to create grpc_device table")?;
    info!("grpc_device schema ensured");
    Ok(())
}
