#![cfg(feature = "integration-tests")]

use core::time::Duration;
use device_logging_core::{
    device::{DeviceRecord, RegistrationWriter},
    metrics::{MetricsSink, OpLabels},
    store::DeviceStore,
};
use device_logging_postgres::{
    PostgresClient, PostgresConfig, PostgresDeviceStore, ensure_schema,
};
use std::sync::{Arc, Mutex};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::ContainerAsync;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Default)]
struct RecordingMetrics {
    durations: Mutex<Vec<OpLabels>>,
}

impl MetricsSink for RecordingMetrics {
    fn observe_duration(&self, labels: OpLabels, _elapsed: Duration) {
        self.durations.lock().unwrap().push(labels);
    }

    fn increment_errors(&self, _labels: OpLabels) {}
}

async fn setup_test_db() -> (ContainerAsync<Postgres>, PostgresClient) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let client = PostgresClient::new(&PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        max_pool_size: 5,
    })
    .expect("Failed to create client");

    client.ping().await.expect("postgres should be reachable");
    ensure_schema(&client).await.expect("schema");
    // Idempotent.
    ensure_schema(&client).await.expect("schema again");

    (postgres, client)
}

#[tokio::test]
async fn test_insert_device_returns_increasing_ids() {
    let (_container, client) = setup_test_db().await;
    let store = PostgresDeviceStore::new(client.clone());

    let first = DeviceRecord::build("EF-2B-C4-F5-D6-34", "2.1.5");
    let second = DeviceRecord::build("E7-34-96-33-0C-4C", "1.0.3");

    let first_id = store.insert_device(&first).await.unwrap();
    let second_id = store.insert_device(&second).await.unwrap();

    assert!(first_id > 0);
    assert!(second_id > first_id);

    let conn = client.get_connection().await.unwrap();
    let row = conn
        .query_one(
            "SELECT uuid, mac, firmware, created_at, updated_at FROM grpc_device WHERE id = $1",
            &[&first_id],
        )
        .await
        .unwrap();

    let uuid: Uuid = row.get(0);
    let mac: String = row.get(1);
    let firmware: String = row.get(2);
    let created_at: chrono::DateTime<chrono::Utc> = row.get(3);
    let updated_at: chrono::DateTime<chrono::Utc> = row.get(4);

    assert_eq!(uuid, first.uuid());
    assert_eq!(mac, "EF-2B-C4-F5-D6-34");
    assert_eq!(firmware, "2.1.5");
    assert_eq!(created_at, updated_at);
    // Postgres keeps microseconds.
    assert_eq!(
        created_at.timestamp_micros(),
        first.created_at().timestamp_micros()
    );
}

#[tokio::test]
async fn test_writer_persists_and_reports_duration() {
    let (_container, client) = setup_test_db().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let writer = RegistrationWriter::new(
        Arc::new(PostgresDeviceStore::new(client)),
        metrics.clone(),
        Duration::from_secs(5),
    );

    let mut record = DeviceRecord::build("68-93-9B-B5-33-B9", "4.3.1");
    writer
        .insert(&mut record, &CancellationToken::new())
        .await
        .unwrap();

    assert!(record.id().is_some_and(|id| id > 0));
    assert_eq!(
        *metrics.durations.lock().unwrap(),
        vec![OpLabels::insert("postgres")]
    );
}

#[tokio::test]
async fn test_same_record_twice_creates_two_rows() {
    let (_container, client) = setup_test_db().await;
    let store = PostgresDeviceStore::new(client.clone());

    let record = DeviceRecord::build("AA-BB-CC-DD-EE-FF", "0.0.1");
    let a = store.insert_device(&record).await.unwrap();
    let b = store.insert_device(&record).await.unwrap();
    assert_ne!(a, b);

    let conn = client.get_connection().await.unwrap();
    let count: i64 = conn
        .query_one(
            "SELECT COUNT(*) FROM grpc_device WHERE uuid = $1",
            &[&record.uuid()],
        )
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_missing_table_is_a_backend_failure() {
    let (_container, client) = setup_test_db().await;
    client
        .get_connection()
        .await
        .unwrap()
        .batch_execute("DROP TABLE grpc_device")
        .await
        .unwrap();

    let metrics = Arc::new(RecordingMetrics::default());
    let writer = RegistrationWriter::new(
        Arc::new(PostgresDeviceStore::new(client)),
        metrics.clone(),
        Duration::from_secs(5),
    );

    let mut record = DeviceRecord::build("EF-2B-C4-F5-D6-34", "2.1.5");
    let err = writer
        .insert(&mut record, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("device insert failed"));
    assert!(matches!(
        err.cause(),
        device_logging_core::StoreError::Backend(_)
    ));
    assert_eq!(record.id(), None);
    assert_eq!(metrics.durations.lock().unwrap().len(), 1);
}
