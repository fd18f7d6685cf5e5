//! Durable insert of a single [`DeviceRecord`].
//!
//! [`RegistrationWriter::insert`] performs exactly one storage round trip and
//! always reports one duration sample for it, whether the round trip
//! succeeded, failed, timed out or was cancelled. The sample is also recorded
//! when the caller drops the insert future mid-flight, which is what tonic
//! does once a client deadline passes. It never retries and never
//! touches the error counter: counting and logging a failed insert is left to
//! the caller, which also decides how the failure reaches the client.

use crate::{
    InsertError, StoreError,
    device::DeviceRecord,
    metrics::{MetricsSink, OpLabels},
    store::DeviceStore,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;

/// Persists device records through a shared [`DeviceStore`] and reports
/// timing to a [`MetricsSink`].
///
/// Cloning is cheap; clones share the store and the sink.
#[derive(Clone)]
pub struct RegistrationWriter {
    store: Arc<dyn DeviceStore>,
    metrics: Arc<dyn MetricsSink>,
    insert_timeout: Duration,
}

impl RegistrationWriter {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        metrics: Arc<dyn MetricsSink>,
        insert_timeout: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            insert_timeout,
        }
    }

    /// Labels under which inserts through this writer are reported.
    pub fn labels(&self) -> OpLabels {
        OpLabels::insert(self.store.backend())
    }

    /// The sink this writer reports to.
    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Inserts `record` and, on success, stores the assigned id in it.
    ///
    /// The round trip is abandoned when `cancel` fires or when it runs past
    /// the configured insert timeout; dropping the in-flight future returns
    /// the connection to its pool.
    ///
    /// # Errors
    ///
    /// Every failure is returned as an [`InsertError`] wrapping the
    /// [`StoreError`] that caused it. `record` keeps its unset id.
    #[tracing::instrument(
        skip_all,
        fields(uuid = %record.uuid(), db = self.store.backend())
    )]
    pub async fn insert(
        &self,
        record: &mut DeviceRecord,
        cancel: &CancellationToken,
    ) -> Result<(), InsertError> {
        let _timer = DurationTimer::start(self.metrics.as_ref(), self.labels());

        let outcome = {
            let record = &*record;
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(StoreError::Cancelled),
                res = timeout(self.insert_timeout, self.store.insert_device(record)) => {
                    res.unwrap_or(Err(StoreError::Timeout(self.insert_timeout)))
                }
            }
        };

        let id = outcome?;
        record.assign_id(id);
        tracing::trace!(id, "device row inserted");
        Ok(())
    }
}

/// Reports the elapsed time to the sink when dropped, on every exit path.
struct DurationTimer<'a> {
    metrics: &'a dyn MetricsSink,
    labels: OpLabels,
    start: Instant,
}

impl<'a> DurationTimer<'a> {
    fn start(metrics: &'a dyn MetricsSink, labels: OpLabels) -> Self {
        Self {
            metrics,
            labels,
            start: Instant::now(),
        }
    }
}

impl Drop for DurationTimer<'_> {
    fn drop(&mut self) {
        self.metrics
            .observe_duration(self.labels, self.start.elapsed());
    }
}
