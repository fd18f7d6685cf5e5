//! Error types for the device registration service.
//!
//! Storage failures are reported by a [`DeviceStore`](crate::store::DeviceStore)
//! as a [`StoreError`]. The registration writer wraps every one of them into a
//! single [`InsertError`] that carries the fixed `device insert failed` context
//! and keeps the original failure reachable through
//! [`std::error::Error::source`].
//!
//! [`Error`] is the service-level error. It implements `From<Error>` for
//! `tonic::Status` so handlers can propagate it to clients with `?`.
//!
//! ## Error Cases
//! - `Insert`: the single durable insert of a device record failed.
//! - `ServiceShutdown`: a request arrived after in-flight work was cancelled
//!   for shutdown.

use core::time::Duration;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Boxed error used to carry backend-specific causes across the storage seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a single storage round trip.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// No connection could be checked out of the pool.
    #[error("connection checkout failed: {0}")]
    Pool(#[source] BoxError),

    /// The statement reached the backend and failed there (constraint
    /// violation, lost connection, protocol error, ...).
    #[error("statement failed: {0}")]
    Backend(#[source] BoxError),

    /// The round trip did not complete within the configured bound.
    #[error("round trip timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the round trip.
    #[error("round trip cancelled")]
    Cancelled,
}

/// The device record could not be persisted.
///
/// The display form always starts with `device insert failed`; the
/// underlying [`StoreError`] is available as the error source.
#[derive(thiserror::Error, Debug)]
#[error("device insert failed: {source}")]
pub struct InsertError {
    #[source]
    source: StoreError,
}

impl InsertError {
    pub const fn new(source: StoreError) -> Self {
        Self { source }
    }

    /// The storage failure that caused this error.
    pub const fn cause(&self) -> &StoreError {
        &self.source
    }

    pub fn into_cause(self) -> StoreError {
        self.source
    }
}

impl From<StoreError> for InsertError {
    fn from(source: StoreError) -> Self {
        Self::new(source)
    }
}

/// Unified error type for the device registration service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Persisting a device record failed.
    #[error(transparent)]
    Insert(#[from] InsertError),

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Insert(e) => match e.cause() {
                StoreError::Cancelled => Status::cancelled(e.to_string()),
                StoreError::Timeout(_) => Status::deadline_exceeded(e.to_string()),
                StoreError::Pool(_) | StoreError::Backend(_) => Status::internal(e.to_string()),
            },
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
