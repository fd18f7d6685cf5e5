//! Device registration: the record model and the single-insert writer.
//!
//! - [`record`] - [`DeviceRecord`] construction and wire conversion.
//! - [`writer`] - [`RegistrationWriter`], the durable insert with telemetry.

pub mod record;
pub mod writer;

pub use record::{DeviceRecord, format_timestamp};
pub use writer::RegistrationWriter;
