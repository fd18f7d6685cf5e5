use crate::proto;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// One device registration, before and after persistence.
///
/// A record is built per inbound request with [`DeviceRecord::build`]. Its
/// `uuid` and timestamps are fixed at that point; `id` stays unset until a
/// [`RegistrationWriter`](super::RegistrationWriter) insert succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    id: Option<i64>,
    uuid: Uuid,
    mac: String,
    firmware: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// Builds an unpersisted record from a registration request.
    ///
    /// Neither value is validated; both are stored verbatim. A fresh random
    /// uuid is generated and a single instant is used for both timestamps.
    pub fn build(mac: impl Into<String>, firmware: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            mac: mac.into(),
            firmware: firmware.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Storage-assigned id, `None` until the record has been inserted.
    pub const fn id(&self) -> Option<i64> {
        self.id
    }

    pub const fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn firmware(&self) -> &str {
        &self.firmware
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Records the id returned by a successful insert.
    ///
    /// The first assigned id sticks; later calls leave it untouched.
    pub(crate) fn assign_id(&mut self, id: i64) {
        match self.id {
            None => self.id = Some(id),
            Some(existing) => {
                tracing::warn!(
                    uuid = %self.uuid,
                    existing,
                    ignored = id,
                    "record already persisted, keeping its first id"
                );
            }
        }
    }
}

/// Renders a timestamp as RFC3339 with nanosecond precision in UTC (`Z`).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl From<&DeviceRecord> for proto::Device {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            id: record.id.unwrap_or_default(),
            uuid: record.uuid.to_string(),
            mac: record.mac.clone(),
            firmware: record.firmware.clone(),
            created_at: format_timestamp(&record.created_at),
            updated_at: format_timestamp(&record.updated_at),
        }
    }
}

impl From<DeviceRecord> for proto::Device {
    fn from(record: DeviceRecord) -> Self {
        Self::from(&record)
    }
}
