use device_logging_core::proto::Device;

/// `(id, uuid, mac, firmware, timestamp)` for each listed device.
const SAMPLES: [(i64, &str, &str, &str, &str); 3] = [
    (
        1,
        "9add349c-c35c-4d32-ab0f-53da1ba40a2a",
        "EF-2B-C4-F5-D6-34",
        "2.1.5",
        "2024-05-28T15:21:51.137Z",
    ),
    (
        2,
        "d2293412-36eb-46e7-9231-af7e9249fffe",
        "E7-34-96-33-0C-4C",
        "1.0.3",
        "2024-01-28T15:20:51.137Z",
    ),
    (
        3,
        "eee58ca8-ca51-47a5-ab48-163fd0e44b77",
        "68-93-9B-B5-33-B9",
        "4.3.1",
        "2024-08-28T15:18:21.137Z",
    ),
];

/// Fixed listing served by `GetDevices`. Storage is never read.
pub fn sample_devices() -> Vec<Device> {
    SAMPLES
        .iter()
        .map(|&(id, uuid, mac, firmware, at)| Device {
            id,
            uuid: uuid.to_string(),
            mac: mac.to_string(),
            firmware: firmware.to_string(),
            created_at: at.to_string(),
            updated_at: at.to_string(),
        })
        .collect()
}
