/// Check if a device is a known dock controller based on USB IDs.
pub mod device_ids;

/// Parse FWCT firmware container files: header, image and segment tables,
/// and the raw per-segment payloads.
pub mod fwct;

/// Frame fixed 64-byte HID packets and exchange management commands with a
/// connected dock controller.
pub mod protocol;

/// Format per-component firmware versions for humans, keyed by device type.
pub mod report;
