use std::fmt::Write;

use crate::fwct::DeviceType;
use crate::protocol::FirmwareVersions;

/// Render one component's firmware versions for humans. The sub-field layout
/// of the 8-byte version blocks differs per device type, so each known type
/// gets its own small decoder; everything else falls back to hex dumps.
pub fn describe(fw: &FirmwareVersions) -> String {
    match fw.device_type {
        DeviceType::AT32F415 => describe_mcu(fw),
        DeviceType::CCG4 => describe_ccg4(fw),
        _ => describe_generic(fw),
    }
}

/// AT32F415 dock management controller: one version byte per component,
/// most significant first.
fn mcu_version(block: &[u8; 8]) -> String {
    format!("{}.{}.{}.{}", block[3], block[2], block[1], block[0])
}

fn describe_mcu(fw: &FirmwareVersions) -> String {
    let mut out = String::new();
    writeln!(out, "Component {}: {}", fw.component_id, fw.device_type).unwrap();
    let active = if fw.active_image == 0 {
        "bootloader"
    } else {
        "application"
    };
    writeln!(out, "  Active image: {active}").unwrap();
    writeln!(out, "  Bootloader version: {}", mcu_version(&fw.bootloader)).unwrap();
    write!(out, "  Application version: {}", mcu_version(&fw.image0)).unwrap();
    out
}

/// CCG4 base version: major/minor nibbles, patch byte, 16-bit build number.
fn ccg4_base_version(block: &[u8; 8]) -> String {
    format!(
        "{}.{}.{}.{}",
        block[3] >> 4,
        block[3] & 0x0f,
        block[2],
        u16::from_le_bytes([block[0], block[1]])
    )
}

/// CCG4 application version: two ASCII type characters, then major/minor
/// nibbles and a patch byte.
fn ccg4_app_version(block: &[u8; 8]) -> String {
    format!(
        "{}{}.{}.{}.{}",
        block[5] as char,
        block[4] as char,
        block[7] >> 4,
        block[7] & 0x0f,
        block[6]
    )
}

fn describe_ccg4(fw: &FirmwareVersions) -> String {
    let mut out = String::new();
    writeln!(out, "Component {}: {}", fw.component_id, fw.device_type).unwrap();
    let active = if fw.active_image & 0x01 == 1 {
        "image0"
    } else {
        "image1"
    };
    writeln!(out, "  Active image: {active}").unwrap();
    writeln!(
        out,
        "  Bootloader: base {}, app {}",
        ccg4_base_version(&fw.bootloader),
        ccg4_app_version(&fw.bootloader)
    )
    .unwrap();

    let image0_valid = fw.active_image & 0x40 == 0;
    let image1_valid = fw.active_image & 0x80 == 0;
    writeln!(
        out,
        "  Image0 ({}): base {}, app {}",
        if image0_valid { "valid" } else { "invalid" },
        ccg4_base_version(&fw.image0),
        ccg4_app_version(&fw.image0)
    )
    .unwrap();
    write!(
        out,
        "  Image1 ({}): base {}, app {}",
        if image1_valid { "valid" } else { "invalid" },
        ccg4_base_version(&fw.image1),
        ccg4_app_version(&fw.image1)
    )
    .unwrap();
    out
}

fn describe_generic(fw: &FirmwareVersions) -> String {
    let mut out = String::new();
    writeln!(out, "Component {}: {}", fw.component_id, fw.device_type).unwrap();
    writeln!(out, "  Active image: {:#04x}", fw.active_image).unwrap();
    writeln!(out, "  Bootloader block: {:02x?}", fw.bootloader).unwrap();
    writeln!(out, "  Image0 block: {:02x?}", fw.image0).unwrap();
    write!(out, "  Image1 block: {:02x?}", fw.image1).unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fw(device_type: DeviceType, active_image: u8) -> FirmwareVersions {
        FirmwareVersions {
            component_id: 0,
            device_type,
            active_image,
            bootloader: [0; 8],
            image0: [0; 8],
            image1: [0; 8],
        }
    }

    #[test]
    fn mcu_versions_read_high_byte_first() {
        let mut versions = fw(DeviceType::AT32F415, 1);
        versions.bootloader = [4, 3, 2, 1, 0, 0, 0, 0];
        versions.image0 = [9, 8, 7, 6, 0, 0, 0, 0];

        let report = describe(&versions);
        assert!(report.contains("AT32F415"));
        assert!(report.contains("Active image: application"));
        assert!(report.contains("Bootloader version: 1.2.3.4"));
        assert!(report.contains("Application version: 6.7.8.9"));
    }

    #[test]
    fn ccg4_base_version_unpacks_nibbles() {
        // build 0x0102 = 258, patch 5, version nibbles 3.4
        let block = [0x02, 0x01, 5, 0x34, 0, 0, 0, 0];
        assert_eq!(ccg4_base_version(&block), "3.4.5.258");
    }

    #[test]
    fn ccg4_app_version_has_ascii_tag() {
        // tag "nb", patch 3, version nibbles 2.1
        let block = [0, 0, 0, 0, b'b', b'n', 3, 0x21];
        assert_eq!(ccg4_app_version(&block), "nb.2.1.3");
    }

    #[test]
    fn ccg4_validity_bits() {
        let report = describe(&fw(DeviceType::CCG4, 0x01 | 0x80));
        assert!(report.contains("Active image: image0"));
        assert!(report.contains("Image0 (valid)"));
        assert!(report.contains("Image1 (invalid)"));
    }

    #[test]
    fn unknown_types_fall_back_to_hex() {
        let report = describe(&fw(DeviceType(0x33), 0));
        assert!(report.contains("device type 0x33"));
        assert!(report.contains("Bootloader block:"));
    }
}
