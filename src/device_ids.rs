use std::fmt::Display;

/// Vendor ID shared by every dock management controller we speak to.
pub const DOCK_VID: u16 = 0x2bef;

const TESTED_DEVICES: &[(u16, &str)] = &[
    // AT32F415-based dock management controller
    (0x0415, "AT32F415 dock management controller"),
];

/// A USB vendor ID and product ID pair.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// Compatibility of a device, based on its USB ID.
pub enum DeviceCompat {
    /// A dock controller we have exercised this protocol against.
    Tested(&'static str),
    /// Carries the dock vendor ID but an unrecognized product ID. May well
    /// speak the same management protocol; proceed with care.
    Untested,
    /// Definitely not a dock controller. Treated as if it doesn't exist.
    Incompatible,
}

impl Display for DeviceCompat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DeviceCompat::Tested(name) => write!(f, "tested device: {name}"),
            DeviceCompat::Untested => write!(f, "UNTESTED device"),
            DeviceCompat::Incompatible => write!(f, "incompatible device"),
        }
    }
}

/// Find a device's compatibility based on its USB ID.
pub fn identify_device(id: UsbId) -> DeviceCompat {
    if id.vid != DOCK_VID {
        return DeviceCompat::Incompatible;
    }

    for &(pid, name) in TESTED_DEVICES {
        if id.pid == pid {
            return DeviceCompat::Tested(name);
        }
    }

    DeviceCompat::Untested
}
