use hidapi::{HidDevice, HidError};
use log::trace;
use num_enum::IntoPrimitive;
use std::fmt::Display;
use thiserror::Error;

use crate::fwct::DeviceType;

/// Every packet, in both directions, is exactly this long.
pub const PACKET_SIZE: usize = 64;

/// Payload capacity after the 4-byte packet header.
pub const PAYLOAD_SIZE: usize = PACKET_SIZE - 4;

const READ_TIMEOUT_MS: i32 = 500;

/// Report IDs partition the command namespace by subsystem.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive)]
pub enum ReportId {
    /// System and device management commands.
    Sys = 1,
    /// Firmware update commands (not exercised by this tool).
    Fw = 2,
    /// Peripheral bus access commands (not exercised by this tool).
    BusIo = 3,
}

/// Commands in the SYS report namespace.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive)]
pub enum SysCommand {
    Ping = 1,
    GetComponentIdList = 2,
    GetComponentFwVer = 3,
    GetSerial = 4,
    SetSerial = 5,
    GetUid = 6,
    Reset = 7,
    ResetToRom = 8,
    ResetToBootloader = 9,
}

/// Response byte of a packet. An open set; firmware revisions may add codes,
/// so anything unrecognized classifies as [ResponseKind::Unknown] rather
/// than erroring or silently succeeding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    /// Controller has not finished initializing.
    pub const INIT: ResponseCode = ResponseCode(0x55);
    /// Command completed.
    pub const ACK: ResponseCode = ResponseCode(0xaa);
    /// Command failed.
    pub const NACK: ResponseCode = ResponseCode(0x5a);
    /// Busy; retry later.
    pub const WAIT: ResponseCode = ResponseCode(0xbb);
    /// Completion is asynchronous; check back for the result.
    pub const DEFER: ResponseCode = ResponseCode(0xdf);
    /// Host must wait for the dock to re-enumerate.
    pub const REENUM: ResponseCode = ResponseCode(0xf0);

    pub fn kind(self) -> ResponseKind {
        match self {
            Self::ACK => ResponseKind::Ack,
            Self::NACK => ResponseKind::Nack,
            Self::WAIT => ResponseKind::Wait,
            Self::DEFER => ResponseKind::Defer,
            Self::REENUM => ResponseKind::Reenum,
            Self::INIT => ResponseKind::Init,
            _ => ResponseKind::Unknown,
        }
    }

    pub fn is_ack(self) -> bool {
        self.kind() == ResponseKind::Ack
    }
}

impl Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self.kind() {
            ResponseKind::Ack => "ACK",
            ResponseKind::Nack => "NACK",
            ResponseKind::Wait => "WAIT",
            ResponseKind::Defer => "DEFER",
            ResponseKind::Reenum => "REENUM",
            ResponseKind::Init => "INIT",
            ResponseKind::Unknown => "unknown",
        };
        write!(f, "{} ({:#04x})", name, self.0)
    }
}

/// Classification of a [ResponseCode].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResponseKind {
    Ack,
    Nack,
    Wait,
    Defer,
    Reenum,
    Init,
    Unknown,
}

/// A fixed 64-byte packet: report ID, command, action, response code, then
/// 60 bytes of payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    buf: [u8; PACKET_SIZE],
}

impl Packet {
    /// Build a request. The payload is truncated or zero-padded to exactly
    /// [PAYLOAD_SIZE] bytes; the response byte is left zero for the device
    /// to fill in.
    pub fn request(report: ReportId, command: u8, action: u8, payload: &[u8]) -> Self {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = report.into();
        buf[1] = command;
        buf[2] = action;
        let len = payload.len().min(PAYLOAD_SIZE);
        buf[4..4 + len].copy_from_slice(&payload[..len]);
        Packet { buf }
    }

    /// Interpret a received report as a packet. Fails if fewer than
    /// [PACKET_SIZE] bytes arrived.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < PACKET_SIZE {
            return Err(ProtocolError::ReportTooShort {
                expected: PACKET_SIZE,
                actual: bytes.len(),
            });
        }
        let mut buf = [0u8; PACKET_SIZE];
        buf.copy_from_slice(&bytes[..PACKET_SIZE]);
        Ok(Packet { buf })
    }

    pub fn report_id(&self) -> u8 {
        self.buf[0]
    }

    pub fn command(&self) -> u8 {
        self.buf[1]
    }

    pub fn action(&self) -> u8 {
        self.buf[2]
    }

    pub fn response(&self) -> ResponseCode {
        ResponseCode(self.buf[3])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[4..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// One component reported by GET_COMPONENT_ID_LIST.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ComponentEntry {
    pub component_id: u8,
    pub device_type: DeviceType,
}

/// Decoded GET_COMPONENT_FWVER response. The internal layout of the three
/// version blocks depends on the component's device type; see
/// [crate::report] for the per-type decoders.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FirmwareVersions {
    pub component_id: u8,
    pub device_type: DeviceType,
    /// Active-image selector plus per-image validity bits; meaning is
    /// device-type-specific.
    pub active_image: u8,
    pub bootloader: [u8; 8],
    pub image0: [u8; 8],
    pub image1: [u8; 8],
}

/// Send one SYS command and return the ACKed response packet. A blocking
/// write followed by a blocking read bounded at 500 ms; the read completes
/// as soon as the dock posts its response on the interrupt pipe. Any non-ACK
/// response surfaces as [ProtocolError::CommandRejected]; retry policy for
/// WAIT/DEFER belongs to the caller.
pub fn send_sys_command(
    device: &HidDevice,
    command: SysCommand,
    payload: &[u8],
) -> Result<Packet, Error> {
    let request = Packet::request(ReportId::Sys, command.into(), 0, payload);
    trace!("{command:?} request: {:02x?}", request.as_bytes());

    device
        .write(request.as_bytes())
        .map_err(|e| Error::DeviceIoError {
            source: e,
            action: "sending command packet",
        })?;

    let mut buf = [0u8; PACKET_SIZE];
    let read = device
        .read_timeout(&mut buf, READ_TIMEOUT_MS)
        .map_err(|e| Error::DeviceIoError {
            source: e,
            action: "reading command response",
        })?;
    if read == 0 {
        return Err(ProtocolError::ResponseTimeout.into());
    }

    let response = Packet::from_bytes(&buf[..read])?;
    trace!("{command:?} response: {:02x?}", response.as_bytes());

    let code = response.response();
    if !code.is_ack() {
        return Err(ProtocolError::CommandRejected(code).into());
    }

    Ok(response)
}

/// Enumerate the dock's components: their IDs and device types.
pub fn get_component_list(device: &HidDevice) -> Result<Vec<ComponentEntry>, Error> {
    let response = send_sys_command(device, SysCommand::GetComponentIdList, &[])?;
    parse_component_list(&response).map_err(Into::into)
}

fn parse_component_list(packet: &Packet) -> Result<Vec<ComponentEntry>, ProtocolError> {
    let payload = packet.payload();
    let count = payload[0] as usize;
    if 1 + 2 * count > payload.len() {
        return Err(ProtocolError::ComponentCountTooLarge(payload[0]));
    }

    Ok((0..count)
        .map(|i| ComponentEntry {
            component_id: payload[1 + 2 * i],
            device_type: DeviceType(payload[2 + 2 * i]),
        })
        .collect())
}

/// Read one component's firmware version blocks.
pub fn get_component_fwver(
    device: &HidDevice,
    component: ComponentEntry,
) -> Result<FirmwareVersions, Error> {
    let response = send_sys_command(
        device,
        SysCommand::GetComponentFwVer,
        &[component.component_id, component.device_type.0],
    )?;
    Ok(parse_fwver(&response))
}

fn parse_fwver(packet: &Packet) -> FirmwareVersions {
    let payload = packet.payload();
    FirmwareVersions {
        component_id: payload[0],
        device_type: DeviceType(payload[1]),
        active_image: payload[2],
        bootloader: version_block(payload, 3),
        image0: version_block(payload, 11),
        image1: version_block(payload, 19),
    }
}

fn version_block(payload: &[u8], start: usize) -> [u8; 8] {
    let mut block = [0u8; 8];
    block.copy_from_slice(&payload[start..start + 8]);
    block
}

/// All errors (protocol and I/O) that can happen during a command exchange.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("HID protocol error")]
    ProtocolError(#[from] ProtocolError),

    #[error("USB transaction error while {action}")]
    DeviceIoError {
        source: HidError,
        action: &'static str,
    },
}

/// Failure modes that can happen even when all I/O succeeds.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("device rejected command: response {0}")]
    CommandRejected(ResponseCode),

    #[error("device did not respond before the read timeout")]
    ResponseTimeout,

    #[error("report from device was {actual} bytes, expected {expected}")]
    ReportTooShort { expected: usize, actual: usize },

    #[error("component list claims {0} entries, more than a packet can hold")]
    ComponentCountTooLarge(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_always_64_bytes() {
        for len in [0usize, 1, 59, 60, 61, 200] {
            let payload = vec![0x5au8; len];
            let packet = Packet::request(ReportId::Sys, 2, 0, &payload);
            assert_eq!(packet.as_bytes().len(), PACKET_SIZE);
        }
    }

    #[test]
    fn short_payloads_are_zero_padded() {
        let packet = Packet::request(ReportId::Sys, SysCommand::Ping.into(), 0, &[7, 8]);
        assert_eq!(packet.as_bytes()[0..4], [1, 1, 0, 0]);
        assert_eq!(packet.payload()[0..2], [7, 8]);
        assert!(packet.payload()[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn long_payloads_are_truncated() {
        let payload: Vec<u8> = (0..200).map(|i| i as u8).collect();
        let packet = Packet::request(ReportId::Fw, 3, 1, &payload);
        assert_eq!(packet.payload(), &payload[..PAYLOAD_SIZE]);
    }

    #[test]
    fn response_codes_classify() {
        assert!(ResponseCode(0xaa).is_ack());
        assert_eq!(ResponseCode(0x5a).kind(), ResponseKind::Nack);
        assert_eq!(ResponseCode(0xbb).kind(), ResponseKind::Wait);
        assert_eq!(ResponseCode(0xdf).kind(), ResponseKind::Defer);
        assert_eq!(ResponseCode(0xf0).kind(), ResponseKind::Reenum);
        assert_eq!(ResponseCode(0x55).kind(), ResponseKind::Init);
        // Anything else is explicitly unknown, never a silent success.
        assert_eq!(ResponseCode(0x00).kind(), ResponseKind::Unknown);
        assert_eq!(ResponseCode(0x42).kind(), ResponseKind::Unknown);
        assert!(!ResponseCode(0x42).is_ack());
    }

    #[test]
    fn short_reports_are_rejected() {
        assert!(matches!(
            Packet::from_bytes(&[0u8; 63]),
            Err(ProtocolError::ReportTooShort {
                expected: 64,
                actual: 63,
            })
        ));
    }

    fn response_packet(fill: &[u8]) -> Packet {
        let mut buf = [0u8; PACKET_SIZE];
        buf[..fill.len()].copy_from_slice(fill);
        Packet::from_bytes(&buf).unwrap()
    }

    #[test]
    fn component_list_parses_pairs() {
        let packet = response_packet(&[1, 2, 0, 0xaa, 2, 0x01, 0x04, 0x02, 0x17]);
        let components = parse_component_list(&packet).unwrap();
        assert_eq!(
            components,
            vec![
                ComponentEntry {
                    component_id: 1,
                    device_type: DeviceType(4),
                },
                ComponentEntry {
                    component_id: 2,
                    device_type: DeviceType(0x17),
                },
            ]
        );
    }

    #[test]
    fn oversized_component_count_is_rejected() {
        let packet = response_packet(&[1, 2, 0, 0xaa, 40]);
        assert!(matches!(
            parse_component_list(&packet),
            Err(ProtocolError::ComponentCountTooLarge(40))
        ));
    }

    #[test]
    fn fwver_fields_sit_at_fixed_offsets() {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0..7].copy_from_slice(&[1, 3, 0, 0xaa, 5, 17, 1]);
        for (i, b) in buf[7..31].iter_mut().enumerate() {
            *b = 0x80 + i as u8;
        }
        let fw = parse_fwver(&Packet::from_bytes(&buf).unwrap());

        assert_eq!(fw.component_id, 5);
        assert_eq!(fw.device_type, DeviceType::AT32F415);
        assert_eq!(fw.active_image, 1);
        assert_eq!(fw.bootloader[0], 0x80);
        assert_eq!(fw.bootloader[7], 0x87);
        assert_eq!(fw.image0[0], 0x88);
        assert_eq!(fw.image1[0], 0x90);
        assert_eq!(fw.image1[7], 0x97);
    }
}
