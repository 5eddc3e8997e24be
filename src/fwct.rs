use byteorder::{ByteOrder, LE};
use log::debug;
use std::fmt::Display;
use std::io::{Read, Seek, SeekFrom};
use thiserror::Error;

/// The 4-byte magic at the start of every container.
pub const MAGIC: &[u8; 4] = b"FWCT";

/// Fixed payload granularity: a segment's byte length is
/// `segment_size * row_size * ROW_BYTES`.
pub const ROW_BYTES: usize = 64;

/// Component device type code. An open set; the dock firmware grows new types
/// over its life, so unrecognized values are carried through rather than
/// rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceType(pub u8);

impl DeviceType {
    pub const INVALID: DeviceType = DeviceType(0);
    pub const CCG3: DeviceType = DeviceType(1);
    pub const CY7C65219: DeviceType = DeviceType(2);
    pub const CCG4: DeviceType = DeviceType(3);
    pub const CCG5: DeviceType = DeviceType(4);
    pub const HX3: DeviceType = DeviceType(5);
    pub const MCDP2900: DeviceType = DeviceType(8);
    pub const ANX9847: DeviceType = DeviceType(9);
    pub const STDP4320: DeviceType = DeviceType(12);
    pub const CCG2: DeviceType = DeviceType(13);
    pub const RTD2183: DeviceType = DeviceType(15);
    pub const VMM5320: DeviceType = DeviceType(16);
    pub const AT32F415: DeviceType = DeviceType(17);
    pub const RTD2188: DeviceType = DeviceType(18);
    pub const RTD2143: DeviceType = DeviceType(19);
    pub const AT32F425: DeviceType = DeviceType(20);
    pub const RTD2175: DeviceType = DeviceType(21);
    pub const RTD2198: DeviceType = DeviceType(22);
    pub const AT32F407: DeviceType = DeviceType(23);

    /// Name of this device type, if it is one we know about.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::CCG3 => "CCG3",
            Self::CY7C65219 => "CY7C65219",
            Self::CCG4 => "CCG4",
            Self::CCG5 => "CCG5",
            Self::HX3 => "HX3",
            Self::MCDP2900 => "MCDP2900",
            Self::ANX9847 => "ANX9847",
            Self::STDP4320 => "STDP4320",
            Self::CCG2 => "CCG2",
            Self::RTD2183 => "RTD2183",
            Self::VMM5320 => "VMM5320",
            Self::AT32F415 => "AT32F415",
            Self::RTD2188 => "RTD2188",
            Self::RTD2143 => "RTD2143",
            Self::AT32F425 => "AT32F425",
            Self::RTD2175 => "RTD2175",
            Self::RTD2198 => "RTD2198",
            Self::AT32F407 => "AT32F407",
            _ => return None,
        })
    }
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "device type {:#04x}", self.0),
        }
    }
}

/// Image type code. Also an open set, same round-trip rule as [DeviceType].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ImageType(pub u8);

impl ImageType {
    pub const BOOTLOADER: ImageType = ImageType(0);
    pub const IMAGE1: ImageType = ImageType(1);
    pub const IMAGE2: ImageType = ImageType(2);
    pub const INVALID: ImageType = ImageType(3);
}

impl Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Self::BOOTLOADER => f.write_str("bootloader"),
            Self::IMAGE1 => f.write_str("image1"),
            Self::IMAGE2 => f.write_str("image2"),
            Self::INVALID => f.write_str("invalid"),
            Self(other) => write!(f, "image type {other:#04x}"),
        }
    }
}

/// The 40-byte container header at offset 0 of every FWCT file.
///
/// `table_size` is the byte offset where the appended signature block (2-byte
/// length field, then the signature itself) begins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerHeader {
    pub table_size: u16,
    pub checksum: u8,
    pub fwct_version: u8,
    pub sig_algorithm: u8,
    pub cdtt_version: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_id: u16,
    pub reserved: [u8; 16],
    pub composite_version: u32,
    pub image_count: u8,
    pub padding: [u8; 3],
}

impl ContainerHeader {
    pub const SIZE: usize = 40;

    /// Decode a header from the start of `buf`. Fails if the magic is absent
    /// or fewer than [Self::SIZE] bytes are available. Performs no semantic
    /// validation of the remaining fields.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < Self::SIZE {
            return Err(FormatError::Truncated {
                record: "container header",
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }

        if &buf[0..4] != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&buf[0..4]);
            return Err(FormatError::InvalidMagic { found });
        }

        let mut reserved = [0u8; 16];
        reserved.copy_from_slice(&buf[16..32]);
        let mut padding = [0u8; 3];
        padding.copy_from_slice(&buf[37..40]);

        Ok(Self {
            table_size: LE::read_u16(&buf[4..6]),
            checksum: buf[6],
            fwct_version: buf[7],
            sig_algorithm: buf[8],
            cdtt_version: buf[9],
            vendor_id: LE::read_u16(&buf[10..12]),
            product_id: LE::read_u16(&buf[12..14]),
            device_id: LE::read_u16(&buf[14..16]),
            reserved,
            composite_version: LE::read_u32(&buf[32..36]),
            image_count: buf[36],
            padding,
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        LE::write_u16(&mut buf[4..6], self.table_size);
        buf[6] = self.checksum;
        buf[7] = self.fwct_version;
        buf[8] = self.sig_algorithm;
        buf[9] = self.cdtt_version;
        LE::write_u16(&mut buf[10..12], self.vendor_id);
        LE::write_u16(&mut buf[12..14], self.product_id);
        LE::write_u16(&mut buf[14..16], self.device_id);
        buf[16..32].copy_from_slice(&self.reserved);
        LE::write_u32(&mut buf[32..36], self.composite_version);
        buf[36] = self.image_count;
        buf[37..40].copy_from_slice(&self.padding);
        buf
    }
}

/// A 60-byte per-image descriptor. One per component image, followed in the
/// table by its `num_segments` segment descriptors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageDescriptor {
    pub device_type: DeviceType,
    pub image_type: ImageType,
    pub component_id: u8,
    /// Units-per-row multiplier for this image's segments.
    pub row_size: u8,
    pub reserved: [u8; 4],
    pub fw_version: u32,
    pub app_version: u32,
    pub image_offset: u32,
    pub image_size: u32,
    pub digest: [u8; 32],
    pub num_segments: u8,
    pub padding: [u8; 3],
}

impl ImageDescriptor {
    pub const SIZE: usize = 60;

    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < Self::SIZE {
            return Err(FormatError::Truncated {
                record: "image descriptor",
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }

        let mut reserved = [0u8; 4];
        reserved.copy_from_slice(&buf[4..8]);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&buf[24..56]);
        let mut padding = [0u8; 3];
        padding.copy_from_slice(&buf[57..60]);

        Ok(Self {
            device_type: DeviceType(buf[0]),
            image_type: ImageType(buf[1]),
            component_id: buf[2],
            row_size: buf[3],
            reserved,
            fw_version: LE::read_u32(&buf[8..12]),
            app_version: LE::read_u32(&buf[12..16]),
            image_offset: LE::read_u32(&buf[16..20]),
            image_size: LE::read_u32(&buf[20..24]),
            digest,
            num_segments: buf[56],
            padding,
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.device_type.0;
        buf[1] = self.image_type.0;
        buf[2] = self.component_id;
        buf[3] = self.row_size;
        buf[4..8].copy_from_slice(&self.reserved);
        LE::write_u32(&mut buf[8..12], self.fw_version);
        LE::write_u32(&mut buf[12..16], self.app_version);
        LE::write_u32(&mut buf[16..20], self.image_offset);
        LE::write_u32(&mut buf[20..24], self.image_size);
        buf[24..56].copy_from_slice(&self.digest);
        buf[56] = self.num_segments;
        buf[57..60].copy_from_slice(&self.padding);
        buf
    }
}

/// An 8-byte per-segment descriptor nested under its owning image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SegmentDescriptor {
    pub image_id: u8,
    pub image_type: ImageType,
    pub start_row: u16,
    /// Segment length in rows; bytes = `segment_size * row_size * ROW_BYTES`.
    pub segment_size: u16,
    pub reserved: [u8; 2],
}

impl SegmentDescriptor {
    pub const SIZE: usize = 8;

    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < Self::SIZE {
            return Err(FormatError::Truncated {
                record: "segment descriptor",
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }

        Ok(Self {
            image_id: buf[0],
            image_type: ImageType(buf[1]),
            start_row: LE::read_u16(&buf[2..4]),
            segment_size: LE::read_u16(&buf[4..6]),
            reserved: [buf[6], buf[7]],
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.image_id;
        buf[1] = self.image_type.0;
        LE::write_u16(&mut buf[2..4], self.start_row);
        LE::write_u16(&mut buf[4..6], self.segment_size);
        buf[6..8].copy_from_slice(&self.reserved);
        buf
    }
}

/// One segment's descriptor plus its raw firmware payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SegmentEntry {
    pub descriptor: SegmentDescriptor,
    pub payload: Vec<u8>,
}

/// One image's descriptor plus its segments, in table order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageEntry {
    pub descriptor: ImageDescriptor,
    pub segments: Vec<SegmentEntry>,
}

/// Fully decoded in-memory form of an FWCT file. Built fresh per [parse]
/// call; read-only once produced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompositeImage {
    pub header: ContainerHeader,
    pub signature_length: u16,
    pub images: Vec<ImageEntry>,
}

/// Structural errors in a container. Any one of these aborts the whole parse.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FormatError {
    #[error(
        "FWCT magic is not present (got {found:02x?}); are you sure this is a firmware container?"
    )]
    InvalidMagic { found: [u8; 4] },

    #[error("container truncated: {record} needs {expected} bytes, got {actual}")]
    Truncated {
        record: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// All errors (format and I/O) that can happen while reading a container.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid firmware container")]
    FormatError(#[from] FormatError),

    #[error("I/O error")]
    IoError(#[from] std::io::Error),
}

/// Read up to `len` bytes at `offset`. A short read is not an error here;
/// decoders turn short buffers into [FormatError::Truncated].
fn read_at(file: &mut (impl Read + Seek), offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Parse a complete FWCT container: header, image and segment tables, and
/// each segment's raw firmware payload. All-or-nothing; no partial result is
/// returned on failure.
pub fn parse(file: &mut (impl Read + Seek)) -> Result<CompositeImage, Error> {
    let header = ContainerHeader::decode(&read_at(file, 0, ContainerHeader::SIZE)?)?;
    debug!(
        "container: vid {:04x} pid {:04x} composite version {:#010x}, {} image(s)",
        header.vendor_id, header.product_id, header.composite_version, header.image_count
    );

    // The signature block sits at the end of the tables: a 2-byte length
    // field followed by the signature itself. We only consume the length to
    // locate the payload region; verifying the signature is not our job.
    let sig_buf = read_at(file, header.table_size as u64, 2)?;
    if sig_buf.len() < 2 {
        return Err(FormatError::Truncated {
            record: "signature length field",
            expected: 2,
            actual: sig_buf.len(),
        }
        .into());
    }
    let signature_length = LE::read_u16(&sig_buf);

    // Segment payloads are concatenated after the signature block in table
    // order, so the cursor advances by each payload's length.
    let mut payload_cursor = header.table_size as u64 + signature_length as u64 + 2;

    let mut table_offset = ContainerHeader::SIZE as u64;
    let mut images = Vec::with_capacity(header.image_count as usize);
    for _ in 0..header.image_count {
        let descriptor =
            ImageDescriptor::decode(&read_at(file, table_offset, ImageDescriptor::SIZE)?)?;
        table_offset += ImageDescriptor::SIZE as u64;

        let mut segments = Vec::with_capacity(descriptor.num_segments as usize);
        for _ in 0..descriptor.num_segments {
            let segment =
                SegmentDescriptor::decode(&read_at(file, table_offset, SegmentDescriptor::SIZE)?)?;
            table_offset += SegmentDescriptor::SIZE as u64;

            let payload_len =
                segment.segment_size as usize * descriptor.row_size as usize * ROW_BYTES;
            let payload = read_at(file, payload_cursor, payload_len)?;
            if payload.len() < payload_len {
                return Err(FormatError::Truncated {
                    record: "segment payload",
                    expected: payload_len,
                    actual: payload.len(),
                }
                .into());
            }
            payload_cursor += payload_len as u64;

            segments.push(SegmentEntry {
                descriptor: segment,
                payload,
            });
        }

        images.push(ImageEntry {
            descriptor,
            segments,
        });
    }

    Ok(CompositeImage {
        header,
        signature_length,
        images,
    })
}
