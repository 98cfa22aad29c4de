//! Channel reply records and attribute lists.
//!
//! A channel reply carries a run of fixed-size records, each led by an
//! 8-byte header. Three body shapes exist: five 32-bit values (spot data),
//! one 64-bit counter (statistics) and a 32-byte blob holding a string or
//! an attribute list.

use tracing::debug;
use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::codec::Reader;
use crate::error::Error;

/// Channel families (`object` in a request).
pub mod channel {
    pub const AC_SPOT: u16 = 0x5100;
    pub const DC_SPOT: u16 = 0x5380;
    pub const STATS: u16 = 0x5400;
    pub const STATUS: u16 = 0x5180;
    pub const INFO: u16 = 0x5800;
    /// Event log, user level.
    pub const EVENTS_USER: u16 = 0x7010;
    /// Event log, installer level.
    pub const EVENTS_INSTALLER: u16 = 0x7012;
    /// Archived total-yield samples; source of the day yields.
    pub const DAY_DATA: u16 = 0x7020;
}

/// Measurement identifiers (`idx` in a record header).
pub mod idx {
    pub const TOTAL_POWER: u16 = 0x263f;
    pub const MAX_PHASE1: u16 = 0x411e;
    pub const MAX_PHASE2: u16 = 0x411f;
    pub const MAX_PHASE3: u16 = 0x4120;
    pub const UNKNOWN_1: u16 = 0x4166;
    pub const UNKNOWN_2: u16 = 0x417f;
    pub const POWER_PHASE1: u16 = 0x4640;
    pub const POWER_PHASE2: u16 = 0x4641;
    pub const POWER_PHASE3: u16 = 0x4642;
    pub const VOLTAGE_PHASE1: u16 = 0x4648;
    pub const VOLTAGE_PHASE2: u16 = 0x4649;
    pub const VOLTAGE_PHASE3: u16 = 0x464a;
    pub const CURRENT_PHASE1: u16 = 0x4650;
    pub const CURRENT_PHASE2: u16 = 0x4651;
    pub const CURRENT_PHASE3: u16 = 0x4652;
    pub const FREQUENCY: u16 = 0x4657;

    pub const DC_POWER: u16 = 0x251e;
    pub const DC_VOLTAGE: u16 = 0x451f;
    pub const DC_CURRENT: u16 = 0x4521;

    pub const STAT_TOTAL_YIELD: u16 = 0x2601;
    pub const STAT_DAY_YIELD: u16 = 0x2622;
    pub const STAT_OPERATION_TIME: u16 = 0x462e;
    pub const STAT_FEED_IN_TIME: u16 = 0x462f;

    pub const DEVICE_STATUS: u16 = 0x2148;

    pub const DEVICE_NAME: u16 = 0x821e;
    pub const DEVICE_CLASS: u16 = 0x821f;
    pub const DEVICE_TYPE: u16 = 0x8220;
    pub const DEVICE_UNKNOWN: u16 = 0x8221;
    pub const DEVICE_SWVER: u16 = 0x8234;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    R1,
    R2,
    R3,
}

impl RecordType {
    /// Record size on the wire, header included.
    pub fn wire_size(self) -> usize {
        match self {
            RecordType::R1 => 28,
            RecordType::R2 => 16,
            RecordType::R3 => 40,
        }
    }
}

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct RecordHeaderRaw {
    cnt: u8,
    idx: U16,
    typ: u8,
    time: U32,
}

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct Record1Raw {
    value1: U32,
    value2: U32,
    value3: U32,
    value4: U32,
    unknown: U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Sub-index, e.g. the 1-based DC tracker number.
    pub cnt: u8,
    /// Measurement identifier, see [`idx`].
    pub idx: u16,
    pub typ: u8,
    /// Unix seconds.
    pub time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    /// Five 32-bit values; the second one is the canonical measurement.
    R1 { values: [u32; 5] },
    /// One 64-bit counter.
    R2 { value: u64 },
    /// Opaque blob: ASCII string or attribute list.
    R3 { data: [u8; 32] },
}

impl RecordBody {
    /// The canonical measurement of a spot-data record.
    pub fn value2(&self) -> Option<u32> {
        match self {
            RecordBody::R1 { values } => Some(values[1]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub body: RecordBody,
}

/// One entry of an attribute list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub code: u32,
    pub selected: bool,
}

/// End-of-list marker.
const ATTRIBUTE_TERMINATOR: u32 = 0x00ff_fffe;

/// Decode 4-byte attribute entries until the terminator or the end of the
/// buffer. The low 24 bits carry the code, the top byte the selection flag.
pub fn parse_attributes(data: &[u8]) -> Vec<Attribute> {
    let mut attributes = Vec::new();
    for entry in data.chunks_exact(4) {
        let raw = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        let code = raw & 0x00ff_ffff;
        if code == ATTRIBUTE_TERMINATOR {
            break;
        }
        attributes.push(Attribute {
            code,
            selected: entry[3] != 0,
        });
    }
    attributes
}

/// Parse a channel reply: validate the `01 02` lead-in and the echoed
/// object, then collect the records of the requested type.
pub fn parse_channel_records(
    data: &[u8],
    object: u16,
    record_type: RecordType,
) -> Result<Vec<Record>, Error> {
    let mut r = Reader::new(data);
    let b0 = r.u8()?;
    let b1 = r.u8()?;
    if b0 != 0x01 || b1 != 0x02 {
        return Err(Error::Protocol(format!(
            "unexpected channel reply lead-in {b0:02x} {b1:02x}"
        )));
    }

    let reply_object = r.u16le()?;
    if reply_object != object {
        return Err(Error::Protocol(format!(
            "reply for object {reply_object:#06x}, requested {object:#06x}"
        )));
    }

    // server-provided from/to indices
    let from = r.u32le()?;
    let to = r.u32le()?;
    debug!("channel {object:#06x} reply range {from:#x}..{to:#x}");

    let size = record_type.wire_size();
    let mut records = Vec::new();
    while r.remaining() >= size {
        let raw = r.bytes(size)?;
        records.push(parse_record(raw, record_type)?);
    }
    Ok(records)
}

fn parse_record(raw: &[u8], record_type: RecordType) -> Result<Record, Error> {
    let (head, body) = raw.split_at(8);
    let head = RecordHeaderRaw::ref_from_bytes(head)
        .map_err(|_| Error::Protocol("malformed record header".to_string()))?;
    let header = RecordHeader {
        cnt: head.cnt,
        idx: head.idx.get(),
        typ: head.typ,
        time: head.time.get(),
    };

    let body = match record_type {
        RecordType::R1 => {
            let r1 = Record1Raw::ref_from_bytes(body)
                .map_err(|_| Error::Protocol("malformed record body".to_string()))?;
            RecordBody::R1 {
                values: [
                    r1.value1.get(),
                    r1.value2.get(),
                    r1.value3.get(),
                    r1.value4.get(),
                    r1.unknown.get(),
                ],
            }
        }
        RecordType::R2 => {
            let value = U64::ref_from_bytes(body)
                .map_err(|_| Error::Protocol("malformed record body".to_string()))?;
            RecordBody::R2 { value: value.get() }
        }
        RecordType::R3 => {
            let mut data = [0u8; 32];
            data.copy_from_slice(body);
            RecordBody::R3 { data }
        }
    };

    Ok(Record { header, body })
}
