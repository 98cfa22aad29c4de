//! Archived data: the event log and the total-yield history the day
//! yields are derived from.

use tracing::warn;
use zerocopy::byteorder::little_endian::{I32, I64, U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::constants::INVALID_U64;
use crate::error::Error;

pub const EVENT_ENTRY_SIZE: usize = 48;
pub const DAY_SAMPLE_SIZE: usize = 12;

/// Two samples further apart than this are treated as a recording gap.
const SAMPLE_GAP: i64 = 48 * 60 * 60;

/// One event-log entry as it appears on the wire.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct EventEntryRaw {
    pub time: I32,
    pub entry_id: U16,
    pub sys_id: U16,
    pub serial: U32,
    pub event_code: U16,
    pub event_flags: U16,
    pub group: U32,
    pub unknown: U32,
    pub tag: U32,
    pub counter: U32,
    pub dt_change: U32,
    pub parameter: U32,
    pub new_val: U32,
    pub old_val: U32,
}

/// One archived total-yield sample.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct DaySampleRaw {
    pub time: U32,
    pub total_yield: I64,
}

/// A decoded event entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventData {
    pub time: i64,
    pub entry_id: u16,
    pub serial: u32,
    pub event_code: u16,
    pub event_flags: u16,
    pub group: u32,
    pub tag: u32,
}

/// A total-yield sample in time order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySample {
    pub time: i64,
    pub total_yield: i64,
}

/// An event resolved against the tag table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub time: i64,
    pub message: String,
    pub value: i32,
}

/// Yield of one day, derived from consecutive total-yield samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayYield {
    pub date: i64,
    pub day_yield: i64,
}

pub fn parse_event_entry(raw: &[u8]) -> Result<EventData, Error> {
    let entry = EventEntryRaw::ref_from_bytes(raw)
        .map_err(|_| Error::Protocol("malformed event entry".to_string()))?;
    Ok(EventData {
        time: entry.time.get() as i64,
        entry_id: entry.entry_id.get(),
        serial: entry.serial.get(),
        event_code: entry.event_code.get(),
        event_flags: entry.event_flags.get(),
        group: entry.group.get(),
        tag: entry.tag.get(),
    })
}

pub fn parse_day_sample(raw: &[u8]) -> Result<DaySample, Error> {
    let sample = DaySampleRaw::ref_from_bytes(raw)
        .map_err(|_| Error::Protocol("malformed total-yield sample".to_string()))?;
    Ok(DaySample {
        time: sample.time.get() as i64,
        total_yield: sample.total_yield.get(),
    })
}

pub fn is_valid_sample(sample: &DaySample) -> bool {
    sample.total_yield as u64 != INVALID_U64
}

/// Difference consecutive samples into day yields. An interval of 48 hours
/// or more counts as a gap and produces no entry; fewer than two samples
/// produce nothing.
pub fn day_yields_from_samples(samples: &[DaySample]) -> Vec<DayYield> {
    if samples.len() < 2 {
        return Vec::new();
    }

    let mut yields = Vec::with_capacity(samples.len() - 1);
    for pair in samples.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.time - prev.time >= SAMPLE_GAP {
            warn!(
                "gap between samples at {} and {}, skipping day yield",
                prev.time, cur.time
            );
            continue;
        }
        yields.push(DayYield {
            date: cur.time,
            day_yield: cur.total_yield - prev.total_yield,
        });
    }
    yields
}
