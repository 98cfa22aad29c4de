//! Live measurement results and their decoding from channel records.
//!
//! Every numeric field carries a sentinel meaning "unknown"
//! ([`INVALID_S32`]/[`INVALID_S64`]); consumers must check before use.

use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::{debug, error};

use crate::constants::{INVALID_S32, INVALID_S64, INVALID_U32, INVALID_U64};
use crate::records::{idx, parse_attributes, Record, RecordBody};

pub const NUM_PHASES: usize = 3;
/// Upper bound on MPPT tracker inputs; records beyond it are dropped.
pub const MAX_TRACKERS: usize = 8;

const VOLTAGE_DIVISOR: i32 = 100; // to volts
const CURRENT_DIVISOR: i32 = 1000; // to ampere
const FREQUENCY_DIVISOR: i32 = 100; // to hertz

/// AC-side spot values. Voltages in mV, currents in mA, frequency in mHz,
/// power in W.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ac {
    pub time: i64,
    pub total_power: i32,
    pub frequency: i32,
    pub phase_num: u32,
    pub power: [i32; NUM_PHASES],
    pub voltage: [i32; NUM_PHASES],
    pub current: [i32; NUM_PHASES],
}

impl Default for Ac {
    fn default() -> Self {
        Ac {
            time: 0,
            total_power: INVALID_S32,
            frequency: INVALID_S32,
            phase_num: 0,
            power: [INVALID_S32; NUM_PHASES],
            voltage: [INVALID_S32; NUM_PHASES],
            current: [INVALID_S32; NUM_PHASES],
        }
    }
}

/// DC-side spot values per MPPT tracker. Trackers are numbered from 1;
/// index 0 of the arrays belongs to tracker 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dc {
    pub time: i64,
    pub total_power: i32,
    pub tracker_num: u32,
    pub power: [i32; MAX_TRACKERS],
    pub voltage: [i32; MAX_TRACKERS],
    pub current: [i32; MAX_TRACKERS],
}

impl Default for Dc {
    fn default() -> Self {
        Dc {
            time: 0,
            total_power: INVALID_S32,
            tracker_num: 0,
            power: [INVALID_S32; MAX_TRACKERS],
            voltage: [INVALID_S32; MAX_TRACKERS],
            current: [INVALID_S32; MAX_TRACKERS],
        }
    }
}

/// Lifetime statistics. Yields in Wh, times in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub time: i64,
    pub total_yield: i64,
    pub day_yield: i64,
    pub operation_time: i64,
    pub feed_in_time: i64,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            time: 0,
            total_yield: INVALID_S64,
            day_yield: INVALID_S64,
            operation_time: INVALID_S64,
            feed_in_time: INVALID_S64,
        }
    }
}

/// Device condition reported by the status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u32)]
pub enum StatusKind {
    Ok = 307,
    Error = 35,
    Off = 303,
    Warning = 455,
    #[num_enum(catch_all)]
    Unknown(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub time: i64,
    pub kind: StatusKind,
    /// Raw status code as reported.
    pub number: u32,
}

impl Default for Status {
    fn default() -> Self {
        Status {
            time: 0,
            kind: StatusKind::Unknown(0),
            number: 0,
        }
    }
}

fn convert_ac_power(value: u32) -> i32 {
    value as i32
}

fn convert_ac_voltage(value: u32) -> i32 {
    if value != INVALID_U32 {
        value as i32 * 1000 / VOLTAGE_DIVISOR
    } else {
        INVALID_S32
    }
}

fn convert_ac_current(value: u32) -> i32 {
    if value != INVALID_U32 {
        value as i32 * 1000 / CURRENT_DIVISOR
    } else {
        INVALID_S32
    }
}

fn convert_frequency(value: u32) -> i32 {
    if value != INVALID_U32 {
        value as i32 * 1000 / FREQUENCY_DIVISOR
    } else {
        INVALID_S32
    }
}

pub fn decode_ac(records: &[Record], time: i64) -> Ac {
    let mut ac = Ac {
        time,
        phase_num: NUM_PHASES as u32,
        ..Ac::default()
    };

    for record in records {
        let Some(value) = record.body.value2() else {
            continue;
        };
        debug!("ac idx {:#06x} value {}", record.header.idx, value);

        match record.header.idx {
            idx::TOTAL_POWER => ac.total_power = convert_ac_power(value),
            idx::MAX_PHASE1 | idx::MAX_PHASE2 | idx::MAX_PHASE3 => {}
            idx::UNKNOWN_1 | idx::UNKNOWN_2 => {
                debug!("unhandled ac channel {:#06x}: {}", record.header.idx, value);
            }
            idx::POWER_PHASE1 => ac.power[0] = convert_ac_power(value),
            idx::POWER_PHASE2 => ac.power[1] = convert_ac_power(value),
            idx::POWER_PHASE3 => ac.power[2] = convert_ac_power(value),
            idx::VOLTAGE_PHASE1 => ac.voltage[0] = convert_ac_voltage(value),
            idx::VOLTAGE_PHASE2 => ac.voltage[1] = convert_ac_voltage(value),
            idx::VOLTAGE_PHASE3 => ac.voltage[2] = convert_ac_voltage(value),
            idx::CURRENT_PHASE1 => ac.current[0] = convert_ac_current(value),
            idx::CURRENT_PHASE2 => ac.current[1] = convert_ac_current(value),
            idx::CURRENT_PHASE3 => ac.current[2] = convert_ac_current(value),
            idx::FREQUENCY => ac.frequency = convert_frequency(value),
            _ => {}
        }
    }

    ac
}

fn convert_dc_value(value: u32, divisor: i32) -> i32 {
    if value as i32 != INVALID_S32 {
        value as i32 * 1000 / divisor
    } else {
        INVALID_S32
    }
}

pub fn decode_dc(records: &[Record], time: i64) -> Dc {
    let mut dc = Dc {
        time,
        tracker_num: 0,
        ..Dc::default()
    };

    for record in records {
        let Some(value) = record.body.value2() else {
            continue;
        };
        debug!("dc idx {:#06x} value {}", record.header.idx, value);

        let tracker = record.header.cnt as usize;
        if tracker < 1 || tracker > MAX_TRACKERS {
            error!("invalid tracker number: {tracker}");
            continue;
        }
        if tracker as u32 > dc.tracker_num {
            dc.tracker_num = tracker as u32;
        }

        match record.header.idx {
            idx::DC_POWER => {
                dc.power[tracker - 1] = if value as i32 != INVALID_S32 {
                    value as i32
                } else {
                    INVALID_S32
                }
            }
            idx::DC_VOLTAGE => dc.voltage[tracker - 1] = convert_dc_value(value, VOLTAGE_DIVISOR),
            idx::DC_CURRENT => dc.current[tracker - 1] = convert_dc_value(value, CURRENT_DIVISOR),
            _ => {}
        }
    }

    // Total power stays at the sentinel unless some tracker reported one.
    let trackers = &dc.power[..dc.tracker_num as usize];
    if trackers.iter().any(|&p| p != INVALID_S32) {
        dc.total_power = trackers.iter().filter(|&&p| p != INVALID_S32).sum();
    }

    dc
}

fn convert_stats_value(value: u64) -> i64 {
    if value != INVALID_U64 {
        value as i64
    } else {
        INVALID_S64
    }
}

pub fn decode_stats(records: &[Record], time: i64) -> Stats {
    let mut stats = Stats {
        time,
        ..Stats::default()
    };

    for record in records {
        let RecordBody::R2 { value } = record.body else {
            continue;
        };
        debug!("stats idx {:#06x} value {}", record.header.idx, value);

        match record.header.idx {
            idx::STAT_TOTAL_YIELD => stats.total_yield = convert_stats_value(value),
            idx::STAT_DAY_YIELD => stats.day_yield = convert_stats_value(value),
            idx::STAT_OPERATION_TIME => stats.operation_time = convert_stats_value(value),
            idx::STAT_FEED_IN_TIME => stats.feed_in_time = convert_stats_value(value),
            _ => {}
        }
    }

    stats
}

pub fn decode_status(records: &[Record]) -> Status {
    let mut status = Status::default();

    for record in records {
        let RecordBody::R3 { data } = &record.body else {
            continue;
        };
        match record.header.idx {
            idx::DEVICE_STATUS => {
                status.time = record.header.time as i64;
                for attribute in parse_attributes(data) {
                    if attribute.selected {
                        status.number = attribute.code;
                        status.kind = StatusKind::from_primitive(attribute.code);
                    }
                }
            }
            other => error!("unexpected status record idx {other:#06x}"),
        }
    }

    status
}
