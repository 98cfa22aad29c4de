// Protocol constants shared across the SMADATA2+ stack.

/// L2 header length in bytes, counted from the `FF 00` pair after the
/// leading 0x7E delimiter up to and including the command byte.
pub const L2_HEADER_SIZE: usize = 18;

/// Maximum L2 payload; the 16-bit length field stays below 0x100 in practice.
pub const L2_MAX_PAYLOAD: usize = 0xFF - L2_HEADER_SIZE;

/// SMANET protocol identifier for SMADATA2+ user data.
pub const PROTOCOL_SMADATA2PLUS: u16 = 0x6560;

/// Size of the SMADATA2+ packet header.
pub const DATA2PLUS_HEADER_SIZE: usize = 24;

/* ctrl */
pub const CTRL_MASTER: u8 = 1 << 7 | 1 << 5;
pub const CTRL_NO_BROADCAST: u8 = 1 << 6;
pub const CTRL_UNKNOWN: u8 = 1 << 3;

/* address */
pub const SYSID_BROADCAST: u16 = 0xffff;
pub const SERIAL_BROADCAST: u32 = 0xffffffff;

/// SUSy-ID this library identifies itself with.
pub const LOCAL_SYSID: u16 = 0x0078;
/// Serial this library identifies itself with.
pub const LOCAL_SERIAL: u32 = 0x3a8b74b6;

pub const TRANSACTION_CNTR_START: u16 = 0x8000;

/// Retry budget for protocol operations; back-off sleeps 1, 2, 3 seconds.
pub const NUM_RETRIES: u32 = 3;

/* sentinel values: consumers must check before using a field */
pub const INVALID_S32: i32 = i32::MIN;
pub const INVALID_S64: i64 = i64::MIN;
pub const INVALID_U32: u32 = u32::MAX;
pub const INVALID_U64: u64 = u64::MAX;
