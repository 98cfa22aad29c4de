//! SMADATA2+ packet header: addressing, control flags and the transaction
//! counter. The 24-byte header precedes the application data; total packet
//! length is always a multiple of four and encoded as `len / 4` in the
//! first byte.

use bytes::Bytes;

use crate::codec::{Reader, Writer};
use crate::constants::{
    CTRL_MASTER, CTRL_NO_BROADCAST, CTRL_UNKNOWN, DATA2PLUS_HEADER_SIZE, LOCAL_SERIAL,
    LOCAL_SYSID, SERIAL_BROADCAST, TRANSACTION_CNTR_START,
};
use crate::error::Error;
use crate::transport::Mac;

/// An outgoing request before addressing is resolved.
#[derive(Debug, Clone)]
pub struct Packet {
    pub ctrl: u8,
    pub dst_serial: u32,
    pub flag: u8,
    pub packet_num: u16,
    pub start: bool,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn broadcast(ctrl: u8, flag: u8, data: Vec<u8>) -> Self {
        Packet {
            ctrl,
            dst_serial: SERIAL_BROADCAST,
            flag,
            packet_num: 0,
            start: true,
            data,
        }
    }

    pub fn unicast(ctrl: u8, dst_serial: u32, flag: u8, data: Vec<u8>) -> Self {
        Packet {
            ctrl,
            dst_serial,
            flag,
            packet_num: 0,
            start: true,
            data,
        }
    }
}

/// A received packet with its header fields exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub src_mac: Mac,
    pub ctrl: u8,
    pub dst_sysid: u16,
    pub dst_serial: u32,
    pub src_sysid: u16,
    pub src_serial: u32,
    pub flag: u8,
    pub packet_num: u16,
    pub start: bool,
    pub transaction_cntr: u16,
    pub data: Bytes,
}

/// Advance the transaction counter. Values below the start value are
/// treated as uninitialized; 0xFFFF wraps back to the start.
pub fn next_transaction_cntr(cntr: u16) -> u16 {
    if cntr < TRANSACTION_CNTR_START || cntr == 0xffff {
        TRANSACTION_CNTR_START
    } else {
        cntr + 1
    }
}

/// Serialize header and application data. The data is zero-padded to a
/// multiple of four bytes.
pub fn encode(
    packet: &Packet,
    dst_sysid: u16,
    dst_serial: u32,
    transaction_cntr: u16,
) -> Vec<u8> {
    let padding = (4 - packet.data.len() % 4) % 4;
    let total = DATA2PLUS_HEADER_SIZE + packet.data.len() + padding;

    let mut w = Writer::with_capacity(total);
    w.u8((total / 4) as u8);
    w.u8(packet.ctrl);
    w.u16le(dst_sysid);
    w.u32le(dst_serial);
    w.u8(0x00);
    w.u8(packet.flag);
    w.u16le(LOCAL_SYSID);
    w.u32le(LOCAL_SERIAL);
    w.u8(0x00);

    // For ctrl 0xE8 the second flag byte stays zero.
    if packet.ctrl == CTRL_MASTER | CTRL_NO_BROADCAST | CTRL_UNKNOWN {
        w.u8(0x00);
    } else {
        w.u8(packet.flag);
    }

    w.u8(0x00);
    w.u8(0x00);

    // Offset 20 carries the packet number only on a start packet.
    if packet.start {
        w.u8(packet.packet_num as u8);
    } else {
        w.u8(0x00);
    }
    w.u8(0x00);
    w.u16le(transaction_cntr);

    w.bytes(&packet.data);
    w.skip(padding);
    w.into_inner()
}

/// Parse a received packet. `src_mac` comes from the transport layer.
pub fn decode(buf: &[u8], src_mac: Mac) -> Result<ParsedPacket, Error> {
    if buf.len() < DATA2PLUS_HEADER_SIZE {
        return Err(Error::Protocol(format!(
            "packet of {} bytes is shorter than the header",
            buf.len()
        )));
    }

    let mut r = Reader::new(buf);
    r.skip(1)?; // length / 4
    let ctrl = r.u8()?;
    let dst_sysid = r.u16le()?;
    let dst_serial = r.u32le()?;
    r.skip(1)?;
    let flag = r.u8()?;
    let src_sysid = r.u16le()?;
    let src_serial = r.u32le()?;

    let packet_num = u16::from_le_bytes([buf[20], buf[21]]);
    let transaction_cntr = u16::from_le_bytes([buf[22], buf[23]]);
    let start = buf[23] == 0x80;

    Ok(ParsedPacket {
        src_mac,
        ctrl,
        dst_sysid,
        dst_serial,
        src_sysid,
        src_serial,
        flag,
        packet_num,
        start,
        transaction_cntr,
        data: Bytes::copy_from_slice(&buf[DATA2PLUS_HEADER_SIZE..]),
    })
}
