//! Shared helpers for the end-to-end scenarios: reply builders that wrap
//! SMADATA2+ payloads in SMANET and L2 framing the same way the inverter
//! does, plus parsers for inspecting what the stack wrote.

#![allow(dead_code)]

pub use pvlib_lib::mock::MockConnection;
pub use pvlib_lib::smadata2plus::SmaData2Plus;
pub use pvlib_lib::transport::{Connection, Mac};

use pvlib_lib::codec::Writer;
use pvlib_lib::constants::{LOCAL_SERIAL, LOCAL_SYSID, PROTOCOL_SMADATA2PLUS};
use pvlib_lib::packet::{self, ParsedPacket};
use pvlib_lib::smabluetooth::{self, cmd, L2Frame};
use pvlib_lib::smanet;

pub const ADDRESS: &str = "11:22:33:44:55:66";
pub const INVERTER_MAC: Mac = Mac([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
pub const INVERTER_SYSID: u16 = 0x0078;
pub const INVERTER_SERIAL: u32 = 0x12345678;
pub const PASSWORD: &str = "0000";

/// A reply packet from the inverter's point of view.
pub struct Reply {
    pub src_sysid: u16,
    pub src_serial: u32,
    pub packet_num: u16,
    pub cntr: u16,
    pub data: Vec<u8>,
}

impl Reply {
    pub fn new(data: Vec<u8>) -> Self {
        Reply {
            src_sysid: INVERTER_SYSID,
            src_serial: INVERTER_SERIAL,
            packet_num: 0,
            cntr: 0x8001,
            data,
        }
    }

    pub fn with_packet_num(mut self, packet_num: u16) -> Self {
        self.packet_num = packet_num;
        self
    }

    pub fn with_cntr(mut self, cntr: u16) -> Self {
        self.cntr = cntr;
        self
    }
}

/// Serialize the 24-byte header plus data of a reply addressed to us.
pub fn data2plus_reply(reply: &Reply) -> Vec<u8> {
    assert_eq!(reply.data.len() % 4, 0, "reply data must be padded");
    let total = 24 + reply.data.len();

    let mut w = Writer::with_capacity(total);
    w.u8((total / 4) as u8);
    w.u8(0x00); // ctrl
    w.u16le(LOCAL_SYSID);
    w.u32le(LOCAL_SERIAL);
    w.u8(0x00);
    w.u8(0x00); // flag
    w.u16le(reply.src_sysid);
    w.u32le(reply.src_serial);
    w.u8(0x00);
    w.u8(0x00);
    w.u8(0x00);
    w.u8(0x00);
    w.u16le(reply.packet_num);
    w.u16le(reply.cntr);
    w.bytes(&reply.data);
    w.into_inner()
}

/// Wrap wire bytes in SMANET fragments and L2 data frames, inverter → us.
pub fn reply_frames(mock: &MockConnection, user: &[u8]) -> Vec<u8> {
    let local = mock.local_mac();
    let mut out = Vec::new();
    for fragment in smanet::encode_fragments(PROTOCOL_SMADATA2PLUS, user, INVERTER_MAC, local) {
        let frame = smabluetooth::encode_frame(cmd::DATA, INVERTER_MAC, local, &fragment)
            .expect("fragment exceeds frame size");
        out.extend_from_slice(&frame);
    }
    out
}

pub fn seed_reply(mock: &MockConnection, reply: &Reply) {
    let bytes = reply_frames(mock, &data2plus_reply(reply));
    mock.queue_rx(&bytes);
}

/// The gateway's unsolicited announce frame carrying the net id.
pub fn seed_announce(mock: &MockConnection) {
    let frame = smabluetooth::encode_frame(
        cmd::QUERY_NET,
        INVERTER_MAC,
        mock.local_mac(),
        &[0x00, 0x04, 0x70, 0x00, 0x01],
    )
    .expect("announce frame");
    mock.queue_rx(&frame);
}

/// One enumerated device followed by the empty terminator frame.
pub fn seed_enumeration(mock: &MockConnection) {
    let mut record = INVERTER_MAC.0.to_vec();
    record.push(0x01);
    let frame =
        smabluetooth::encode_frame(cmd::DEVICE_RECORD, INVERTER_MAC, mock.local_mac(), &record)
            .expect("device record frame");
    mock.queue_rx(&frame);
    let terminator =
        smabluetooth::encode_frame(cmd::DEVICE_RECORD, INVERTER_MAC, mock.local_mac(), &[])
            .expect("terminator frame");
    mock.queue_rx(&terminator);
}

pub fn discover_reply() -> Reply {
    Reply::new(vec![0u8; 28])
}

/// Echoes the password XOR 0x88 in bytes 20..31, padded with 0x88.
pub fn auth_reply(password: &str) -> Reply {
    let mut data = vec![0u8; 32];
    for slot in data[20..32].iter_mut() {
        *slot = 0x88;
    }
    for (slot, byte) in data[20..32].iter_mut().zip(password.bytes()) {
        *slot = byte ^ 0x88;
    }
    Reply::new(data)
}

/// Time reply with an inverter clock far enough off that no set-time
/// broadcast follows.
pub fn timesync_reply() -> Reply {
    let mut w = Writer::with_capacity(40);
    w.u32le(0xf000020a);
    w.skip(12);
    w.u32le(1000); // inverter time 1
    w.u32le(900); // last adjusted
    w.u32le(1000); // inverter time 2
    w.u32le(3600); // tz/dst
    w.u32le(77); // opaque counter
    w.u32le(1);
    Reply::new(w.into_inner())
}

pub fn seed_connect(mock: &MockConnection) {
    seed_announce(mock);
    seed_enumeration(mock);
    seed_reply(mock, &discover_reply());
    seed_reply(mock, &auth_reply(PASSWORD));
    seed_reply(mock, &timesync_reply());
}

/// A fully connected session over a scripted transport.
pub async fn connected_session() -> (SmaData2Plus, MockConnection) {
    let mock = MockConnection::new();
    seed_connect(&mock);
    let mut session = SmaData2Plus::new(Connection::Mock(mock.clone()));
    session
        .connect(ADDRESS, PASSWORD)
        .await
        .expect("connect against scripted transport");
    mock.clear_tx();
    (session, mock)
}

/// An R1 record: 8-byte header plus five 32-bit values, `value2` being the
/// measurement.
pub fn r1_record(cnt: u8, idx: u16, time: u32, value2: u32) -> Vec<u8> {
    let mut w = Writer::with_capacity(28);
    w.u8(cnt).u16le(idx).u8(0x00).u32le(time);
    w.u32le(0).u32le(value2).u32le(0).u32le(0).u32le(0);
    w.into_inner()
}

pub fn r2_record(idx: u16, time: u32, value: u64) -> Vec<u8> {
    let mut w = Writer::with_capacity(16);
    w.u8(0).u16le(idx).u8(0x00).u32le(time);
    w.u64le(value);
    w.into_inner()
}

pub fn r3_record(idx: u16, time: u32, data: &[u8; 32]) -> Vec<u8> {
    let mut w = Writer::with_capacity(40);
    w.u8(0).u16le(idx).u8(0x08).u32le(time);
    w.bytes(data);
    w.into_inner()
}

/// Channel reply payload: `01 02`, the echoed object, the served range and
/// the raw records.
pub fn channel_reply_data(object: u16, records: &[Vec<u8>]) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(0x01).u8(0x02);
    w.u16le(object);
    w.u32le(0).u32le(0);
    for record in records {
        w.bytes(record);
    }
    w.into_inner()
}

/// Archive reply payload: lead-in, object, entry range and raw entries.
pub fn archive_reply_data(object: u16, from: u32, to: u32, entries: &[Vec<u8>]) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(0x02).u8(0x00);
    w.u16le(object);
    w.u32le(from).u32le(to);
    for entry in entries {
        w.bytes(entry);
    }
    w.into_inner()
}

/// Every SMADATA2+ packet the stack wrote, with its L2 frame. Assumes the
/// requests fit one fragment, which all of them do.
pub fn tx_packets(mock: &MockConnection) -> Vec<(L2Frame, ParsedPacket)> {
    let tx = mock.tx_data();
    let mut packets = Vec::new();
    let mut pos = 0;
    while pos < tx.len() {
        let (frame, consumed) = smabluetooth::decode_frame(&tx[pos..]).expect("valid tx frame");
        pos += consumed;
        if frame.cmd != cmd::DATA {
            continue;
        }
        let content =
            smanet::unstuff(&frame.payload[1..frame.payload.len() - 1]).expect("valid fragment");
        let user = &content[20..content.len() - 2];
        let parsed = packet::decode(user, frame.src).expect("valid tx packet");
        packets.push((frame, parsed));
    }
    packets
}
