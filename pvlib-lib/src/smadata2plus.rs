//! The SMADATA2+ application protocol: discovery, authentication, time
//! synchronization, channel queries and archive queries against one plant.
//!
//! A session owns the whole stack below it (SMANET over SMA-Bluetooth over
//! the raw connection), the device table and the transaction counter. One
//! transaction is in flight at a time; the counter advances when the
//! transaction ends, whether it succeeded or not.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::DateTime;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::archive::{
    day_yields_from_samples, is_valid_sample, parse_day_sample, parse_event_entry, DaySample,
    DayYield, Event, EventData, DAY_SAMPLE_SIZE, EVENT_ENTRY_SIZE,
};
use crate::codec::{Reader, Writer};
use crate::constants::{
    CTRL_MASTER, CTRL_NO_BROADCAST, CTRL_UNKNOWN, NUM_RETRIES, PROTOCOL_SMADATA2PLUS,
    SERIAL_BROADCAST, SYSID_BROADCAST, TRANSACTION_CNTR_START,
};
use crate::error::Error;
use crate::info::{decode_inverter_info, InverterInfo};
use crate::packet::{self, next_transaction_cntr, Packet, ParsedPacket};
use crate::records::{channel, parse_channel_records, Record, RecordType};
use crate::smabluetooth::SmaBluetooth;
use crate::smanet::SmaNet;
use crate::spot::{decode_ac, decode_dc, decode_stats, decode_status, Ac, Dc, Stats, Status};
use crate::tags::{tag_file_path, TagMap};
use crate::transport::{Connection, Mac, ReadWrite};

const PASSWORD_XOR: u8 = 0x88;
const PASSWORD_LEN: usize = 12;

/// Largest application payload a reply is expected to carry.
const MAX_PACKET_DATA: usize = 512;

/// Access level for the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    User,
    Installer,
}

impl UserType {
    fn event_object(self) -> u16 {
        match self {
            UserType::User => channel::EVENTS_USER,
            UserType::Installer => channel::EVENTS_INSTALLER,
        }
    }
}

/// One inverter known to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmaDevice {
    pub sysid: u16,
    pub serial: u32,
    pub mac: Mac,
    pub authenticated: bool,
}

pub struct SmaData2Plus {
    smanet: SmaNet,
    devices: Vec<SmaDevice>,
    transaction_cntr: u16,
    transaction_active: bool,
    tags: TagMap,
    connected: bool,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Render an inverter-local timestamp for the logs. `tz` is the offset in
/// seconds as reported by the inverter, with daylight saving on top.
fn time_string(time: i64, tz: i32, dst: bool) -> String {
    let offset = tz as i64 + if dst { 3600 } else { 0 };
    match DateTime::<Utc>::from_timestamp(time + offset, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("invalid time {time}"),
    }
}

fn password_matches(echo: &[u8], password: &str) -> bool {
    let mut expected = [PASSWORD_XOR; PASSWORD_LEN];
    for (slot, byte) in expected.iter_mut().zip(password.bytes()) {
        *slot = byte ^ PASSWORD_XOR;
    }
    echo == &expected[..]
}

impl SmaData2Plus {
    /// Build an idle session on top of `conn`. The tag table is read from
    /// the resource directory; a missing file only costs event messages.
    pub fn new(conn: Connection) -> Self {
        let bt = SmaBluetooth::new(conn);
        let smanet = SmaNet::new(PROTOCOL_SMADATA2PLUS, bt);

        let tag_file = tag_file_path();
        let tags = match TagMap::load(&tag_file) {
            Ok(tags) => {
                debug!("loaded {} tags from {}", tags.len(), tag_file.display());
                tags
            }
            Err(err) => {
                warn!("could not read tags from {}: {err}", tag_file.display());
                TagMap::new()
            }
        };

        SmaData2Plus {
            smanet,
            devices: Vec::new(),
            transaction_cntr: TRANSACTION_CNTR_START,
            transaction_active: false,
            tags,
            connected: false,
        }
    }

    /// Replace the tag table, e.g. with one loaded from a custom file.
    pub fn set_tags(&mut self, tags: TagMap) {
        self.tags = tags;
    }

    pub fn transaction_cntr(&self) -> u16 {
        self.transaction_cntr
    }

    pub fn devices(&self) -> &[SmaDevice] {
        &self.devices
    }

    pub fn inverter_num(&self) -> usize {
        self.devices.len()
    }

    pub fn device_serials(&self) -> Vec<u32> {
        self.devices.iter().map(|d| d.serial).collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn find_device(&self, serial: u32) -> Option<&SmaDevice> {
        self.devices.iter().find(|d| d.serial == serial)
    }

    fn begin_transaction(&mut self) -> Result<(), Error> {
        if self.transaction_active {
            return Err(Error::Protocol(
                "a transaction is already active".to_string(),
            ));
        }
        self.transaction_active = true;
        Ok(())
    }

    fn end_transaction(&mut self) {
        if self.transaction_active {
            self.transaction_active = false;
            self.transaction_cntr = next_transaction_cntr(self.transaction_cntr);
        }
    }

    /// Send `packet` with an explicit transaction counter. Unicast
    /// destinations are resolved against the device table.
    async fn write_replay(&mut self, packet: &Packet, transaction_cntr: u16) -> Result<(), Error> {
        let (dst_sysid, dst_serial, mac) = if packet.dst_serial == SERIAL_BROADCAST {
            (SYSID_BROADCAST, SERIAL_BROADCAST, Mac::BROADCAST)
        } else {
            match self.find_device(packet.dst_serial) {
                Some(device) => (device.sysid, device.serial, device.mac),
                None => {
                    return Err(Error::Protocol(format!(
                        "device {:#010x} not in device table",
                        packet.dst_serial
                    )))
                }
            }
        };

        let buf = packet::encode(packet, dst_sysid, dst_serial, transaction_cntr);
        trace!("write smadata2plus packet: {:02x?}", buf);
        self.smanet.write(&buf, mac).await
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<(), Error> {
        self.write_replay(packet, self.transaction_cntr).await
    }

    async fn read_packet(&mut self) -> Result<ParsedPacket, Error> {
        let mut buf = vec![0u8; MAX_PACKET_DATA + crate::constants::DATA2PLUS_HEADER_SIZE];
        let (n, src) = self.smanet.read(&mut buf).await?;
        trace!("read smadata2plus packet: {:02x?}", &buf[..n]);
        packet::decode(&buf[..n], src)
    }

    async fn request_channel(
        &mut self,
        serial: u32,
        object: u16,
        from_idx: u32,
        to_idx: u32,
    ) -> Result<(), Error> {
        let mut w = Writer::with_capacity(12);
        w.u8(0x00).u8(0x02);
        w.u16le(object);
        w.u32le(from_idx);
        w.u32le(to_idx);

        let packet = Packet {
            ctrl: CTRL_MASTER,
            dst_serial: serial,
            flag: 0x00,
            packet_num: 0,
            start: true,
            data: w.into_inner(),
        };
        self.write_packet(&packet).await
    }

    async fn read_records(
        &mut self,
        serial: u32,
        object: u16,
        from_idx: u32,
        to_idx: u32,
        record_type: RecordType,
    ) -> Result<Vec<Record>, Error> {
        self.begin_transaction()?;
        let res = self
            .read_records_inner(serial, object, from_idx, to_idx, record_type)
            .await;
        self.end_transaction();
        res
    }

    async fn read_records_inner(
        &mut self,
        serial: u32,
        object: u16,
        from_idx: u32,
        to_idx: u32,
        record_type: RecordType,
    ) -> Result<Vec<Record>, Error> {
        self.request_channel(serial, object, from_idx, to_idx)
            .await?;
        let reply = self.read_packet().await?;
        parse_channel_records(&reply.data, object, record_type)
    }

    /// Open the transport and learn the number of devices on the bus.
    pub async fn attach(&mut self, address: &str) -> Result<usize, Error> {
        self.smanet.bluetooth_mut().connect(address).await?;
        Ok(self.smanet.bluetooth().device_num())
    }

    pub fn bluetooth(&self) -> &SmaBluetooth {
        self.smanet.bluetooth()
    }

    /// Run the full connect sequence: logout broadcast, device discovery,
    /// authentication and time synchronization, each with back-off retries.
    pub async fn connect(&mut self, address: &str, password: &str) -> Result<(), Error> {
        let device_num = self.attach(address).await?;
        info!("{device_num} devices");

        self.logout().await?;

        let mut cnt = 0;
        loop {
            match self.discover_devices(device_num).await {
                Ok(()) => break,
                Err(err) if cnt < NUM_RETRIES => {
                    cnt += 1;
                    warn!("device discovery failed: {err}; retrying ...");
                    sleep(Duration::from_secs(cnt as u64)).await;
                }
                Err(err) => {
                    error!("device discovery failed");
                    return Err(err);
                }
            }
        }

        if self.devices.len() > 1 {
            return Err(Error::Unsupported(format!(
                "{} inverters found, but only single-inverter plants are supported",
                self.devices.len()
            )));
        }

        let mut cnt = 0;
        loop {
            match self.authenticate(password).await {
                Ok(()) => break,
                Err(err @ Error::Auth { .. }) => {
                    error!("authentication failed");
                    return Err(err);
                }
                Err(err) if cnt < NUM_RETRIES => {
                    cnt += 1;
                    warn!("authentication failed: {err}; retrying ...");
                    sleep(Duration::from_secs(cnt as u64)).await;
                }
                Err(err) => {
                    error!("authentication failed");
                    return Err(err);
                }
            }
        }

        let mut cnt = 0;
        loop {
            match self.sync_time().await {
                Ok(()) => break,
                Err(err) if cnt < NUM_RETRIES => {
                    cnt += 1;
                    warn!("time sync failed: {err}; retrying ...");
                    sleep(Duration::from_secs(cnt as u64)).await;
                }
                Err(err) => {
                    error!("time sync failed");
                    return Err(err);
                }
            }
        }
        info!("synchronized time");

        self.connected = true;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.smanet.bluetooth_mut().disconnect();
        self.connected = false;
    }

    /// Broadcast a logout so a stale session on the inverter ends. No
    /// response is expected.
    pub async fn logout(&mut self) -> Result<(), Error> {
        let mut w = Writer::with_capacity(8);
        w.u32le(0xfffd010e);
        w.u32le(0xffffffff);

        let packet = Packet {
            ctrl: CTRL_MASTER,
            dst_serial: SERIAL_BROADCAST,
            flag: 0x03,
            packet_num: 0,
            start: true,
            data: w.into_inner(),
        };

        self.begin_transaction()?;
        let res = self.write_packet(&packet).await;
        self.end_transaction();
        res
    }

    /// Broadcast a discovery request and collect one answer per device on
    /// the bus into the device table.
    pub async fn discover_devices(&mut self, device_num: usize) -> Result<(), Error> {
        self.devices.clear();
        self.begin_transaction()?;
        let res = self.discover_devices_inner(device_num).await;
        self.end_transaction();
        res
    }

    async fn discover_devices_inner(&mut self, device_num: usize) -> Result<(), Error> {
        self.request_channel(SERIAL_BROADCAST, 0, 0, 0).await?;
        for _ in 0..device_num {
            let reply = self.read_packet().await?;
            info!(
                "discovered device sysid {:#06x} serial {:#010x} at {}",
                reply.src_sysid, reply.src_serial, reply.src_mac
            );
            self.devices.push(SmaDevice {
                sysid: reply.src_sysid,
                serial: reply.src_serial,
                mac: reply.src_mac,
                authenticated: false,
            });
        }
        Ok(())
    }

    async fn send_password(&mut self, password: &str) -> Result<(), Error> {
        let now = unix_now();
        info!("sending password at {}", time_string(now, 0, false));

        let mut w = Writer::with_capacity(32);
        w.u32le(0xfffd040c);
        w.u8(0x07);
        w.skip(3);
        w.u32le(40 * 365 * 24 * 60 * 60);
        w.u32le(now as u32);
        w.skip(4);

        let mut auth = [PASSWORD_XOR; PASSWORD_LEN];
        for (slot, byte) in auth.iter_mut().zip(password.bytes()) {
            *slot = byte ^ PASSWORD_XOR;
        }
        w.bytes(&auth);

        let packet = Packet {
            ctrl: CTRL_MASTER,
            dst_serial: SERIAL_BROADCAST,
            flag: 0x01,
            packet_num: 0,
            start: true,
            data: w.into_inner(),
        };
        self.write_packet(&packet).await
    }

    /// Single-inverter plants expect an extra unicast acknowledgment.
    async fn ack_auth(&mut self, serial: u32) -> Result<(), Error> {
        let mut w = Writer::with_capacity(8);
        w.u32le(0xfffd040d);
        w.u8(0x01);
        w.skip(3);

        let packet = Packet {
            ctrl: CTRL_MASTER | CTRL_NO_BROADCAST | CTRL_UNKNOWN,
            dst_serial: serial,
            flag: 0x01,
            packet_num: 0,
            start: true,
            data: w.into_inner(),
        };
        self.write_packet(&packet).await
    }

    /// Broadcast the password and pull one answer per discovered device.
    /// A wrong password echo is logged per device; the connect only fails
    /// when no device accepts it.
    pub async fn authenticate(&mut self, password: &str) -> Result<(), Error> {
        self.begin_transaction()?;
        let res = self.authenticate_inner(password).await;
        self.end_transaction();
        res
    }

    async fn authenticate_inner(&mut self, password: &str) -> Result<(), Error> {
        self.send_password(password).await?;

        let mut accepted = 0usize;
        for _ in 0..self.devices.len() {
            let reply = self.read_packet().await?;

            let echo_ok = reply
                .data
                .get(20..32)
                .is_some_and(|echo| password_matches(echo, password));
            if echo_ok {
                accepted += 1;
            } else {
                info!(
                    "plant authentication error, serial: {:#010x}",
                    reply.src_serial
                );
            }

            match self
                .devices
                .iter_mut()
                .find(|d| d.serial == reply.src_serial)
            {
                Some(device) => device.authenticated = true,
                None => warn!(
                    "authentication answer from unregistered device: {:#010x}",
                    reply.src_serial
                ),
            }
        }

        if accepted == 0 {
            if let Some(device) = self.devices.first() {
                return Err(Error::Auth {
                    serial: device.serial,
                });
            }
        }

        if self.devices.len() == 1 {
            self.ack_auth(self.devices[0].serial).await?;
        }

        Ok(())
    }

    /// Two-step time ritual: query the inverter clock, acknowledge the
    /// answer under its own counter, echo the clock data back and, for a
    /// moderate deviation, set the inverter time to ours. Large deviations
    /// are only logged so the archive continuity is not clobbered.
    pub async fn sync_time(&mut self) -> Result<(), Error> {
        let res = self.sync_time_inner().await;
        if self.transaction_active {
            self.end_transaction();
        }
        res
    }

    async fn sync_time_inner(&mut self) -> Result<(), Error> {
        // Opaque three-slot preamble, reproduced from captured traffic.
        let mut w = Writer::with_capacity(40);
        w.u32le(0xf000020a);
        w.u32le(0x00236d00);
        w.u32le(0x00236d00);
        w.u32le(0x00236d00);
        w.skip(16);
        w.u32le(1);
        w.u32le(1);

        let packet = Packet {
            ctrl: CTRL_MASTER,
            dst_serial: SERIAL_BROADCAST,
            flag: 0x00,
            packet_num: 0,
            start: true,
            data: w.into_inner(),
        };

        self.begin_transaction()?;
        let res = self.write_packet(&packet).await;
        self.end_transaction();
        res?;

        // The answer is not a reply in the transaction sense: it carries
        // the inverter's own counter.
        let reply = self.read_packet().await?;
        if reply.data.len() != 40 {
            return Err(Error::Protocol(format!(
                "time reply with unexpected length {}",
                reply.data.len()
            )));
        }

        let mut r = Reader::new(&reply.data);
        r.skip(16)?;
        let inverter_time1 = r.u32le()?;
        let last_adjusted = r.u32le()?;
        let inverter_time2 = r.u32le()?;
        let tz_dst = r.u32le()?;
        let unknown = r.u32le()?;

        let tz = (tz_dst & 0xfffffe) as i32;
        let dst = tz_dst & 0x1 != 0;

        info!(
            "time last adjusted: {}",
            time_string(last_adjusted as i64, tz, dst)
        );
        info!("inverter time zone: {tz} daylight saving time active: {dst}");
        info!(
            "inverter time 1: {}",
            time_string(inverter_time1 as i64, tz, dst)
        );
        info!(
            "inverter time 2: {}",
            time_string(inverter_time2 as i64, tz, dst)
        );
        debug!("unknown time field: {unknown}");

        // Acknowledge under the reply's counter.
        let first_serial = match self.devices.first() {
            Some(device) => device.serial,
            None => {
                return Err(Error::Protocol(
                    "no devices known for time sync".to_string(),
                ))
            }
        };
        let mut w = Writer::with_capacity(8);
        w.u32le(0xf000010a);
        w.u32le(0x1);
        let packet = Packet {
            ctrl: CTRL_MASTER | CTRL_UNKNOWN | CTRL_NO_BROADCAST,
            dst_serial: first_serial,
            flag: 0x00,
            packet_num: 0,
            start: false,
            data: w.into_inner(),
        };
        self.write_replay(&packet, reply.transaction_cntr).await?;

        // Echo the inverter's own clock data.
        let mut w = Writer::with_capacity(40);
        w.u32le(0xf000020a);
        w.u32le(0x00236d00);
        w.u32le(0x00236d00);
        w.u32le(0x00236d00);
        w.u32le(inverter_time1);
        w.u32le(last_adjusted);
        w.u32le(inverter_time2);
        w.u32le(tz_dst);
        w.u32le(unknown);
        w.u32le(1);
        let packet = Packet {
            ctrl: CTRL_MASTER,
            dst_serial: SERIAL_BROADCAST,
            flag: 0x00,
            packet_num: 0,
            start: true,
            data: w.into_inner(),
        };
        self.begin_transaction()?;
        let res = self.write_packet(&packet).await;
        self.end_transaction();
        res?;

        let now = unix_now();
        let deviation = (now - inverter_time1 as i64).abs();
        if deviation > 15 && deviation < 5 * 60 {
            info!("time deviation {deviation}, setting inverter time");

            let mut w = Writer::with_capacity(40);
            w.u32le(0xf000020a);
            w.u32le(0x00236d00);
            w.u32le(0x00236d00);
            w.u32le(0x00236d00);
            w.u32le(now as u32);
            w.u32le(now as u32);
            w.u32le(now as u32);
            w.u32le(tz as u32 | dst as u32);
            w.u32le(unknown.wrapping_add(1));
            w.u32le(1);
            let packet = Packet {
                ctrl: CTRL_MASTER,
                dst_serial: SERIAL_BROADCAST,
                flag: 0x00,
                packet_num: 0,
                start: true,
                data: w.into_inner(),
            };
            self.begin_transaction()?;
            let res = self.write_packet(&packet).await;
            self.end_transaction();
            res?;
        } else if deviation >= 5 * 60 {
            warn!("time deviation {deviation} too high, time not synced");
        }

        Ok(())
    }

    async fn request_archive_data(
        &mut self,
        serial: u32,
        object: u16,
        from: i64,
        to: i64,
    ) -> Result<(), Error> {
        let mut w = Writer::with_capacity(12);
        w.u16le(0x0200);
        w.u16le(object);
        w.u32le(from as u32);
        w.u32le(to as u32);

        let packet = Packet {
            ctrl: CTRL_MASTER | CTRL_NO_BROADCAST,
            dst_serial: serial,
            flag: 0x00,
            packet_num: 0,
            start: true,
            data: w.into_inner(),
        };
        self.write_packet(&packet).await
    }

    /// Read a paginated archive: packets arrive until one carries packet
    /// number zero. Returns the raw fixed-size entries.
    async fn read_archive_entries(
        &mut self,
        serial: u32,
        object: u16,
        from: i64,
        to: i64,
        entry_size: usize,
    ) -> Result<Vec<Vec<u8>>, Error> {
        self.begin_transaction()?;
        let res = self
            .read_archive_entries_inner(serial, object, from, to, entry_size)
            .await;
        self.end_transaction();
        res
    }

    async fn read_archive_entries_inner(
        &mut self,
        serial: u32,
        object: u16,
        from: i64,
        to: i64,
        entry_size: usize,
    ) -> Result<Vec<Vec<u8>>, Error> {
        self.request_archive_data(serial, object, from, to).await?;

        let mut entries = Vec::new();
        loop {
            let reply = self.read_packet().await?;
            if reply.data.len() < 12 {
                return Err(Error::Protocol(format!(
                    "archive reply with unexpected length {}",
                    reply.data.len()
                )));
            }

            let mut r = Reader::new(&reply.data);
            r.skip(2)?;
            let reply_object = r.u16le()?;
            if reply_object != object {
                return Err(Error::Protocol(format!(
                    "unexpected archive object {reply_object:#06x}, requested {object:#06x}"
                )));
            }
            let data_from = r.u32le()? as i64;
            let data_to = r.u32le()? as i64;
            let count = data_to - data_from + 1;
            if count <= 0 {
                return Err(Error::Protocol(format!(
                    "unexpected archive entry count {count}"
                )));
            }

            let mut taken = 0i64;
            while r.remaining() >= entry_size && taken < count {
                entries.push(r.bytes(entry_size)?.to_vec());
                taken += 1;
            }

            if reply.packet_num == 0 {
                break;
            }
        }
        Ok(entries)
    }

    /// Read the event log. Some firmware ignores the requested window and
    /// returns the full history, so entries are filtered here.
    pub async fn read_event_data(
        &mut self,
        serial: u32,
        from: i64,
        to: i64,
        user: UserType,
    ) -> Result<Vec<EventData>, Error> {
        let raw = self
            .read_archive_entries(serial, user.event_object(), from, to, EVENT_ENTRY_SIZE)
            .await?;

        let mut events = Vec::with_capacity(raw.len());
        for chunk in &raw {
            let event = parse_event_entry(chunk)?;
            if from <= event.time && event.time <= to {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Read archived total-yield samples, dropping invalid entries and
    /// anything outside the requested window.
    pub async fn read_total_day_data(
        &mut self,
        serial: u32,
        from: i64,
        to: i64,
    ) -> Result<Vec<DaySample>, Error> {
        let raw = self
            .read_archive_entries(serial, channel::DAY_DATA, from, to, DAY_SAMPLE_SIZE)
            .await?;

        let mut samples = Vec::with_capacity(raw.len());
        for chunk in &raw {
            let sample = parse_day_sample(chunk)?;
            if from <= sample.time && sample.time <= to && is_valid_sample(&sample) {
                samples.push(sample);
            }
        }
        Ok(samples)
    }

    pub async fn read_ac(&mut self, serial: u32) -> Result<Ac, Error> {
        self.ensure_connected()?;
        let mut cnt = 0;
        let records = loop {
            match self
                .read_records(serial, channel::AC_SPOT, 0x200000, 0x50ffff, RecordType::R1)
                .await
            {
                Ok(records) => break records,
                Err(err) if cnt < NUM_RETRIES => {
                    cnt += 1;
                    warn!("reading ac spot data failed: {err}; retrying ...");
                    sleep(Duration::from_secs(cnt as u64)).await;
                }
                Err(err) => {
                    error!("reading ac spot data failed");
                    return Err(err);
                }
            }
        };
        Ok(decode_ac(&records, unix_now()))
    }

    pub async fn read_dc(&mut self, serial: u32) -> Result<Dc, Error> {
        self.ensure_connected()?;
        let mut cnt = 0;
        let records = loop {
            match self
                .read_records(serial, channel::DC_SPOT, 0x200000, 0x5000ff, RecordType::R1)
                .await
            {
                Ok(records) => break records,
                Err(err) if cnt < NUM_RETRIES => {
                    cnt += 1;
                    warn!("reading dc spot data failed: {err}; retrying ...");
                    sleep(Duration::from_secs(cnt as u64)).await;
                }
                Err(err) => {
                    error!("reading dc spot data failed");
                    return Err(err);
                }
            }
        };
        Ok(decode_dc(&records, unix_now()))
    }

    pub async fn read_stats(&mut self, serial: u32) -> Result<Stats, Error> {
        self.ensure_connected()?;
        let mut cnt = 0;
        let records = loop {
            match self
                .read_records(serial, channel::STATS, 0x20000, 0x50ffff, RecordType::R2)
                .await
            {
                Ok(records) => break records,
                Err(err) if cnt < NUM_RETRIES => {
                    cnt += 1;
                    warn!("reading stats failed: {err}; retrying ...");
                    sleep(Duration::from_secs(cnt as u64)).await;
                }
                Err(err) => {
                    error!("reading stats failed");
                    return Err(err);
                }
            }
        };
        Ok(decode_stats(&records, unix_now()))
    }

    pub async fn read_status(&mut self, _serial: u32) -> Result<Status, Error> {
        self.ensure_connected()?;
        let mut cnt = 0;
        let records = loop {
            // The status channel answers on the broadcast address.
            match self
                .read_records(
                    SERIAL_BROADCAST,
                    channel::STATUS,
                    0x214800,
                    0x2148ff,
                    RecordType::R3,
                )
                .await
            {
                Ok(records) => break records,
                Err(err) if cnt < NUM_RETRIES => {
                    cnt += 1;
                    warn!("reading inverter status failed: {err}; retrying ...");
                    sleep(Duration::from_secs(cnt as u64)).await;
                }
                Err(err) => {
                    error!("reading inverter status failed");
                    return Err(err);
                }
            }
        };
        Ok(decode_status(&records))
    }

    pub async fn read_inverter_info(&mut self, serial: u32) -> Result<InverterInfo, Error> {
        self.ensure_connected()?;
        let mut cnt = 0;
        let records = loop {
            match self
                .read_records(serial, channel::INFO, 0x821e00, 0x8234ff, RecordType::R3)
                .await
            {
                Ok(records) => break records,
                Err(err) if cnt < NUM_RETRIES => {
                    cnt += 1;
                    warn!("reading inverter info failed: {err}; retrying ...");
                    sleep(Duration::from_secs(cnt as u64)).await;
                }
                Err(err) => {
                    error!("reading inverter info failed");
                    return Err(err);
                }
            }
        };
        Ok(decode_inverter_info(&records))
    }

    pub async fn read_day_yield(
        &mut self,
        serial: u32,
        from: i64,
        to: i64,
    ) -> Result<Vec<DayYield>, Error> {
        self.ensure_connected()?;
        let mut cnt = 0;
        let samples = loop {
            match self.read_total_day_data(serial, from, to).await {
                Ok(samples) => break samples,
                Err(err) if cnt < NUM_RETRIES => {
                    cnt += 1;
                    warn!("reading total day data failed: {err}; retrying ...");
                    sleep(Duration::from_secs(cnt as u64)).await;
                }
                Err(err) => {
                    error!("reading total day data failed");
                    return Err(err);
                }
            }
        };
        Ok(day_yields_from_samples(&samples))
    }

    pub async fn read_events(
        &mut self,
        serial: u32,
        from: i64,
        to: i64,
    ) -> Result<Vec<Event>, Error> {
        self.ensure_connected()?;
        let mut cnt = 0;
        let event_data = loop {
            match self.read_event_data(serial, from, to, UserType::User).await {
                Ok(events) => break events,
                Err(err) if cnt < NUM_RETRIES => {
                    cnt += 1;
                    warn!("reading event data failed: {err}; retrying ...");
                    sleep(Duration::from_secs(cnt as u64)).await;
                }
                Err(err) => {
                    error!("reading event data failed");
                    return Err(err);
                }
            }
        };

        let events = event_data
            .iter()
            .map(|event| {
                let message = match self.tags.get(event.tag) {
                    Some(tag) => tag.short_desc.clone(),
                    None => {
                        debug!("no tag description for {}", event.tag);
                        String::new()
                    }
                };
                Event {
                    time: event.time,
                    message,
                    value: event.event_code as i32,
                }
            })
            .collect();
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_echo_comparison() {
        let mut echo = [PASSWORD_XOR; 12];
        for (slot, byte) in echo.iter_mut().zip("0000".bytes()) {
            *slot = byte ^ PASSWORD_XOR;
        }
        assert!(password_matches(&echo, "0000"));
        assert!(!password_matches(&echo, "0001"));
        assert!(!password_matches(&echo[..11], "0000"));
    }

    #[test]
    fn event_objects_per_user_level() {
        assert_eq!(UserType::User.event_object(), 0x7010);
        assert_eq!(UserType::Installer.event_object(), 0x7012);
    }

    #[test]
    fn time_string_applies_offset() {
        assert_eq!(time_string(0, 3600, false), "1970-01-01 01:00:00");
        assert_eq!(time_string(0, 0, true), "1970-01-01 01:00:00");
    }
}
