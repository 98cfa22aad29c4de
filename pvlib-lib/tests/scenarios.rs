//! End-to-end scenarios against a scripted transport: the full connect
//! handshake, every read operation and the retry behavior on corrupted
//! frames.

mod common;

use common::*;

use pvlib_lib::archive::DayYield;
use pvlib_lib::constants::{INVALID_S32, SERIAL_BROADCAST};
use pvlib_lib::error::Error;
use pvlib_lib::records::{channel, idx};
use pvlib_lib::spot::StatusKind;
use pvlib_lib::tags::TagMap;
use pvlib_lib::Plant;

const DAY: i64 = 24 * 60 * 60;

#[tokio::test]
async fn connect_and_authenticate_one_device() {
    let mock = MockConnection::new();
    seed_announce(&mock);
    seed_enumeration(&mock);
    seed_reply(&mock, &discover_reply());
    seed_reply(&mock, &auth_reply(PASSWORD));

    let mut session = SmaData2Plus::new(Connection::Mock(mock.clone()));
    let device_num = session.attach(ADDRESS).await.unwrap();
    assert_eq!(device_num, 1);
    assert_eq!(session.bluetooth().net_id(), 1);

    session.logout().await.unwrap();
    session.discover_devices(device_num).await.unwrap();
    session.authenticate(PASSWORD).await.unwrap();

    assert_eq!(session.device_serials(), vec![INVERTER_SERIAL]);
    assert!(session.devices()[0].authenticated);
    // logout, discovery and authentication are one transaction each
    assert_eq!(session.transaction_cntr(), 0x8003);

    // the authentication acknowledgment went unicast to the inverter
    let packets = tx_packets(&mock);
    let (frame, ack) = packets
        .iter()
        .find(|(_, p)| p.data.starts_with(&0xfffd040du32.to_le_bytes()))
        .expect("no auth acknowledgment sent");
    assert_eq!(ack.dst_serial, INVERTER_SERIAL);
    assert_eq!(ack.ctrl, 0xe8);
    assert_eq!(frame.dst, INVERTER_MAC);
}

#[tokio::test]
async fn wrong_password_echo_fails_the_connect() {
    let mock = MockConnection::new();
    seed_announce(&mock);
    seed_enumeration(&mock);
    seed_reply(&mock, &discover_reply());
    seed_reply(&mock, &auth_reply("9999"));

    let mut session = SmaData2Plus::new(Connection::Mock(mock.clone()));
    let device_num = session.attach(ADDRESS).await.unwrap();
    session.logout().await.unwrap();
    session.discover_devices(device_num).await.unwrap();
    assert!(matches!(
        session.authenticate(PASSWORD).await,
        Err(Error::Auth {
            serial: INVERTER_SERIAL
        })
    ));
}

#[tokio::test]
async fn full_connect_runs_the_time_ritual() {
    let (session, mock) = connected_session().await;
    assert!(session.is_connected());
    // logout, discovery, authentication, time query, clock echo; the far-off
    // inverter clock only logs a warning instead of a set-time broadcast
    assert_eq!(session.transaction_cntr(), 0x8005);
    assert_eq!(mock.rx_remaining(), 0, "all seeded replies consumed");
}

#[tokio::test]
async fn spot_ac_read() {
    let (mut session, mock) = connected_session().await;

    let records = vec![
        r1_record(0, idx::TOTAL_POWER, 500, 1234),
        r1_record(0, idx::VOLTAGE_PHASE1, 500, 23000),
        r1_record(0, idx::CURRENT_PHASE1, 500, 5000),
        r1_record(0, idx::FREQUENCY, 500, 5000),
    ];
    seed_reply(
        &mock,
        &Reply::new(channel_reply_data(channel::AC_SPOT, &records)),
    );

    let ac = session.read_ac(INVERTER_SERIAL).await.unwrap();
    assert_eq!(ac.total_power, 1234);
    assert_eq!(ac.voltage[0], 230_000);
    assert_eq!(ac.current[0], 5000);
    assert_eq!(ac.frequency, 50_000);
    assert_eq!(ac.phase_num, 3);
    assert_eq!(ac.power[0], INVALID_S32);
}

#[tokio::test]
async fn spot_dc_read_with_two_trackers() {
    let (mut session, mock) = connected_session().await;

    let records = vec![
        r1_record(1, idx::DC_POWER, 500, 500),
        r1_record(2, idx::DC_POWER, 500, 600),
        r1_record(1, idx::DC_VOLTAGE, 500, 30000),
        r1_record(2, idx::DC_VOLTAGE, 500, 31000),
    ];
    seed_reply(
        &mock,
        &Reply::new(channel_reply_data(channel::DC_SPOT, &records)),
    );

    let dc = session.read_dc(INVERTER_SERIAL).await.unwrap();
    assert_eq!(dc.tracker_num, 2);
    assert_eq!(dc.power[0], 500);
    assert_eq!(dc.power[1], 600);
    assert_eq!(dc.voltage[0], 300_000);
    assert_eq!(dc.voltage[1], 310_000);
    assert_eq!(dc.total_power, 1100);
}

#[tokio::test]
async fn stats_read() {
    let (mut session, mock) = connected_session().await;

    let records = vec![
        r2_record(idx::STAT_TOTAL_YIELD, 500, 1_234_567),
        r2_record(idx::STAT_DAY_YIELD, 500, 4200),
        r2_record(idx::STAT_OPERATION_TIME, 500, 777_000),
        r2_record(idx::STAT_FEED_IN_TIME, 500, 700_000),
    ];
    seed_reply(
        &mock,
        &Reply::new(channel_reply_data(channel::STATS, &records)),
    );

    let stats = session.read_stats(INVERTER_SERIAL).await.unwrap();
    assert_eq!(stats.total_yield, 1_234_567);
    assert_eq!(stats.day_yield, 4200);
    assert_eq!(stats.operation_time, 777_000);
    assert_eq!(stats.feed_in_time, 700_000);
}

#[tokio::test]
async fn status_read_maps_the_selected_attribute() {
    let (mut session, mock) = connected_session().await;

    let mut attrs = [0u8; 32];
    attrs[..4].copy_from_slice(&(307u32 | (1 << 24)).to_le_bytes());
    attrs[4..8].copy_from_slice(&0x00ff_fffeu32.to_le_bytes());
    let records = vec![r3_record(idx::DEVICE_STATUS, 900, &attrs)];
    seed_reply(
        &mock,
        &Reply::new(channel_reply_data(channel::STATUS, &records)),
    );

    let status = session.read_status(INVERTER_SERIAL).await.unwrap();
    assert_eq!(status.kind, StatusKind::Ok);
    assert_eq!(status.number, 307);
    assert_eq!(status.time, 900);

    // the status request goes out on the broadcast address
    let packets = tx_packets(&mock);
    let (_, request) = packets.last().unwrap();
    assert_eq!(request.dst_serial, SERIAL_BROADCAST);
}

#[tokio::test]
async fn inverter_info_read() {
    let (mut session, mock) = connected_session().await;

    let mut name = [0u8; 32];
    name[..14].copy_from_slice(b"SN: 2000333615");
    let mut type_attrs = [0u8; 32];
    type_attrs[..4].copy_from_slice(&(9073u32 | (1 << 24)).to_le_bytes());
    type_attrs[4..8].copy_from_slice(&0x00ff_fffeu32.to_le_bytes());
    let mut swver = [0u8; 32];
    swver[16] = 4;
    swver[17] = 30;
    swver[18] = 2;
    swver[19] = 2;

    let records = vec![
        r3_record(idx::DEVICE_NAME, 0, &name),
        r3_record(idx::DEVICE_TYPE, 0, &type_attrs),
        r3_record(idx::DEVICE_SWVER, 0, &swver),
    ];
    seed_reply(
        &mock,
        &Reply::new(channel_reply_data(channel::INFO, &records)),
    );

    let info = session.read_inverter_info(INVERTER_SERIAL).await.unwrap();
    assert_eq!(info.manufacture, "SMA");
    assert_eq!(info.name, "SN: 2000333615");
    assert_eq!(info.device_type, "9073");
    assert_eq!(info.firmware_version, "2.02.30.R");
}

#[tokio::test]
async fn day_yield_skips_recording_gaps() {
    let (mut session, mock) = connected_session().await;
    let t0 = 1_600_000_000i64;

    // paginated: two samples on the first page, one on the second
    let page1 = vec![
        day_sample(t0, 1000),
        day_sample(t0 + DAY, 1010),
    ];
    let page2 = vec![day_sample(t0 + 4 * DAY, 1030)];
    seed_reply(
        &mock,
        &Reply::new(archive_reply_data(channel::DAY_DATA, 0, 1, &page1)).with_packet_num(1),
    );
    seed_reply(
        &mock,
        &Reply::new(archive_reply_data(channel::DAY_DATA, 2, 2, &page2)),
    );

    let yields = session
        .read_day_yield(INVERTER_SERIAL, t0, t0 + 5 * DAY)
        .await
        .unwrap();
    assert_eq!(
        yields,
        vec![DayYield {
            date: t0 + DAY,
            day_yield: 10
        }]
    );
}

#[tokio::test]
async fn events_resolve_messages_from_the_tag_table() {
    let (mut session, mock) = connected_session().await;
    session.set_tags(TagMap::parse("417=Grid fault;The grid operator caused a fault"));

    let t0 = 1_600_000_000i64;
    let entries = vec![
        event_entry(t0 + 100, 301, 417),
        event_entry(t0 - DAY, 302, 417), // outside the requested window
    ];
    seed_reply(
        &mock,
        &Reply::new(archive_reply_data(channel::EVENTS_USER, 0, 1, &entries)),
    );

    let events = session
        .read_events(INVERTER_SERIAL, t0, t0 + DAY)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].time, t0 + 100);
    assert_eq!(events[0].message, "Grid fault");
    assert_eq!(events[0].value, 301);
}

#[tokio::test(start_paused = true)]
async fn corrupted_frames_exhaust_the_retry_budget() {
    let (mut session, mock) = connected_session().await;

    // four attempts, four corrupted replies
    for _ in 0..4 {
        let records = vec![r1_record(0, idx::TOTAL_POWER, 0, 1)];
        let mut bytes = reply_frames(
            &mock,
            &data2plus_reply(&Reply::new(channel_reply_data(channel::AC_SPOT, &records))),
        );
        // flip a bit in the last stuffed byte before the closing delimiter
        let n = bytes.len();
        bytes[n - 2] ^= 0x01;
        mock.queue_rx(&bytes);
    }

    assert!(matches!(
        session.read_ac(INVERTER_SERIAL).await,
        Err(Error::Frame(_))
    ));
    assert_eq!(mock.rx_remaining(), 0, "every attempt consumed one reply");
}

#[tokio::test(start_paused = true)]
async fn a_single_corrupted_frame_is_retried_away() {
    let (mut session, mock) = connected_session().await;

    let records = vec![r1_record(0, idx::TOTAL_POWER, 0, 4321)];
    let reply = data2plus_reply(&Reply::new(channel_reply_data(channel::AC_SPOT, &records)));

    let mut corrupted = reply_frames(&mock, &reply);
    let n = corrupted.len();
    corrupted[n - 2] ^= 0x01;
    mock.queue_rx(&corrupted);
    let good = reply_frames(&mock, &reply);
    mock.queue_rx(&good);

    let ac = session.read_ac(INVERTER_SERIAL).await.unwrap();
    assert_eq!(ac.total_power, 4321);
}

#[tokio::test]
async fn plant_facade_over_a_scripted_transport() {
    let mock = MockConnection::new();
    seed_connect(&mock);

    let mut plant = Plant::open_with_connection(Connection::Mock(mock.clone()), 0).unwrap();
    plant.connect(ADDRESS, PASSWORD).await.unwrap();
    assert_eq!(plant.num_string_inverter(), 1);
    assert_eq!(plant.device_handles(), vec![INVERTER_SERIAL]);

    let records = vec![r1_record(0, idx::TOTAL_POWER, 0, 777)];
    seed_reply(
        &mock,
        &Reply::new(channel_reply_data(channel::AC_SPOT, &records)),
    );
    let ac = plant.get_ac_values(INVERTER_SERIAL).await.unwrap();
    assert_eq!(ac.total_power, 777);

    plant.disconnect();
    assert!(matches!(
        plant.get_ac_values(INVERTER_SERIAL).await,
        Err(Error::NotConnected)
    ));
}

fn day_sample(time: i64, total_yield: i64) -> Vec<u8> {
    let mut w = pvlib_lib::codec::Writer::with_capacity(12);
    w.u32le(time as u32);
    w.i64le(total_yield);
    w.into_inner()
}

fn event_entry(time: i64, event_code: u16, tag: u32) -> Vec<u8> {
    let mut w = pvlib_lib::codec::Writer::with_capacity(48);
    w.i32le(time as i32);
    w.u16le(1); // entry id
    w.u16le(INVERTER_SYSID);
    w.u32le(INVERTER_SERIAL);
    w.u16le(event_code);
    w.u16le(0); // flags
    w.u32le(1); // group
    w.u32le(0); // unknown
    w.u32le(tag);
    w.u32le(1); // counter
    w.u32le(0); // dt change
    w.u32le(0); // parameter
    w.u32le(0); // new value
    w.u32le(0); // old value
    w.into_inner()
}
