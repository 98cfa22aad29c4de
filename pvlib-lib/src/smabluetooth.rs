//! SMA-Bluetooth L2 framing and piconet enumeration.
//!
//! Every exchange with the inverter's Bluetooth gateway is wrapped in a
//! small frame carrying source/destination addresses and a command byte.
//! On connect the gateway announces itself unsolicited; this layer answers
//! with a network query and counts the peers the gateway enumerates.

use bytes::Bytes;
use tracing::{debug, info, trace};

use crate::constants::{L2_HEADER_SIZE, L2_MAX_PAYLOAD};
use crate::error::Error;
use crate::transport::{Connection, Mac, ReadWrite};

/// L2 command bytes.
pub mod cmd {
    /// Carries one SMANET fragment.
    pub const DATA: u8 = 0x01;
    /// Network announce/query.
    pub const QUERY_NET: u8 = 0x02;
    /// One enumerated piconet peer per frame; empty payload terminates.
    pub const DEVICE_RECORD: u8 = 0x0A;
}

const DELIMITER: u8 = 0x7E;
/// Fixed pair following the delimiter.
const MAGIC: [u8; 2] = [0xFF, 0x00];
/// Payload of the "query network" request.
const QUERY_NET_PAYLOAD: [u8; 4] = [0x00, 0x04, 0x70, 0x00];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2Frame {
    pub cmd: u8,
    pub src: Mac,
    pub dst: Mac,
    pub payload: Bytes,
}

/// A peer discovered during piconet enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PiconetDevice {
    pub mac: Mac,
    pub net_id: u8,
}

fn header_checksum(len_lo: u8, len_hi: u8) -> u8 {
    DELIMITER ^ MAGIC[0] ^ MAGIC[1] ^ len_lo ^ len_hi
}

/// Serialize one frame. The length field counts everything after the
/// leading delimiter, so it equals `payload.len() + 18`.
pub fn encode_frame(cmd: u8, src: Mac, dst: Mac, payload: &[u8]) -> Result<Vec<u8>, Error> {
    if payload.len() > L2_MAX_PAYLOAD {
        return Err(Error::Frame(format!(
            "payload of {} bytes exceeds the frame maximum of {}",
            payload.len(),
            L2_MAX_PAYLOAD
        )));
    }

    let len = (payload.len() + L2_HEADER_SIZE) as u16;
    let [len_lo, len_hi] = len.to_le_bytes();

    let mut buf = Vec::with_capacity(1 + len as usize);
    buf.push(DELIMITER);
    buf.extend_from_slice(&MAGIC);
    buf.push(len_lo);
    buf.push(len_hi);
    buf.push(header_checksum(len_lo, len_hi));
    buf.extend_from_slice(&src.0);
    buf.extend_from_slice(&dst.0);
    buf.push(cmd);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Parse one complete frame from the front of `buf`, returning it together
/// with the number of bytes consumed.
pub fn decode_frame(buf: &[u8]) -> Result<(L2Frame, usize), Error> {
    if buf.len() < 6 {
        return Err(Error::InsufficientData {
            expected: 6,
            actual: buf.len(),
        });
    }
    if buf[0] != DELIMITER || buf[1] != MAGIC[0] || buf[2] != MAGIC[1] {
        return Err(Error::Frame(format!(
            "bad frame start {:02x} {:02x} {:02x}",
            buf[0], buf[1], buf[2]
        )));
    }
    let len_lo = buf[3];
    let len_hi = buf[4];
    if buf[5] != header_checksum(len_lo, len_hi) {
        return Err(Error::Frame(format!(
            "header checksum mismatch: expected {:02x}, got {:02x}",
            header_checksum(len_lo, len_hi),
            buf[5]
        )));
    }
    let frame_len = u16::from_le_bytes([len_lo, len_hi]) as usize;
    if frame_len < L2_HEADER_SIZE {
        return Err(Error::Frame(format!("frame length {frame_len} too small")));
    }
    let total = frame_len + 1;
    if buf.len() < total {
        return Err(Error::InsufficientData {
            expected: total,
            actual: buf.len(),
        });
    }

    let mut src = [0u8; 6];
    let mut dst = [0u8; 6];
    src.copy_from_slice(&buf[6..12]);
    dst.copy_from_slice(&buf[12..18]);
    let cmd = buf[18];
    let payload = Bytes::copy_from_slice(&buf[19..total]);

    Ok((
        L2Frame {
            cmd,
            src: Mac(src),
            dst: Mac(dst),
            payload,
        },
        total,
    ))
}

/// The L2 endpoint: owns the raw connection and the piconet state learned
/// during the handshake.
pub struct SmaBluetooth {
    conn: Connection,
    local_mac: Mac,
    peer_mac: Mac,
    net_id: u8,
    device_num: usize,
    rx: Vec<u8>,
}

impl SmaBluetooth {
    pub fn new(conn: Connection) -> Self {
        SmaBluetooth {
            conn,
            local_mac: Mac::default(),
            peer_mac: Mac::default(),
            net_id: 0,
            device_num: 0,
            rx: Vec::new(),
        }
    }

    /// Open the transport and run the bus-enumeration handshake.
    pub async fn connect(&mut self, address: &str) -> Result<(), Error> {
        self.conn.connect(address).await?;
        self.local_mac = self.conn.local_mac();
        self.rx.clear();

        // The gateway announces itself with an unsolicited frame; its source
        // address is the one all further frames are exchanged with.
        let announce = self.read_frame().await?;
        self.peer_mac = announce.src;
        if announce.cmd == cmd::QUERY_NET && announce.payload.len() > 4 {
            self.net_id = announce.payload[4];
        }
        info!(
            "inverter gateway {} announced itself, net id {}",
            self.peer_mac, self.net_id
        );

        self.write_frame(cmd::QUERY_NET, &QUERY_NET_PAYLOAD, self.peer_mac)
            .await?;

        let mut count = 0usize;
        loop {
            let frame = self.read_frame().await?;
            if frame.cmd != cmd::DEVICE_RECORD {
                trace!("skipping frame cmd {:#04x} during enumeration", frame.cmd);
                continue;
            }
            if frame.payload.is_empty() {
                break;
            }
            match parse_device_record(&frame.payload) {
                Some(device) => {
                    debug!("piconet device {} net id {}", device.mac, device.net_id);
                    count += 1;
                }
                None => {
                    return Err(Error::Frame(format!(
                        "device record with unexpected length {}",
                        frame.payload.len()
                    )))
                }
            }
        }
        self.device_num = count;
        info!("{} secondary devices on the bus", count);

        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.conn.disconnect();
        self.rx.clear();
    }

    /// Number of secondary devices enumerated during connect.
    pub fn device_num(&self) -> usize {
        self.device_num
    }

    pub fn net_id(&self) -> u8 {
        self.net_id
    }

    pub fn local_mac(&self) -> Mac {
        self.local_mac
    }

    /// The gateway's address, learned from its announce frame.
    pub fn peer_mac(&self) -> Mac {
        self.peer_mac
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    async fn fill(&mut self, n: usize) -> Result<(), Error> {
        let mut chunk = [0u8; 512];
        while self.rx.len() < n {
            let (got, _) = self.conn.read(&mut chunk).await?;
            self.rx.extend_from_slice(&chunk[..got]);
        }
        Ok(())
    }

    /// Read one frame, verifying the header checksum.
    pub async fn read_frame(&mut self) -> Result<L2Frame, Error> {
        self.fill(6).await?;
        // Parse the fixed prefix first to learn the full frame length,
        // then pull the remainder.
        let frame_len = {
            if self.rx[0] != DELIMITER {
                return Err(Error::Frame(format!(
                    "expected frame delimiter, got {:#04x}",
                    self.rx[0]
                )));
            }
            u16::from_le_bytes([self.rx[3], self.rx[4]]) as usize
        };
        self.fill(frame_len + 1).await?;

        let (frame, consumed) = decode_frame(&self.rx)?;
        self.rx.drain(..consumed);
        trace!(
            "read l2 frame cmd {:#04x} from {} ({} payload bytes)",
            frame.cmd,
            frame.src,
            frame.payload.len()
        );
        Ok(frame)
    }

    pub async fn write_frame(&mut self, cmd: u8, payload: &[u8], dst: Mac) -> Result<(), Error> {
        let buf = encode_frame(cmd, self.local_mac, dst, payload)?;
        trace!(
            "write l2 frame cmd {:#04x} to {}: {:02x?}",
            cmd,
            dst,
            &buf
        );
        self.conn.write(&buf, dst).await
    }
}

fn parse_device_record(payload: &[u8]) -> Option<PiconetDevice> {
    if payload.len() < 7 {
        return None;
    }
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&payload[..6]);
    Some(PiconetDevice {
        mac: Mac(mac),
        net_id: payload[6],
    })
}

impl ReadWrite for SmaBluetooth {
    async fn write(&mut self, data: &[u8], to: Mac) -> Result<(), Error> {
        self.write_frame(cmd::DATA, data, to).await
    }

    /// Deliver the payload of the next data frame; frames with other
    /// commands are skipped.
    async fn read(&mut self, buf: &mut [u8]) -> Result<(usize, Mac), Error> {
        loop {
            let frame = self.read_frame().await?;
            if frame.cmd != cmd::DATA {
                trace!("skipping non-data frame cmd {:#04x}", frame.cmd);
                continue;
            }
            let n = frame.payload.len().min(buf.len());
            buf[..n].copy_from_slice(&frame.payload[..n]);
            return Ok((n, frame.src));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn macs() -> (Mac, Mac) {
        (
            Mac([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
            Mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
        )
    }

    #[test]
    fn frame_roundtrip() {
        let (src, dst) = macs();
        let payload = [0xde, 0xad, 0xbe, 0xef];
        let wire = encode_frame(cmd::DATA, src, dst, &payload).unwrap();
        assert_eq!(wire.len(), 1 + L2_HEADER_SIZE + payload.len());
        assert_eq!(wire[0], 0x7e);
        // length counts everything after the delimiter
        let len = u16::from_le_bytes([wire[3], wire[4]]) as usize;
        assert_eq!(len, L2_HEADER_SIZE + payload.len());

        let (frame, consumed) = decode_frame(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(frame.cmd, cmd::DATA);
        assert_eq!(frame.src, src);
        assert_eq!(frame.dst, dst);
        assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[test]
    fn empty_payload_frame() {
        let (src, dst) = macs();
        let wire = encode_frame(cmd::DEVICE_RECORD, src, dst, &[]).unwrap();
        let (frame, _) = decode_frame(&wire).unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let (src, dst) = macs();
        let mut wire = encode_frame(cmd::DATA, src, dst, &[1, 2, 3]).unwrap();
        wire[5] ^= 0x01;
        assert!(matches!(decode_frame(&wire), Err(Error::Frame(_))));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let (src, dst) = macs();
        let payload = vec![0u8; L2_MAX_PAYLOAD + 1];
        assert!(encode_frame(cmd::DATA, src, dst, &payload).is_err());
    }

    #[test]
    fn truncated_frame_wants_more() {
        let (src, dst) = macs();
        let wire = encode_frame(cmd::DATA, src, dst, &[1, 2, 3]).unwrap();
        assert!(matches!(
            decode_frame(&wire[..wire.len() - 1]),
            Err(Error::InsufficientData { .. })
        ));
    }

    #[test]
    fn device_record_parse() {
        let rec = parse_device_record(&[1, 2, 3, 4, 5, 6, 9]).unwrap();
        assert_eq!(rec.mac, Mac([1, 2, 3, 4, 5, 6]));
        assert_eq!(rec.net_id, 9);
        assert!(parse_device_record(&[1, 2, 3]).is_none());
    }
}
