//! SMANET transport: PPP/HDLC-like framing on top of L2 data frames.
//!
//! A logical message is byte-stuffed, protected by an FCS-16 and carried in
//! one or more 0x7E-delimited fragments. Each fragment travels in one L2
//! data frame; the fragment-control byte's high nibble counts the fragments
//! still to come. A 16-bit protocol identifier demultiplexes upper layers;
//! messages for other protocols are silently discarded.

use bytes::Bytes;
use tracing::{trace, warn};

use crate::constants::L2_MAX_PAYLOAD;
use crate::error::Error;
use crate::smabluetooth::SmaBluetooth;
use crate::transport::{Mac, ReadWrite};

const DELIMITER: u8 = 0x7E;
const ESCAPE: u8 = 0x7D;
const ESCAPE_XOR: u8 = 0x20;

/// PPP address byte opening every fragment header.
const HEADER_BYTE: u8 = 0xFF;
/// Low bits of the fragment-control byte (the PPP UI control field).
const FRAG_CTRL_BASE: u8 = 0x03;
/// Set on every fragment that continues an earlier one.
const FRAG_CTRL_CONTINUATION: u8 = 0x08;

/// Unstuffed fragment header: FF, frag_ctrl, protocol (BE), src + pad, dst + pad.
const HEADER_LEN: usize = 20;

/// Per-fragment budget for unstuffed content. Stuffing at worst doubles the
/// size, and the delimiters cost two more bytes of L2 payload.
const FRAGMENT_CONTENT_MAX: usize = (L2_MAX_PAYLOAD - 2) / 2;

/// CRC-16/X.25: reflected polynomial 0x8408, init 0xFFFF, xorout 0xFFFF.
pub fn crc16_x25(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xffff;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

fn needs_stuffing(byte: u8) -> bool {
    matches!(byte, 0x7D | 0x7E | 0x11 | 0x12 | 0x13)
}

/// Escape every reserved byte as `0x7D, byte ^ 0x20`.
pub fn stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    for &byte in data {
        if needs_stuffing(byte) {
            out.push(ESCAPE);
            out.push(byte ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
    out
}

/// Reverse of [`stuff`]. A bare delimiter or a dangling escape is a
/// framing violation.
pub fn unstuff(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&byte) = iter.next() {
        match byte {
            DELIMITER => {
                return Err(Error::Frame(
                    "delimiter inside stuffed body".to_string(),
                ))
            }
            ESCAPE => match iter.next() {
                Some(&next) => out.push(next ^ ESCAPE_XOR),
                None => {
                    return Err(Error::Frame(
                        "dangling escape at end of fragment".to_string(),
                    ))
                }
            },
            _ => out.push(byte),
        }
    }
    Ok(out)
}

fn frag_ctrl(remaining: usize, continuation: bool) -> u8 {
    let mut ctrl = ((remaining as u8) << 4) | FRAG_CTRL_BASE;
    if continuation {
        ctrl |= FRAG_CTRL_CONTINUATION;
    }
    ctrl
}

fn header(frag_ctrl_byte: u8, protocol: u16, src: Mac, dst: Mac) -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    h[0] = HEADER_BYTE;
    h[1] = frag_ctrl_byte;
    h[2..4].copy_from_slice(&protocol.to_be_bytes());
    h[4..10].copy_from_slice(&src.0);
    h[12..18].copy_from_slice(&dst.0);
    h
}

/// Split `user` into fragments and serialize each as a delimited, stuffed
/// unit. The FCS covers the first fragment's header plus the concatenated
/// user data and rides at the tail of the last fragment.
pub fn encode_fragments(protocol: u16, user: &[u8], src: Mac, dst: Mac) -> Vec<Vec<u8>> {
    let chunk_max = FRAGMENT_CONTENT_MAX - HEADER_LEN - 2;
    let chunks: Vec<&[u8]> = if user.is_empty() {
        vec![&user[..0]]
    } else {
        user.chunks(chunk_max).collect()
    };
    let count = chunks.len();

    let first_header = header(frag_ctrl(count - 1, false), protocol, src, dst);
    let mut fcs_input = Vec::with_capacity(HEADER_LEN + user.len());
    fcs_input.extend_from_slice(&first_header);
    fcs_input.extend_from_slice(user);
    let fcs = crc16_x25(&fcs_input);

    let mut out = Vec::with_capacity(count);
    for (i, chunk) in chunks.iter().enumerate() {
        let remaining = count - 1 - i;
        let mut content = Vec::with_capacity(HEADER_LEN + chunk.len() + 2);
        content.extend_from_slice(&header(frag_ctrl(remaining, i > 0), protocol, src, dst));
        content.extend_from_slice(chunk);
        if remaining == 0 {
            content.extend_from_slice(&fcs.to_le_bytes());
        }

        let mut wire = Vec::with_capacity(content.len() * 2 + 2);
        wire.push(DELIMITER);
        wire.extend_from_slice(&stuff(&content));
        wire.push(DELIMITER);
        out.push(wire);
    }
    out
}

/// A reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub protocol: u16,
    pub src: Mac,
    pub dst: Mac,
    pub user: Bytes,
}

/// One unstuffed fragment, fed into [`Reassembly`].
struct Fragment {
    frag_ctrl: u8,
    header: [u8; HEADER_LEN],
    data: Vec<u8>,
}

fn parse_fragment(wire: &[u8]) -> Result<Fragment, Error> {
    if wire.len() < 2 || wire[0] != DELIMITER || wire[wire.len() - 1] != DELIMITER {
        return Err(Error::Frame("fragment without delimiters".to_string()));
    }
    let content = unstuff(&wire[1..wire.len() - 1])?;
    if content.len() < HEADER_LEN {
        return Err(Error::Frame(format!(
            "fragment of {} bytes is shorter than the header",
            content.len()
        )));
    }
    if content[0] != HEADER_BYTE {
        return Err(Error::Frame(format!(
            "unexpected fragment header byte {:#04x}",
            content[0]
        )));
    }
    let mut head = [0u8; HEADER_LEN];
    head.copy_from_slice(&content[..HEADER_LEN]);
    Ok(Fragment {
        frag_ctrl: content[1],
        header: head,
        data: content[HEADER_LEN..].to_vec(),
    })
}

/// Collects fragments until the remaining counter reaches zero, then
/// validates the end-to-end FCS.
#[derive(Default)]
struct Reassembly {
    first_header: Option<[u8; HEADER_LEN]>,
    user: Vec<u8>,
}

impl Reassembly {
    /// Feed one fragment; returns the finished message on the last one.
    fn push(&mut self, fragment: Fragment) -> Result<Option<Message>, Error> {
        let remaining = (fragment.frag_ctrl >> 4) as usize;
        if self.first_header.is_none() {
            self.first_header = Some(fragment.header);
        }
        let mut data = fragment.data;

        if remaining > 0 {
            self.user.append(&mut data);
            return Ok(None);
        }

        if data.len() < 2 {
            return Err(Error::Frame("last fragment misses the FCS".to_string()));
        }
        let fcs_pos = data.len() - 2;
        let fcs = u16::from_le_bytes([data[fcs_pos], data[fcs_pos + 1]]);
        data.truncate(fcs_pos);
        self.user.append(&mut data);

        let head = self.first_header.take().unwrap_or_default();
        let mut fcs_input = Vec::with_capacity(HEADER_LEN + self.user.len());
        fcs_input.extend_from_slice(&head);
        fcs_input.extend_from_slice(&self.user);
        let expected = crc16_x25(&fcs_input);
        if fcs != expected {
            return Err(Error::Frame(format!(
                "fcs mismatch: expected {expected:#06x}, got {fcs:#06x}"
            )));
        }

        let mut src = [0u8; 6];
        let mut dst = [0u8; 6];
        src.copy_from_slice(&head[4..10]);
        dst.copy_from_slice(&head[12..18]);
        Ok(Some(Message {
            protocol: u16::from_be_bytes([head[2], head[3]]),
            src: Mac(src),
            dst: Mac(dst),
            user: Bytes::from(std::mem::take(&mut self.user)),
        }))
    }
}

/// The SMANET endpoint for one registered protocol.
pub struct SmaNet {
    protocol: u16,
    bt: SmaBluetooth,
}

impl SmaNet {
    pub fn new(protocol: u16, bt: SmaBluetooth) -> Self {
        SmaNet { protocol, bt }
    }

    pub fn bluetooth(&self) -> &SmaBluetooth {
        &self.bt
    }

    pub fn bluetooth_mut(&mut self) -> &mut SmaBluetooth {
        &mut self.bt
    }

    /// Read and reassemble one message addressed to our protocol.
    async fn read_message(&mut self) -> Result<Message, Error> {
        loop {
            let mut assembly = Reassembly::default();
            let message = loop {
                let mut frame = [0u8; 512];
                let (n, _) = self.bt.read(&mut frame).await?;
                let fragment = parse_fragment(&frame[..n])?;
                if let Some(message) = assembly.push(fragment)? {
                    break message;
                }
            };
            if message.protocol != self.protocol {
                trace!(
                    "discarding message for foreign protocol {:#06x}",
                    message.protocol
                );
                continue;
            }
            return Ok(message);
        }
    }
}

impl ReadWrite for SmaNet {
    async fn write(&mut self, data: &[u8], to: Mac) -> Result<(), Error> {
        let src = self.bt.local_mac();
        let fragments = encode_fragments(self.protocol, data, src, to);
        // the remaining counter is a nibble
        if fragments.len() > 0x10 {
            return Err(Error::Frame(format!(
                "message of {} bytes needs {} fragments, limit is 16",
                data.len(),
                fragments.len()
            )));
        }
        if fragments.len() > 1 {
            trace!("message split into {} fragments", fragments.len());
        }
        for fragment in fragments {
            self.bt.write(&fragment, to).await?;
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<(usize, Mac), Error> {
        let message = self.read_message().await?;
        if message.user.len() > buf.len() {
            warn!(
                "truncating {}-byte message to the {}-byte read buffer",
                message.user.len(),
                buf.len()
            );
        }
        let n = message.user.len().min(buf.len());
        buf[..n].copy_from_slice(&message.user[..n]);
        Ok((n, message.src))
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

    /// Deterministic pseudo-random byte generator for property-style tests.
    struct XorShift(u32);

    impl XorShift {
        fn next(&mut self) -> u32 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.0 = x;
            x
        }

        fn bytes(&mut self, len: usize) -> Vec<u8> {
            (0..len).map(|_| self.next() as u8).collect()
        }
    }

    fn reassemble(fragments: &[Vec<u8>]) -> Result<Message, Error> {
        let mut assembly = Reassembly::default();
        for wire in fragments {
            if let Some(message) = assembly.push(parse_fragment(wire)?)? {
                return Ok(message);
            }
        }
        panic!("fragments did not terminate");
    }

    #[test]
    fn crc_known_vector() {
        assert_eq!(crc16_x25(b"123456789"), 0x906e);
    }

    #[test]
    fn crc_detects_change() {
        assert_ne!(crc16_x25(b"123456788"), crc16_x25(b"123456789"));
    }

    #[test]
    fn stuff_unstuff_roundtrip() {
        let mut rng = XorShift(0x5eed);
        for len in [0usize, 1, 2, 7, 64, 255] {
            for _ in 0..16 {
                let data = rng.bytes(len);
                let stuffed = stuff(&data);
                assert!(
                    !stuffed.contains(&DELIMITER),
                    "stuffed form contains a delimiter"
                );
                assert_eq!(unstuff(&stuffed).unwrap(), data);
            }
        }
    }

    #[test]
    fn stuffing_covers_the_reserved_set() {
        let data = [0x7e, 0x7d, 0x11, 0x12, 0x13, 0x00, 0xff];
        let stuffed = stuff(&data);
        assert_eq!(
            stuffed,
            vec![0x7d, 0x5e, 0x7d, 0x5d, 0x7d, 0x31, 0x7d, 0x32, 0x7d, 0x33, 0x00, 0xff]
        );
        assert_eq!(unstuff(&stuffed).unwrap(), data);
    }

    #[test]
    fn unstuff_rejects_bad_input() {
        assert!(unstuff(&[0x7e]).is_err());
        assert!(unstuff(&[0x00, 0x7d]).is_err());
    }

    #[test]
    fn single_fragment_roundtrip() {
        let (src, dst) = macs();
        let user = [0x01u8, 0x02, 0x7e, 0x7d, 0x11];
        let fragments = encode_fragments(0x6560, &user, src, dst);
        assert_eq!(fragments.len(), 1);

        let message = reassemble(&fragments).unwrap();
        assert_eq!(message.protocol, 0x6560);
        assert_eq!(message.src, src);
        assert_eq!(message.dst, dst);
        assert_eq!(&message.user[..], &user[..]);
    }

    #[test]
    fn single_fragment_opens_with_ff03() {
        let (src, dst) = macs();
        let fragments = encode_fragments(0x6560, &[0u8; 8], src, dst);
        let content = unstuff(&fragments[0][1..fragments[0].len() - 1]).unwrap();
        assert_eq!(content[0], 0xff);
        assert_eq!(content[1], 0x03);
        // protocol identifier is big-endian on the wire
        assert_eq!(&content[2..4], &[0x65, 0x60]);
    }

    #[test]
    fn multi_fragment_roundtrip() {
        let (src, dst) = macs();
        let mut rng = XorShift(42);
        let user = rng.bytes(400);
        let fragments = encode_fragments(0x6560, &user, src, dst);
        assert!(fragments.len() > 1);
        for wire in &fragments {
            // every fragment fits one L2 data frame
            assert!(wire.len() <= L2_MAX_PAYLOAD);
        }

        let message = reassemble(&fragments).unwrap();
        assert_eq!(message.user, user);
    }

    #[test]
    fn fragment_counters_descend_to_zero() {
        let (src, dst) = macs();
        let user = vec![0xa5u8; 300];
        let fragments = encode_fragments(0x6560, &user, src, dst);
        let n = fragments.len();
        for (i, wire) in fragments.iter().enumerate() {
            let content = unstuff(&wire[1..wire.len() - 1]).unwrap();
            assert_eq!((content[1] >> 4) as usize, n - 1 - i);
        }
    }

    #[test]
    fn fcs_mismatch_is_a_frame_error() {
        let (src, dst) = macs();
        let mut fragments = encode_fragments(0x6560, &[1, 2, 3, 4], src, dst);
        // flip a bit in a user-data byte inside the stuffed body
        let last = fragments.len() - 1;
        let pos = fragments[last].len() - 4;
        fragments[last][pos] ^= 0x01;
        assert!(matches!(reassemble(&fragments), Err(Error::Frame(_))));
    }
}
