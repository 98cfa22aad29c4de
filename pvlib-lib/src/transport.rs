//! The byte-level transport seam every layer of the stack builds on.
//!
//! A transport is a two-method capability: write bytes to a peer, read
//! bytes and learn which peer they came from. RFCOMM ignores the peer
//! address (it is stream oriented), but the contract keeps the address so
//! other transports can plug in underneath the framing layers.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::mock::MockConnection;
use crate::rfcomm::RfcommConnection;

/// A Bluetooth device address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    pub const BROADCAST: Mac = Mac([0xff; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Mac::BROADCAST
    }
}

impl From<[u8; 6]> for Mac {
    fn from(raw: [u8; 6]) -> Self {
        Mac(raw)
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Mac {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut out = [0u8; 6];
        let mut parts = 0;
        for (i, part) in s.split(':').enumerate() {
            if i >= 6 || part.len() != 2 {
                return Err(Error::InvalidAddress(s.to_string()));
            }
            out[i] = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidAddress(s.to_string()))?;
            parts += 1;
        }
        if parts != 6 {
            return Err(Error::InvalidAddress(s.to_string()));
        }
        Ok(Mac(out))
    }
}

/// Byte-level read/write with a peer address.
#[allow(async_fn_in_trait)]
pub trait ReadWrite {
    async fn write(&mut self, data: &[u8], to: Mac) -> Result<(), Error>;

    /// Read whatever is available into `buf`, returning the byte count and
    /// the peer the data came from. Uses the connection timeout.
    async fn read(&mut self, buf: &mut [u8]) -> Result<(usize, Mac), Error>;
}

/// The transports a plant can be opened with.
///
/// Tagged variants instead of virtual dispatch: the registry below hands
/// out handles into this fixed set.
pub enum Connection {
    Rfcomm(RfcommConnection),
    Mock(MockConnection),
}

impl Connection {
    pub async fn connect(&mut self, address: &str) -> Result<(), Error> {
        match self {
            Connection::Rfcomm(c) => c.connect(address).await,
            Connection::Mock(c) => c.connect(address),
        }
    }

    pub fn disconnect(&mut self) {
        match self {
            Connection::Rfcomm(c) => c.disconnect(),
            Connection::Mock(c) => c.disconnect(),
        }
    }

    /// The local adapter's address; valid after `connect`.
    pub fn local_mac(&self) -> Mac {
        match self {
            Connection::Rfcomm(c) => c.local_mac(),
            Connection::Mock(c) => c.local_mac(),
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        match self {
            Connection::Rfcomm(c) => c.set_timeout(timeout),
            Connection::Mock(c) => c.set_timeout(timeout),
        }
    }
}

impl ReadWrite for Connection {
    async fn write(&mut self, data: &[u8], to: Mac) -> Result<(), Error> {
        match self {
            Connection::Rfcomm(c) => c.write(data, to).await,
            Connection::Mock(c) => c.write(data, to).await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<(usize, Mac), Error> {
        match self {
            Connection::Rfcomm(c) => c.read(buf).await,
            Connection::Mock(c) => c.read(buf).await,
        }
    }
}

/// Which transport to instantiate for a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Rfcomm,
    Mock,
}

impl ConnectionKind {
    pub fn create(self) -> Connection {
        match self {
            ConnectionKind::Rfcomm => Connection::Rfcomm(RfcommConnection::new()),
            ConnectionKind::Mock => Connection::Mock(MockConnection::new()),
        }
    }
}

/// Registry entry for an available connection kind.
pub struct ConnectionDescriptor {
    pub name: &'static str,
    pub kind: ConnectionKind,
}

/// Available connection kinds; a handle is an index into this table.
pub const CONNECTIONS: &[ConnectionDescriptor] = &[
    ConnectionDescriptor {
        name: "rfcomm",
        kind: ConnectionKind::Rfcomm,
    },
    ConnectionDescriptor {
        name: "mock",
        kind: ConnectionKind::Mock,
    },
];

pub fn connections() -> &'static [ConnectionDescriptor] {
    CONNECTIONS
}

pub fn connection_name(handle: usize) -> Option<&'static str> {
    CONNECTIONS.get(handle).map(|d| d.name)
}

pub fn find_connection(name: &str) -> Option<usize> {
    CONNECTIONS.iter().position(|d| d.name == name)
}
