//! Bluetooth RFCOMM transport (Linux/BlueZ via `bluer`).
//!
//! Pure byte I/O on channel 1 of the inverter's RFCOMM service; all framing
//! lives in the layers above. The peer address argument of the common
//! read/write contract is unused here since RFCOMM is stream oriented.

use std::time::Duration;

use bluer::rfcomm::{SocketAddr, Stream};
use bluer::Address;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::Error;
use crate::transport::{Mac, ReadWrite};

/// The SMA inverters expose SMADATA2+ on RFCOMM channel 1.
pub const RFCOMM_CHANNEL: u8 = 1;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RfcommConnection {
    stream: Option<Stream>,
    timeout: Duration,
    local_mac: Mac,
    peer_mac: Mac,
}

impl Default for RfcommConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl RfcommConnection {
    pub fn new() -> Self {
        RfcommConnection {
            stream: None,
            timeout: DEFAULT_TIMEOUT,
            local_mac: Mac::default(),
            peer_mac: Mac::default(),
        }
    }

    /// Open an RFCOMM socket to `address` (e.g. `"00:80:25:xx:yy:zz"`) and
    /// resolve the local adapter's address from the bound socket.
    pub async fn connect(&mut self, address: &str) -> Result<(), Error> {
        let peer: Mac = address.parse()?;
        let addr = SocketAddr::new(Address::new(peer.0), RFCOMM_CHANNEL);

        debug!("connecting rfcomm channel {} to {}", RFCOMM_CHANNEL, peer);
        let stream = timeout(self.timeout, Stream::connect(addr)).await??;

        let local = stream.as_ref().local_addr()?;
        self.local_mac = Mac(local.addr.0);
        self.peer_mac = peer;
        self.stream = Some(stream);

        info!("rfcomm connected, adapter {} peer {}", self.local_mac, peer);
        Ok(())
    }

    /// Idempotent; drops the socket if one is open.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("rfcomm disconnected from {}", self.peer_mac);
        }
    }

    pub fn local_mac(&self) -> Mac {
        self.local_mac
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl ReadWrite for RfcommConnection {
    async fn write(&mut self, data: &[u8], _to: Mac) -> Result<(), Error> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        timeout(self.timeout, stream.write_all(data)).await??;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<(usize, Mac), Error> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        let n = timeout(self.timeout, stream.read(buf)).await??;
        if n == 0 {
            return Err(Error::Protocol("connection closed by peer".to_string()));
        }
        Ok((n, self.peer_mac))
    }
}
