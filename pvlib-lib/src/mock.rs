//! Scripted in-memory transport for testing the protocol stack without
//! hardware. Inbound bytes are served from a queue seeded by the test;
//! outbound writes are captured for inspection. The shared buffers are
//! behind `Arc<Mutex<..>>` so a test can keep a clone of the connection
//! after moving it into the stack.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;

use crate::error::Error;
use crate::transport::{Mac, ReadWrite};

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct MockConnection {
    /// Bytes the stack will read, in seeding order.
    rx: Arc<Mutex<VecDeque<u8>>>,
    /// Bytes the stack wrote.
    tx: Arc<Mutex<Vec<u8>>>,
    local_mac: Mac,
    peer_mac: Mac,
    timeout: Duration,
    connected: bool,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    pub fn new() -> Self {
        MockConnection {
            rx: Arc::new(Mutex::new(VecDeque::new())),
            tx: Arc::new(Mutex::new(Vec::new())),
            local_mac: Mac([0x02, 0x00, 0x00, 0xbe, 0xef, 0x01]),
            peer_mac: Mac::default(),
            timeout: DEFAULT_TIMEOUT,
            connected: false,
        }
    }

    /// Queue bytes for the stack to read.
    pub fn queue_rx(&self, data: &[u8]) {
        self.rx.lock().unwrap().extend(data.iter().copied());
    }

    /// Everything written by the stack so far, as one byte stream.
    pub fn tx_data(&self) -> Vec<u8> {
        self.tx.lock().unwrap().clone()
    }

    pub fn clear_tx(&self) {
        self.tx.lock().unwrap().clear();
    }

    pub fn rx_remaining(&self) -> usize {
        self.rx.lock().unwrap().len()
    }

    pub fn connect(&mut self, address: &str) -> Result<(), Error> {
        self.peer_mac = address.parse()?;
        self.connected = true;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub fn local_mac(&self) -> Mac {
        self.local_mac
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl ReadWrite for MockConnection {
    async fn write(&mut self, data: &[u8], _to: Mac) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.tx.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<(usize, Mac), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let n = {
            let mut rx = self.rx.lock().unwrap();
            let n = rx.len().min(buf.len());
            for slot in buf.iter_mut().take(n) {
                *slot = rx.pop_front().unwrap_or_default();
            }
            n
        };
        if n == 0 {
            // Script exhausted: behave like a silent peer until the timeout.
            timeout(self.timeout, std::future::pending::<()>()).await?;
            return Err(Error::Timeout);
        }
        Ok((n, self.peer_mac))
    }
}
