//! The public plant façade: one connection, one protocol, one session.
//!
//! Connection and protocol kinds live in fixed registries; a handle is an
//! index into the corresponding table. A plant is opened from two handles,
//! connected with an address and a password, and then serves reads until
//! it is disconnected.

use crate::archive::{DayYield, Event};
use crate::error::Error;
use crate::info::InverterInfo;
use crate::smadata2plus::SmaData2Plus;
use crate::spot::{Ac, Dc, Stats, Status};
use crate::transport::{Connection, CONNECTIONS};

/// Which protocol to instantiate for a protocol handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    SmaData2Plus,
}

/// Registry entry for an available protocol.
pub struct ProtocolDescriptor {
    pub name: &'static str,
    pub kind: ProtocolKind,
}

/// Available protocols; a handle is an index into this table.
pub const PROTOCOLS: &[ProtocolDescriptor] = &[ProtocolDescriptor {
    name: "smadata2plus",
    kind: ProtocolKind::SmaData2Plus,
}];

pub fn protocols() -> &'static [ProtocolDescriptor] {
    PROTOCOLS
}

pub fn protocol_name(handle: usize) -> Option<&'static str> {
    PROTOCOLS.get(handle).map(|d| d.name)
}

pub fn find_protocol(name: &str) -> Option<usize> {
    PROTOCOLS.iter().position(|d| d.name == name)
}

enum ProtocolSession {
    SmaData2Plus(Box<SmaData2Plus>),
}

pub struct Plant {
    session: ProtocolSession,
}

impl Plant {
    /// Compose a plant from registry handles. The connection starts idle;
    /// nothing is opened until [`Plant::connect`].
    pub fn open(connection: usize, protocol: usize) -> Result<Plant, Error> {
        let descriptor = CONNECTIONS.get(connection).ok_or_else(|| {
            Error::Unsupported(format!("unknown connection handle {connection}"))
        })?;
        Self::open_with_connection(descriptor.kind.create(), protocol)
    }

    /// Compose a plant around an existing connection, e.g. a scripted mock.
    pub fn open_with_connection(conn: Connection, protocol: usize) -> Result<Plant, Error> {
        let descriptor = PROTOCOLS
            .get(protocol)
            .ok_or_else(|| Error::Unsupported(format!("unknown protocol handle {protocol}")))?;
        let session = match descriptor.kind {
            ProtocolKind::SmaData2Plus => {
                ProtocolSession::SmaData2Plus(Box::new(SmaData2Plus::new(conn)))
            }
        };
        Ok(Plant { session })
    }

    pub async fn connect(&mut self, address: &str, password: &str) -> Result<(), Error> {
        match &mut self.session {
            ProtocolSession::SmaData2Plus(s) => s.connect(address, password).await,
        }
    }

    pub fn disconnect(&mut self) {
        match &mut self.session {
            ProtocolSession::SmaData2Plus(s) => s.disconnect(),
        }
    }

    /// Dispose the plant; the connection closes with it.
    pub fn close(mut self) {
        self.disconnect();
    }

    /// Number of string inverters in the plant.
    pub fn num_string_inverter(&self) -> usize {
        match &self.session {
            ProtocolSession::SmaData2Plus(s) => s.inverter_num(),
        }
    }

    /// Device handles are the inverters' serials.
    pub fn device_handles(&self) -> Vec<u32> {
        match &self.session {
            ProtocolSession::SmaData2Plus(s) => s.device_serials(),
        }
    }

    pub async fn get_ac_values(&mut self, id: u32) -> Result<Ac, Error> {
        match &mut self.session {
            ProtocolSession::SmaData2Plus(s) => s.read_ac(id).await,
        }
    }

    pub async fn get_dc_values(&mut self, id: u32) -> Result<Dc, Error> {
        match &mut self.session {
            ProtocolSession::SmaData2Plus(s) => s.read_dc(id).await,
        }
    }

    pub async fn get_stats(&mut self, id: u32) -> Result<Stats, Error> {
        match &mut self.session {
            ProtocolSession::SmaData2Plus(s) => s.read_stats(id).await,
        }
    }

    pub async fn get_status(&mut self, id: u32) -> Result<Status, Error> {
        match &mut self.session {
            ProtocolSession::SmaData2Plus(s) => s.read_status(id).await,
        }
    }

    pub async fn get_inverter_info(&mut self, id: u32) -> Result<InverterInfo, Error> {
        match &mut self.session {
            ProtocolSession::SmaData2Plus(s) => s.read_inverter_info(id).await,
        }
    }

    pub async fn get_day_yield(
        &mut self,
        id: u32,
        from: i64,
        to: i64,
    ) -> Result<Vec<DayYield>, Error> {
        match &mut self.session {
            ProtocolSession::SmaData2Plus(s) => s.read_day_yield(id, from, to).await,
        }
    }

    pub async fn get_events(&mut self, id: u32, from: i64, to: i64) -> Result<Vec<Event>, Error> {
        match &mut self.session {
            ProtocolSession::SmaData2Plus(s) => s.read_events(id, from, to).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::find_connection;

    #[test]
    fn registries_resolve_by_name() {
        assert_eq!(protocol_name(0), Some("smadata2plus"));
        assert_eq!(find_protocol("smadata2plus"), Some(0));
        assert_eq!(find_protocol("smadata11"), None);
        assert!(Plant::open(find_connection("rfcomm").unwrap(), 0).is_ok());
    }

    #[test]
    fn bad_handles_are_rejected() {
        assert!(matches!(Plant::open(99, 0), Err(Error::Unsupported(_))));
        assert!(matches!(Plant::open(0, 99), Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn reads_on_a_disconnected_plant_fail() {
        let mut plant = Plant::open(0, 0).unwrap();
        assert!(matches!(
            plant.get_ac_values(1).await,
            Err(Error::NotConnected)
        ));
        assert_eq!(plant.num_string_inverter(), 0);
    }
}
