//! Client library for SMA photovoltaic string inverters over Bluetooth.
//!
//! Talks the three-layer SMADATA2+ stack over an RFCOMM link and exposes a
//! small inverter-agnostic API: live AC/DC spot values, lifetime
//! statistics, device status and identity, archived day yields and the
//! event log. See [`plant::Plant`] for the entry point.

pub mod archive;
pub mod codec;
pub mod constants;
pub mod error;
pub mod info;
pub mod mock;
pub mod packet;
pub mod plant;
pub mod records;
pub mod rfcomm;
pub mod smabluetooth;
pub mod smadata2plus;
pub mod smanet;
pub mod spot;
pub mod tags;
pub mod transport;

pub use archive::{DayYield, Event};
pub use error::Error;
pub use info::InverterInfo;
pub use plant::Plant;
pub use spot::{Ac, Dc, Stats, Status, StatusKind};
pub use transport::Mac;
