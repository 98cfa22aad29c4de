//! Device identity: name, type and firmware version.

use tracing::{debug, warn};

use crate::error::Error;
use crate::records::{idx, parse_attributes, Record, RecordBody};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InverterInfo {
    pub manufacture: String,
    /// The inverter's serial string, e.g. `"SN: 2000333615"`.
    pub name: String,
    /// Decimal device-type attribute code.
    pub device_type: String,
    /// `"d.dd.dd.X"` with `X` one of N/E/A/B/R/S or a two-digit number.
    pub firmware_version: String,
}

/// Decode the firmware version from the last four meaningful bytes of the
/// software-version record (offsets 16..19). Versions with a major or minor
/// part above 9 are rejected as malformed.
pub fn parse_firmware_version(data: &[u8; 32]) -> Result<String, Error> {
    if data[18] > 9 || data[19] > 9 {
        return Err(Error::Protocol(format!(
            "invalid firmware version: {:02x} {:02x} {:02x} {:02x}",
            data[16], data[17], data[18], data[19]
        )));
    }

    let release = match data[16] {
        0 => "N".to_string(),
        1 => "E".to_string(),
        2 => "A".to_string(),
        3 => "B".to_string(),
        4 => "R".to_string(),
        5 => "S".to_string(),
        other => format!("{other:02}"),
    };

    Ok(format!(
        "{}.{:02}.{:02}.{}",
        data[19], data[18], data[17], release
    ))
}

fn ascii_field(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

pub fn decode_inverter_info(records: &[Record]) -> InverterInfo {
    let mut info = InverterInfo {
        manufacture: "SMA".to_string(),
        ..InverterInfo::default()
    };

    for record in records {
        let RecordBody::R3 { data } = &record.body else {
            continue;
        };
        match record.header.idx {
            idx::DEVICE_NAME => {
                if !data.starts_with(b"SN: ") {
                    warn!("unexpected device name");
                }
                info.name = ascii_field(data);
            }
            idx::DEVICE_CLASS => {
                for attribute in parse_attributes(data) {
                    if attribute.selected {
                        debug!("device class: {}", attribute.code);
                    }
                }
            }
            idx::DEVICE_TYPE => {
                for attribute in parse_attributes(data) {
                    if attribute.selected {
                        debug!("device type: {}", attribute.code);
                        info.device_type = attribute.code.to_string();
                    }
                }
            }
            idx::DEVICE_UNKNOWN => {}
            idx::DEVICE_SWVER => match parse_firmware_version(data) {
                Ok(version) => info.firmware_version = version,
                Err(_) => warn!("invalid firmware format, ignoring it"),
            },
            _ => {}
        }
    }

    info
}
