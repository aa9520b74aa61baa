//! Serial port access for the axis controllers
//!
//! Wraps `tokio-serial` (async port I/O) and `serialport` (port discovery).
//! Compiled only with the `serial` feature; without it every call reports
//! `SiaError::SerialFeatureDisabled`.

use crate::error::{SiaError, SiaResult};
#[cfg(feature = "serial")]
use crate::protocol::Axis;

/// A serial port visible on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS name of the port, e.g. `/dev/ttyUSB0`
    pub port_name: String,
    /// Product or type description
    pub description: String,
}

/// Open a port for one axis at the given baud rate (8N1).
#[cfg(feature = "serial")]
pub fn open(axis: Axis, port_name: &str, baud_rate: u32) -> SiaResult<tokio_serial::SerialStream> {
    use std::time::Duration;
    use tokio_serial::SerialPortBuilderExt;

    tokio_serial::new(port_name, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .timeout(Duration::from_millis(100))
        .open_native_async()
        .map_err(|e| SiaError::Connection {
            axis,
            port: port_name.to_string(),
            reason: e.to_string(),
        })
}

/// List serial ports with a human readable description.
#[cfg(feature = "serial")]
pub fn available_ports() -> SiaResult<Vec<PortInfo>> {
    use serialport::SerialPortType;

    let ports = serialport::available_ports().map_err(listing_error)?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                SerialPortType::UsbPort(info) => info
                    .product
                    .or(info.manufacturer)
                    .unwrap_or_else(|| format!("USB {:04x}:{:04x}", info.vid, info.pid)),
                SerialPortType::PciPort => "PCI serial".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
                SerialPortType::Unknown => "Serial port".to_string(),
            };
            PortInfo {
                port_name: p.port_name,
                description,
            }
        })
        .collect())
}

#[cfg(feature = "serial")]
fn listing_error(e: serialport::Error) -> SiaError {
    SiaError::Io(std::io::Error::other(e.to_string()))
}

/// Always fails: built without the `serial` feature.
#[cfg(not(feature = "serial"))]
pub fn available_ports() -> SiaResult<Vec<PortInfo>> {
    Err(SiaError::SerialFeatureDisabled)
}

#[cfg(all(test, feature = "serial"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_port_reports_connection_error() {
        let err = open(Axis::X, "/dev/does-not-exist-sia", 115_200).unwrap_err();
        match err {
            SiaError::Connection { axis, port, .. } => {
                assert_eq!(axis, Axis::X);
                assert_eq!(port, "/dev/does-not-exist-sia");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_listing_failure_becomes_io_error() {
        let err = listing_error(serialport::Error::new(
            serialport::ErrorKind::NoDevice,
            "udev unavailable",
        ));
        match err {
            SiaError::Io(io) => {
                assert_eq!(io.kind(), std::io::ErrorKind::Other);
                assert!(io.to_string().contains("udev unavailable"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
