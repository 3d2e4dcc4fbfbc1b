//! # Serial Communication Module
//!
//! Opens the UART wired to the power controller.
//!
//! This module handles:
//! - Opening the serial port at 57,600 baud, 8N1, no flow control
//! - Trying a list of candidate device paths
//! - The `SerialPortIO` seam that lets the link run over mocks in tests

pub mod port_trait;

use crate::error::{PwrctlError, Result};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Power controller UART baud rate
pub const PWRCTL_BAUD_RATE: u32 = 57_600;

/// Default power controller device paths to try (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &["/dev/ttyO0"];

/// Power controller serial port handle
pub struct PowerSerial {
    /// Serial port handle
    port: tokio_serial::SerialStream,
    /// Device path (e.g., /dev/ttyO0)
    device_path: String,
}

impl std::fmt::Debug for PowerSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl PowerSerial {
    /// Open the power controller UART on its default device path
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pwrctl::serial::PowerSerial;
    ///
    /// fn main() -> anyhow::Result<()> {
    ///     let serial = PowerSerial::open()?;
    ///     println!("{}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open() -> Result<Self> {
        Self::open_with_paths(DEFAULT_DEVICE_PATHS, PWRCTL_BAUD_RATE)
    }

    /// Open the first device in `paths` that accepts the line settings
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyO0"])
    /// * `baud_rate` - Line rate, normally [`PWRCTL_BAUD_RATE`]
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` listing every path tried when none opens
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened power controller port {} at {} baud", path, baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(PwrctlError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| PwrctlError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Device path of the opened port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Hand the stream over to a [`crate::link::Link`]
    pub fn into_stream(self) -> tokio_serial::SerialStream {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(PWRCTL_BAUD_RATE, 57_600);
        assert_eq!(DEFAULT_DEVICE_PATHS, &["/dev/ttyO0"]);
    }

    #[test]
    fn test_open_with_invalid_paths_returns_error() {
        let invalid_paths = &["/dev/nonexistent0", "/dev/nonexistent1"];
        let err = PowerSerial::open_with_paths(invalid_paths, PWRCTL_BAUD_RATE).unwrap_err();

        match err {
            PwrctlError::SerialPortNotFound(msg) => {
                assert!(msg.contains("/dev/nonexistent0"));
                assert!(msg.contains("/dev/nonexistent1"));
            }
            _ => panic!("Expected SerialPortNotFound error, got: {:?}", err),
        }
    }

    #[test]
    fn test_open_with_empty_paths_returns_error() {
        let empty_paths: &[&str] = &[];
        assert!(matches!(
            PowerSerial::open_with_paths(empty_paths, PWRCTL_BAUD_RATE),
            Err(PwrctlError::SerialPortNotFound(_))
        ));
    }

    #[test]
    fn test_open_port_with_invalid_path_returns_error() {
        let err = PowerSerial::open_port("/dev/nonexistent_serial_device_12345", PWRCTL_BAUD_RATE)
            .unwrap_err();

        match err {
            PwrctlError::Serial(msg) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            _ => panic!("Expected Serial error, got: {:?}", err),
        }
    }

    // Only meaningful on the camera itself
    #[test]
    #[ignore] // Run with: cargo test -- --ignored
    fn test_open_with_real_hardware() {
        match PowerSerial::open() {
            Ok(serial) => assert_eq!(serial.device_path(), "/dev/ttyO0"),
            Err(_) => println!("No power controller UART present"),
        }
    }
}
