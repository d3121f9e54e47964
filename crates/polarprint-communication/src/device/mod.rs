//! Device discovery and firmware checks
//!
//! Finds the printer's controller on a serial port, confirms its firmware
//! version and, when it does not match, hands the port to a
//! [`FirmwareProgrammer`] a bounded number of times.

pub mod discovery;

pub use discovery::{DeviceConnection, DeviceDiscovery, DiscoveryConfig};

use polarprint_core::Result;

/// Listener for discovery progress
///
/// All methods default to no-ops.
pub trait DeviceListener: Send + Sync {
    /// A port is being probed
    fn on_probe(&self, _port: &str, _attempt: u32) {}

    /// A device answered with the expected firmware
    fn on_connected(&self, _port: &str, _version: u16) {}

    /// A device answered with unexpected firmware
    fn on_version_mismatch(&self, _port: &str, _expected: u16, _actual: u16) {}

    /// A reprogramming attempt is starting
    fn on_reprogram_attempt(&self, _port: &str, _attempt: u32, _max_attempts: u32) {}

    /// The link was given up
    fn on_disabled(&self, _reason: &str) {}
}

/// Listener that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpListener;

impl DeviceListener for NoOpListener {}

/// Writes firmware to the device on a port
///
/// The port is closed while the programmer runs.
pub trait FirmwareProgrammer: Send + Sync {
    /// Program the expected firmware image
    fn program(&self, port: &str) -> Result<()>;
}
