//! Port probing, version check and reprogramming

use super::{DeviceListener, FirmwareProgrammer, NoOpListener};
use crate::communication::{PortOpener, SerialTransport, TransportConfig};
use polarprint_core::{ConnectionError, Error, FirmwareError, Result};
use std::time::Duration;

/// Discovery parameters
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Fixed port, or `None` to probe every candidate
    pub port: Option<String>,
    /// Wait for a status or version frame
    pub timeout: Duration,
    /// Open attempts per port
    pub retries: u32,
    /// Firmware version the host speaks
    pub expected_version: u16,
    /// Programming attempts after a mismatch
    pub reprogram_retries: u32,
    /// Transport used for the resulting connection
    pub transport: TransportConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: None,
            timeout: Duration::from_secs(2),
            retries: 3,
            expected_version: 1,
            reprogram_retries: 2,
            transport: TransportConfig::default(),
        }
    }
}

/// A running link to a device with verified firmware
#[derive(Debug)]
pub struct DeviceConnection {
    /// Port the device was found on
    pub port: String,
    /// Firmware version the device reported
    pub version: u16,
    /// Running transport
    pub transport: SerialTransport,
}

/// Finds and verifies the device
pub struct DeviceDiscovery<'a> {
    opener: &'a dyn PortOpener,
    programmer: Option<&'a dyn FirmwareProgrammer>,
    listener: &'a dyn DeviceListener,
    config: DiscoveryConfig,
}

impl<'a> DeviceDiscovery<'a> {
    /// Discovery without a programmer or listener
    pub fn new(opener: &'a dyn PortOpener, config: DiscoveryConfig) -> Self {
        Self {
            opener,
            programmer: None,
            listener: &NoOpListener,
            config,
        }
    }

    /// Recover version mismatches with `programmer`
    pub fn with_programmer(mut self, programmer: &'a dyn FirmwareProgrammer) -> Self {
        self.programmer = Some(programmer);
        self
    }

    /// Report progress to `listener`
    pub fn with_listener(mut self, listener: &'a dyn DeviceListener) -> Self {
        self.listener = listener;
        self
    }

    /// Probe ports until one answers with the expected firmware
    pub fn connect(&self) -> Result<DeviceConnection> {
        let ports = match &self.config.port {
            Some(port) => vec![port.clone()],
            None => self.opener.candidates()?,
        };
        if ports.is_empty() {
            self.listener.on_disabled("no candidate ports");
            return Err(ConnectionError::NoPortFound.into());
        }

        let mut last_error: Error = ConnectionError::NoPortFound.into();
        for port in &ports {
            match self.probe(port) {
                Ok((transport, version)) if version == self.config.expected_version => {
                    return Ok(self.connected(port, version, transport));
                }
                Ok((transport, version)) => {
                    tracing::warn!(
                        "{} runs firmware {}, expected {}",
                        port,
                        version,
                        self.config.expected_version
                    );
                    self.listener
                        .on_version_mismatch(port, self.config.expected_version, version);
                    drop(transport);
                    return self.reprogram(port, version);
                }
                Err(e) => {
                    tracing::debug!("No device on {}: {}", port, e);
                    last_error = e;
                }
            }
        }

        self.listener.on_disabled(&last_error.to_string());
        Err(last_error)
    }

    fn connected(&self, port: &str, version: u16, transport: SerialTransport) -> DeviceConnection {
        tracing::info!("Connected to device on {} (firmware {})", port, version);
        self.listener.on_connected(port, version);
        DeviceConnection {
            port: port.to_string(),
            version,
            transport,
        }
    }

    /// Open `port` up to `retries` times, waiting for a status frame and
    /// then a version frame
    fn probe(&self, port: &str) -> Result<(SerialTransport, u16)> {
        let timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut last_error: Error = ConnectionError::ConnectionTimeout { timeout_ms }.into();

        for attempt in 1..=self.config.retries.max(1) {
            self.listener.on_probe(port, attempt);
            tracing::debug!("Probing {} (attempt {})", port, attempt);

            let (reader, writer) = match self.opener.open(port) {
                Ok(halves) => halves,
                Err(e) => {
                    last_error = e;
                    continue;
                }
            };
            let transport = SerialTransport::start(reader, writer, self.config.transport.clone())?;

            if transport.wait_for_status(self.config.timeout).is_none() {
                last_error = ConnectionError::ConnectionTimeout { timeout_ms }.into();
                continue;
            }
            transport.request_version()?;
            match transport.wait_for_version(self.config.timeout) {
                Some(version) => return Ok((transport, version)),
                None => last_error = ConnectionError::ConnectionTimeout { timeout_ms }.into(),
            }
        }
        Err(last_error)
    }

    fn reprogram(&self, port: &str, reported: u16) -> Result<DeviceConnection> {
        let Some(programmer) = self.programmer else {
            self.listener.on_disabled("firmware mismatch and no programmer");
            return Err(FirmwareError::VersionMismatch {
                expected: self.config.expected_version,
                actual: reported,
            }
            .into());
        };

        let attempts = self.config.reprogram_retries;
        for attempt in 1..=attempts {
            self.listener.on_reprogram_attempt(port, attempt, attempts);
            tracing::info!("Reprogramming {} ({}/{})", port, attempt, attempts);

            if let Err(e) = programmer.program(port) {
                tracing::warn!("Programming {} failed: {}", port, e);
                continue;
            }
            match self.probe(port) {
                Ok((transport, version)) if version == self.config.expected_version => {
                    return Ok(self.connected(port, version, transport));
                }
                Ok((_, version)) => {
                    tracing::warn!("{} still reports firmware {}", port, version);
                }
                Err(e) => tracing::warn!("{} did not answer after programming: {}", port, e),
            }
        }

        self.listener.on_disabled("reprogramming exhausted");
        Err(FirmwareError::ReprogramExhausted { attempts }.into())
    }
}
