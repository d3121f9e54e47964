mod common;

use common::{SimulatedDevice, SimulatedProgrammer};
use parking_lot::Mutex;
use polarprint_communication::{DeviceDiscovery, DeviceListener, DiscoveryConfig, TransportConfig};
use polarprint_core::{Error, FirmwareError};
use std::time::Duration;

fn config(expected_version: u16) -> DiscoveryConfig {
    DiscoveryConfig {
        port: None,
        timeout: Duration::from_millis(300),
        retries: 2,
        expected_version,
        reprogram_retries: 2,
        transport: TransportConfig {
            idle_poll: Duration::from_millis(10),
            ..TransportConfig::default()
        },
    }
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl DeviceListener for RecordingListener {
    fn on_connected(&self, port: &str, version: u16) {
        self.events.lock().push(format!("connected {port} v{version}"));
    }

    fn on_version_mismatch(&self, _port: &str, expected: u16, actual: u16) {
        self.events.lock().push(format!("mismatch {expected}/{actual}"));
    }

    fn on_reprogram_attempt(&self, _port: &str, attempt: u32, max_attempts: u32) {
        self.events
            .lock()
            .push(format!("reprogram {attempt}/{max_attempts}"));
    }

    fn on_disabled(&self, reason: &str) {
        self.events.lock().push(format!("disabled: {reason}"));
    }
}

#[test]
fn test_connects_to_matching_firmware() {
    let device = SimulatedDevice::new(7);
    let listener = RecordingListener::default();
    let connection = DeviceDiscovery::new(&device, config(7))
        .with_listener(&listener)
        .connect()
        .unwrap();

    assert_eq!(connection.port, "/dev/ttyACM0");
    assert_eq!(connection.version, 7);
    assert!(connection.transport.is_running());
    assert_eq!(
        listener.events.lock().as_slice(),
        &["connected /dev/ttyACM0 v7".to_string()]
    );
}

#[test]
fn test_silent_port_exhausts_retries() {
    let device = SimulatedDevice::silent();
    let err = DeviceDiscovery::new(&device, config(1)).connect().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(device.opens(), 2);
}

#[test]
fn test_mismatch_without_programmer_fails() {
    let device = SimulatedDevice::new(3);
    let err = DeviceDiscovery::new(&device, config(4)).connect().unwrap_err();
    assert!(matches!(
        err,
        Error::Firmware(FirmwareError::VersionMismatch {
            expected: 4,
            actual: 3
        })
    ));
}

#[test]
fn test_mismatch_recovered_by_reprogramming() {
    let device = SimulatedDevice::new(3);
    let programmer = SimulatedProgrammer::new(device.clone(), 4);
    let listener = RecordingListener::default();
    let connection = DeviceDiscovery::new(&device, config(4))
        .with_programmer(&programmer)
        .with_listener(&listener)
        .connect()
        .unwrap();

    assert_eq!(connection.version, 4);
    assert_eq!(programmer.calls(), 1);
    let events = listener.events.lock().clone();
    assert_eq!(events[0], "mismatch 4/3");
    assert_eq!(events[1], "reprogram 1/2");
    assert_eq!(events[2], "connected /dev/ttyACM0 v4");
}

#[test]
fn test_reprogramming_exhausted_disables_link() {
    let device = SimulatedDevice::new(3);
    let mut programmer = SimulatedProgrammer::new(device.clone(), 4);
    programmer.fail = true;
    let listener = RecordingListener::default();
    let err = DeviceDiscovery::new(&device, config(4))
        .with_programmer(&programmer)
        .with_listener(&listener)
        .connect()
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Firmware(FirmwareError::ReprogramExhausted { attempts: 2 })
    ));
    assert_eq!(programmer.calls(), 2);
    assert_eq!(
        listener.events.lock().last().map(String::as_str),
        Some("disabled: reprogramming exhausted")
    );
}
