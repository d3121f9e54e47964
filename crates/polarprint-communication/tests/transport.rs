mod common;

use common::duplex;
use polarprint_communication::{
    encode_packets, Opcode, PacketSink, SerialTransport, TransportConfig, TxPacket,
};
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::{Duration, Instant};

fn config() -> TransportConfig {
    TransportConfig {
        idle_poll: Duration::from_millis(10),
        motor_queue_capacity: 256,
        ..TransportConfig::default()
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_nothing_written_until_headroom_reported() {
    let (reader, writer, device) = duplex();
    let mut transport = SerialTransport::start(reader, writer, config()).unwrap();

    let batch = vec![
        TxPacket::new(Opcode::Wake),
        TxPacket::with_value(Opcode::StepRate, 500),
        TxPacket::with_value(Opcode::Steps, 40),
    ];
    transport.send_batch(&batch).unwrap();

    assert!(device.drain(Duration::from_millis(100)).is_empty());
    assert_eq!(transport.packets_remaining(), 3);

    device.send_status(4095, 10, false);
    assert!(device.drain(Duration::from_millis(100)).is_empty());

    device.send_status(4096, 10, false);
    let expected = encode_packets(&batch);
    let written = device.collect(expected.len(), Duration::from_secs(2));
    assert_eq!(written, expected);
    assert!(wait_until(Duration::from_secs(1), || transport
        .packets_remaining()
        == 0));
}

#[test]
fn test_writes_never_exceed_reported_headroom() {
    let (reader, writer, device) = duplex();
    let mut transport = SerialTransport::start(reader, writer, config()).unwrap();

    // 4 bytes each on the wire
    let batch: Vec<TxPacket> = (0..3000)
        .map(|_| TxPacket::with_value(Opcode::Steps, 1000))
        .collect();
    transport.send_batch(&batch).unwrap();

    device.send_status(4096, 10, false);
    let first = device.collect(4096, Duration::from_secs(2));
    assert_eq!(first.len(), 4096);
    assert!(device.drain(Duration::from_millis(100)).is_empty());

    device.send_status(4096, 10, false);
    let second = device.collect(4096, Duration::from_secs(2));
    assert_eq!(second.len(), 4096);
    assert!(wait_until(Duration::from_secs(1), || transport
        .packets_remaining()
        == 3000 - 2048));
}

#[test]
fn test_batches_keep_arrival_order() {
    let (reader, writer, device) = duplex();
    let mut transport = SerialTransport::start(reader, writer, config()).unwrap();

    let first = vec![TxPacket::new(Opcode::Home)];
    let second = vec![TxPacket::new(Opcode::Sleep), TxPacket::new(Opcode::Wake)];
    transport.send_batch(&first).unwrap();
    transport.send_batch(&second).unwrap();

    device.send_status(8000, 10, false);
    let written = device.collect(3, Duration::from_secs(2));
    assert_eq!(written, vec![0x03, 0x01, 0x02]);
}

#[test]
fn test_status_published_and_invalidated_on_bad_frame() {
    let (reader, writer, device) = duplex();
    let transport = SerialTransport::start(reader, writer, config()).unwrap();

    assert_eq!(transport.status().rx_available, 0);
    assert!(transport.is_seeking());

    device.send_status(5000, 120, false);
    let status = transport.wait_for_status(Duration::from_secs(2)).unwrap();
    assert_eq!(status.rx_available, 5000);
    assert_eq!(status.motor_queue_available, 120);
    assert_eq!(transport.heater_temp(1), 21);

    let mut bad = polarprint_communication::StatusFrame {
        heaters: [1, 2],
        rx_available: 9000,
        motor_queue_available: 5,
        seeking: false,
    }
    .encode();
    bad[1] = bad[1].wrapping_add(1);
    device.to_host.send(bad.to_vec()).unwrap();

    assert!(wait_until(Duration::from_secs(1), || transport
        .rx_bytes_available()
        == 0));
    assert!(transport.is_seeking());
}

#[test]
fn test_write_failure_is_recorded_and_later_batches_still_drain() {
    let (reader, writer, device) = duplex();
    let mut transport = SerialTransport::start(reader, writer, config()).unwrap();
    device.faults.fail_writes(1);

    transport.send_batch(&[TxPacket::new(Opcode::Home)]).unwrap();
    device.send_status(8192, 10, false);
    assert!(wait_until(Duration::from_secs(2), || transport
        .last_error()
        .is_some()));
    assert!(device.drain(Duration::from_millis(50)).is_empty());
    assert!(wait_until(Duration::from_secs(1), || transport
        .packets_remaining()
        == 0));

    // headroom is unknown again until the device reports
    let status = transport.status();
    assert_eq!(status.rx_available, 0);
    assert!(status.seeking);
    assert_eq!(status.frames_received, 1);
    assert!(transport.is_running());

    let batch = vec![
        TxPacket::with_value(Opcode::StepRate, 500),
        TxPacket::with_value(Opcode::Steps, 40),
    ];
    transport.send_batch(&batch).unwrap();
    assert!(device.drain(Duration::from_millis(100)).is_empty());

    device.send_status(8192, 10, false);
    let expected = encode_packets(&batch);
    assert_eq!(device.collect(expected.len(), Duration::from_secs(2)), expected);
    assert!(transport.last_error().unwrap().contains("cable unplugged"));
}

#[test]
fn test_read_failure_invalidates_status_until_next_frame() {
    let (reader, writer, device) = duplex();
    let transport = SerialTransport::start(reader, writer, config()).unwrap();

    device.send_status(5000, 120, false);
    assert!(wait_until(Duration::from_secs(2), || transport
        .rx_bytes_available()
        == 5000));
    assert!(transport.last_error().is_none());

    device.faults.fail_reads(1);
    assert!(wait_until(Duration::from_secs(2), || transport
        .last_error()
        .is_some()));
    assert_eq!(transport.rx_bytes_available(), 0);
    assert!(transport.is_seeking());

    device.send_status(6000, 120, false);
    assert!(wait_until(Duration::from_secs(2), || transport
        .rx_bytes_available()
        == 6000));
    assert!(!transport.is_seeking());
    assert!(transport.is_running());
}

#[test]
fn test_wait_until_idle_and_cancel() {
    let (reader, writer, device) = duplex();
    let transport = SerialTransport::start(reader, writer, config()).unwrap();

    let cancel = AtomicBool::new(true);
    assert!(!transport.wait_until_idle(&cancel).unwrap());

    device.send_status(4096, 256, false);
    transport.wait_for_status(Duration::from_secs(2)).unwrap();
    let cancel = AtomicBool::new(false);
    assert!(transport.wait_until_idle(&cancel).unwrap());
}

#[test]
fn test_abort_clears_queue_and_cycles_sleep_wake() {
    let (reader, writer, device) = duplex();
    let mut transport = SerialTransport::start(reader, writer, config()).unwrap();

    let batch: Vec<TxPacket> = (0..10).map(|_| TxPacket::new(Opcode::Nop)).collect();
    transport.send_batch(&batch).unwrap();
    transport.abort().unwrap();

    assert_eq!(transport.packets_remaining(), 0);
    assert!(!transport.is_running());
    assert_eq!(device.drain(Duration::from_millis(200)), vec![0x01, 0x02]);
    assert!(transport.send_batch(&batch).is_err());
}

#[test]
fn test_version_request() {
    let (reader, writer, device) = duplex();
    let transport = SerialTransport::start(reader, writer, config()).unwrap();

    transport.request_version().unwrap();
    assert_eq!(device.drain(Duration::from_millis(200)), vec![0x04]);
    device
        .to_host
        .send(polarprint_communication::protocol::status::encode_version(3).to_vec())
        .unwrap();
    assert_eq!(transport.wait_for_version(Duration::from_secs(2)), Some(3));
    assert_eq!(transport.version(), Some(3));
}
