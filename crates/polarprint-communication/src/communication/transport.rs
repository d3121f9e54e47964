//! Threaded serial transport
//!
//! Two named worker threads share the port:
//! - `polarprint-tx` waits until the device reports enough receive-buffer
//!   headroom, swaps the double-buffered packet queue and writes a chunk
//!   that fits in the reported headroom.
//! - `polarprint-rx` scans inbound bytes for status and version frames and
//!   publishes the latest valid status.
//!
//! The caller enqueues only through [`PacketSink`].

use super::queues::PacketQueues;
use super::serial::{PortReader, PortWriter};
use super::PacketSink;
use crate::protocol::{encode_packets, DeviceStatus, FrameScanner, InboundEvent, Opcode, TxPacket};
use parking_lot::{Condvar, Mutex};
use polarprint_core::{ConnectionError, Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Transport tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// TX never writes while reported RX headroom is below this
    pub min_rx_headroom: u16,
    /// Poll interval for the workers and `wait_until_idle`
    pub idle_poll: Duration,
    /// Motor queue size the device reports when empty
    pub motor_queue_capacity: u16,
    /// Bytes requested per port read
    pub read_chunk: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            min_rx_headroom: 4096,
            idle_poll: Duration::from_secs(1),
            motor_queue_capacity: 256,
            read_chunk: 256,
        }
    }
}

/// State shared by the caller and both workers
#[derive(Debug)]
struct Shared {
    queues: Mutex<PacketQueues>,
    queues_changed: Condvar,
    status: Mutex<DeviceStatus>,
    status_changed: Condvar,
    version: Mutex<Option<u16>>,
    last_error: Mutex<Option<String>>,
    stop: AtomicBool,
    in_flight: AtomicUsize,
    bytes_written: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            queues: Mutex::new(PacketQueues::new()),
            queues_changed: Condvar::new(),
            status: Mutex::new(DeviceStatus::conservative()),
            status_changed: Condvar::new(),
            version: Mutex::new(None),
            last_error: Mutex::new(None),
            stop: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn record_error(&self, message: String) {
        tracing::error!("{}", message);
        *self.last_error.lock() = Some(message);
    }

    /// Block until `transmitting` holds packets; false on timeout or stop
    fn wait_for_packets(&self, poll: Duration) -> bool {
        let mut queues = self.queues.lock();
        loop {
            if self.stopping() {
                return false;
            }
            queues.swap_if_drained();
            if queues.transmitting_len() > 0 {
                return true;
            }
            if self.queues_changed.wait_for(&mut queues, poll).timed_out() {
                return false;
            }
        }
    }

    /// Block until reported headroom reaches `minimum`; returns the headroom
    fn wait_for_headroom(&self, minimum: u16, poll: Duration) -> Option<u16> {
        let mut status = self.status.lock();
        loop {
            if self.stopping() {
                return None;
            }
            if status.rx_available >= minimum {
                return Some(status.rx_available);
            }
            if self.status_changed.wait_for(&mut status, poll).timed_out() {
                return None;
            }
        }
    }

    fn take_chunk(&self, budget: usize) -> Vec<TxPacket> {
        let chunk = self.queues.lock().take_chunk(budget);
        self.in_flight.fetch_add(chunk.len(), Ordering::AcqRel);
        chunk
    }

    fn finish_chunk(&self, packets: usize) {
        self.in_flight.fetch_sub(packets, Ordering::AcqRel);
        self.queues_changed.notify_all();
    }

    /// Account for bytes now occupying the device buffer until the next
    /// status frame reports fresh headroom
    fn consume_headroom(&self, bytes: usize) {
        let mut status = self.status.lock();
        let used = u16::try_from(bytes).unwrap_or(u16::MAX);
        status.rx_available = status.rx_available.saturating_sub(used);
    }

    fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Status(frame) => {
                self.status.lock().apply(&frame);
                tracing::trace!(
                    rx = frame.rx_available,
                    queue = frame.motor_queue_available,
                    seeking = frame.seeking,
                    "status"
                );
            }
            InboundEvent::Version(version) => {
                let _status = self.status.lock();
                *self.version.lock() = Some(version);
                tracing::debug!("Device reports firmware version {}", version);
            }
            InboundEvent::Malformed(e) => {
                self.status.lock().invalidate();
                tracing::warn!("Discarded malformed frame: {}", e);
            }
        }
        self.status_changed.notify_all();
    }

    fn packets_remaining(&self) -> usize {
        self.queues.lock().len() + self.in_flight.load(Ordering::Acquire)
    }
}

/// Serial transport running TX and RX worker threads
pub struct SerialTransport {
    shared: Arc<Shared>,
    writer: Arc<Mutex<PortWriter>>,
    config: TransportConfig,
    batch: Vec<TxPacket>,
    batch_open: bool,
    tx_handle: Option<JoinHandle<()>>,
    rx_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("batch_open", &self.batch_open)
            .finish()
    }
}

impl SerialTransport {
    /// Start both workers over an already opened port
    pub fn start(reader: PortReader, writer: PortWriter, config: TransportConfig) -> Result<Self> {
        let shared = Arc::new(Shared::new());
        let writer = Arc::new(Mutex::new(writer));

        let rx_handle = {
            let shared = shared.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("polarprint-rx".to_string())
                .spawn(move || rx_loop(reader, &shared, &config))?
        };

        let tx_handle = {
            let shared_tx = shared.clone();
            let writer = writer.clone();
            let config = config.clone();
            match thread::Builder::new()
                .name("polarprint-tx".to_string())
                .spawn(move || tx_loop(&writer, &shared_tx, &config))
            {
                Ok(handle) => handle,
                Err(e) => {
                    shared.stop.store(true, Ordering::Release);
                    let _ = rx_handle.join();
                    return Err(e.into());
                }
            }
        };

        tracing::info!(
            "Transport started (min headroom {} bytes)",
            config.min_rx_headroom
        );

        Ok(Self {
            shared,
            writer,
            config,
            batch: Vec::new(),
            batch_open: false,
            tx_handle: Some(tx_handle),
            rx_handle: Some(rx_handle),
        })
    }

    /// Transport configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Both workers are alive
    pub fn is_running(&self) -> bool {
        self.tx_handle.is_some() && self.rx_handle.is_some() && !self.shared.stopping()
    }

    /// Most recent worker failure
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    /// Total bytes written by the TX worker
    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::Acquire)
    }

    /// Firmware version from the most recent version frame
    pub fn version(&self) -> Option<u16> {
        *self.shared.version.lock()
    }

    /// Write a control opcode straight to the port, bypassing the queue
    fn write_direct(&self, opcodes: &[Opcode]) -> Result<()> {
        let packets: Vec<TxPacket> = opcodes.iter().map(|op| TxPacket::new(*op)).collect();
        let bytes = encode_packets(&packets);
        let mut writer = self.writer.lock();
        writer
            .write_all(&bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| {
                Error::from(ConnectionError::WriteFailed {
                    reason: e.to_string(),
                })
            })
    }

    /// Ask the device to report its firmware version
    pub fn request_version(&self) -> Result<()> {
        *self.shared.version.lock() = None;
        self.write_direct(&[Opcode::RequestVersion])
    }

    /// Wait for a version frame
    pub fn wait_for_version(&self, timeout: Duration) -> Option<u16> {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.status.lock();
        loop {
            if let Some(version) = *self.shared.version.lock() {
                return Some(version);
            }
            if self
                .shared
                .status_changed
                .wait_until(&mut status, deadline)
                .timed_out()
            {
                return *self.shared.version.lock();
            }
        }
    }

    /// Wait for a status frame newer than the current snapshot
    pub fn wait_for_status(&self, timeout: Duration) -> Option<DeviceStatus> {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.status.lock();
        let seen = status.frames_received;
        while status.frames_received == seen {
            if self
                .shared
                .status_changed
                .wait_until(&mut status, deadline)
                .timed_out()
            {
                return None;
            }
        }
        Some(*status)
    }

    /// Poll until every packet is written, the motor queue is empty and the
    /// device is not homing. Returns `false` when cancelled.
    pub fn wait_until_idle(&self, cancel: &AtomicBool) -> Result<bool> {
        loop {
            if cancel.load(Ordering::Acquire) {
                tracing::info!("Wait for idle cancelled");
                return Ok(false);
            }
            if self.shared.stopping() {
                return Err(ConnectionError::NotConnected.into());
            }
            let status = self.status();
            if self.packets_remaining() == 0
                && status.motor_queue_available >= self.config.motor_queue_capacity
                && !status.seeking
            {
                return Ok(true);
            }
            tracing::debug!(
                remaining = self.packets_remaining(),
                queue = status.motor_queue_available,
                "Waiting for device to go idle"
            );
            thread::sleep(self.config.idle_poll);
        }
    }

    /// Stop both workers, drop every queued packet and cycle the device
    /// through Sleep and Wake so it discards in-flight motion
    pub fn abort(&mut self) -> Result<()> {
        tracing::warn!("Aborting transport");
        self.shutdown();
        self.batch.clear();
        self.batch_open = false;
        self.shared.queues.lock().clear();
        self.shared.in_flight.store(0, Ordering::Release);
        self.write_direct(&[Opcode::Sleep, Opcode::Wake])
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.queues_changed.notify_all();
        self.shared.status_changed.notify_all();
        for handle in [self.tx_handle.take(), self.rx_handle.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                tracing::error!("Transport worker panicked");
            }
        }
    }
}

impl PacketSink for SerialTransport {
    fn begin_sending_packets(&mut self) {
        debug_assert!(!self.batch_open, "begin_sending_packets while a batch is open");
        self.batch_open = true;
    }

    fn send_packet(&mut self, packet: TxPacket) {
        debug_assert!(self.batch_open, "send_packet outside a batch");
        self.batch.push(packet);
    }

    fn end_sending_packets(&mut self) -> Result<()> {
        debug_assert!(self.batch_open, "end_sending_packets without begin");
        self.batch_open = false;
        if self.shared.stopping() {
            self.batch.clear();
            return Err(ConnectionError::NotConnected.into());
        }
        self.shared.queues.lock().push_batch(&mut self.batch);
        self.shared.queues_changed.notify_all();
        Ok(())
    }

    fn packets_remaining(&self) -> usize {
        self.shared.packets_remaining()
    }

    fn status(&self) -> DeviceStatus {
        *self.shared.status.lock()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tx_loop(writer: &Mutex<PortWriter>, shared: &Shared, config: &TransportConfig) {
    tracing::debug!("TX worker started");
    while !shared.stopping() {
        if !shared.wait_for_packets(config.idle_poll) {
            continue;
        }
        let Some(headroom) = shared.wait_for_headroom(config.min_rx_headroom, config.idle_poll)
        else {
            continue;
        };

        let chunk = shared.take_chunk(usize::from(headroom));
        if chunk.is_empty() {
            shared.finish_chunk(0);
            continue;
        }
        let bytes = encode_packets(&chunk);

        let result = {
            let mut port = writer.lock();
            port.write_all(&bytes).and_then(|_| port.flush())
        };
        match result {
            Ok(()) => {
                shared.consume_headroom(bytes.len());
                shared
                    .bytes_written
                    .fetch_add(bytes.len() as u64, Ordering::AcqRel);
                tracing::trace!(packets = chunk.len(), bytes = bytes.len(), "wrote chunk");
            }
            Err(e) => {
                shared.status.lock().invalidate();
                shared.record_error(format!(
                    "Write of {} packets failed: {}",
                    chunk.len(),
                    e
                ));
            }
        }
        shared.finish_chunk(chunk.len());
    }
    tracing::debug!("TX worker stopped");
}

fn rx_loop(mut reader: PortReader, shared: &Shared, config: &TransportConfig) {
    tracing::debug!("RX worker started");
    let mut scanner = FrameScanner::new();
    let mut buf = vec![0u8; config.read_chunk.max(1)];
    while !shared.stopping() {
        match reader.read(&mut buf) {
            Ok(0) => thread::sleep(config.idle_poll.min(Duration::from_millis(10))),
            Ok(n) => {
                scanner.push(&buf[..n]);
                while let Some(event) = scanner.next_event() {
                    shared.handle_event(event);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                shared.status.lock().invalidate();
                shared.status_changed.notify_all();
                shared.record_error(format!("Read failed: {}", e));
                thread::sleep(config.idle_poll);
            }
        }
    }
    tracing::debug!("RX worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusFrame;

    #[test]
    fn test_consume_headroom_saturates() {
        let shared = Shared::new();
        shared.handle_event(InboundEvent::Status(StatusFrame {
            heaters: [0, 0],
            rx_available: 100,
            motor_queue_available: 0,
            seeking: false,
        }));
        shared.consume_headroom(60);
        assert_eq!(shared.status.lock().rx_available, 40);
        shared.consume_headroom(60);
        assert_eq!(shared.status.lock().rx_available, 0);
    }

    #[test]
    fn test_malformed_frame_invalidates_status() {
        let shared = Shared::new();
        shared.handle_event(InboundEvent::Status(StatusFrame {
            heaters: [10, 20],
            rx_available: 5000,
            motor_queue_available: 30,
            seeking: false,
        }));
        shared.handle_event(InboundEvent::Malformed(
            polarprint_core::ProtocolError::UnknownMarker { marker: 0 },
        ));
        let status = *shared.status.lock();
        assert_eq!(status.rx_available, 0);
        assert!(status.seeking);
    }

    #[test]
    fn test_headroom_wait_times_out_below_minimum() {
        let shared = Shared::new();
        assert_eq!(
            shared.wait_for_headroom(4096, Duration::from_millis(5)),
            None
        );
    }
}
