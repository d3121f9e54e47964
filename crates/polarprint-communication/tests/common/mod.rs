//! Shared test fixtures: an in-memory duplex port and a simulated device

#![allow(dead_code)]

use parking_lot::Mutex;
use polarprint_communication::protocol::status::encode_version;
use polarprint_communication::{
    FirmwareProgrammer, Opcode, PortOpener, PortReader, PortWriter, StatusFrame,
};
use polarprint_core::{Error, Result};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Number of upcoming host reads and writes that fail with an I/O error
#[derive(Debug, Default)]
pub struct PortFaults {
    pub reads: AtomicU32,
    pub writes: AtomicU32,
}

impl PortFaults {
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn fail_reads(&self, count: u32) {
        self.reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, count: u32) {
        self.writes.store(count, Ordering::SeqCst);
    }
}

/// Host-side reader fed by the device end
pub struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    timeout: Duration,
    faults: Arc<PortFaults>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if PortFaults::take(&self.faults.reads) {
            return Err(io::Error::new(io::ErrorKind::Other, "framing error"));
        }
        if self.pending.is_empty() {
            match self.rx.recv_timeout(self.timeout) {
                Ok(bytes) => self.pending = bytes,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Host-side writer delivering to the device end
pub struct ChannelWriter {
    tx: Sender<Vec<u8>>,
    faults: Arc<PortFaults>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if PortFaults::take(&self.faults.writes) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable unplugged"));
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Device side of a duplex port
pub struct DeviceEnd {
    pub to_host: Sender<Vec<u8>>,
    pub from_host: Receiver<Vec<u8>>,
    /// Faults injected into the host side
    pub faults: Arc<PortFaults>,
}

impl DeviceEnd {
    /// Report a status frame to the host
    pub fn send_status(&self, rx_available: u16, motor_queue_available: u16, seeking: bool) {
        let frame = StatusFrame {
            heaters: [20, 21],
            rx_available,
            motor_queue_available,
            seeking,
        };
        let _ = self.to_host.send(frame.encode().to_vec());
    }

    /// Every byte the host has written so far, waiting up to `timeout` for
    /// the first chunk
    pub fn drain(&self, timeout: Duration) -> Vec<u8> {
        let mut bytes = Vec::new();
        if let Ok(chunk) = self.from_host.recv_timeout(timeout) {
            bytes.extend(chunk);
        }
        while let Ok(chunk) = self.from_host.try_recv() {
            bytes.extend(chunk);
        }
        bytes
    }

    /// Collect host bytes until at least `count` arrived or `timeout` passed
    pub fn collect(&self, count: usize, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut bytes = Vec::new();
        while bytes.len() < count {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            if let Ok(chunk) = self.from_host.recv_timeout(left) {
                bytes.extend(chunk);
            }
        }
        bytes
    }
}

/// Create a connected host reader/writer pair and its device end
pub fn duplex() -> (PortReader, PortWriter, DeviceEnd) {
    let (to_host, host_rx) = mpsc::channel();
    let (host_tx, from_host) = mpsc::channel();
    let faults = Arc::new(PortFaults::default());
    let reader = ChannelReader {
        rx: host_rx,
        pending: Vec::new(),
        timeout: Duration::from_millis(5),
        faults: Arc::clone(&faults),
    };
    let writer = ChannelWriter {
        tx: host_tx,
        faults: Arc::clone(&faults),
    };
    (
        Box::new(reader),
        Box::new(writer),
        DeviceEnd {
            to_host,
            from_host,
            faults,
        },
    )
}

/// Simulated controller answering status and version requests
#[derive(Clone)]
pub struct SimulatedDevice {
    pub version: Arc<Mutex<u16>>,
    pub responsive: bool,
    pub opens: Arc<AtomicU32>,
}

impl SimulatedDevice {
    pub fn new(version: u16) -> Self {
        Self {
            version: Arc::new(Mutex::new(version)),
            responsive: true,
            opens: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn silent() -> Self {
        Self {
            responsive: false,
            ..Self::new(0)
        }
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

impl PortOpener for SimulatedDevice {
    fn open(&self, _port: &str) -> Result<(PortReader, PortWriter)> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (reader, writer, device) = duplex();
        let version = *self.version.lock();
        let responsive = self.responsive;
        thread::spawn(move || run_device(device, version, responsive));
        Ok((reader, writer))
    }

    fn candidates(&self) -> Result<Vec<String>> {
        Ok(vec!["/dev/ttyACM0".to_string()])
    }
}

fn run_device(device: DeviceEnd, version: u16, responsive: bool) {
    loop {
        if responsive {
            device.send_status(8192, 256, false);
        }
        match device.from_host.recv_timeout(Duration::from_millis(5)) {
            Ok(bytes) => {
                if responsive && bytes.contains(&Opcode::RequestVersion.to_byte()) {
                    let _ = device.to_host.send(encode_version(version).to_vec());
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Programmer that flashes `target` into the simulated device
pub struct SimulatedProgrammer {
    pub device: SimulatedDevice,
    pub target: u16,
    pub fail: bool,
    pub calls: AtomicU32,
}

impl SimulatedProgrammer {
    pub fn new(device: SimulatedDevice, target: u16) -> Self {
        Self {
            device,
            target,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FirmwareProgrammer for SimulatedProgrammer {
    fn program(&self, _port: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::other("programmer rejected image"));
        }
        *self.device.version.lock() = self.target;
        Ok(())
    }
}
