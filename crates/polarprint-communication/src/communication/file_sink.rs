//! File-logging sink
//!
//! Writes the exact byte stream the serial transport would send, so a
//! print can be compiled offline and replayed or inspected later.

use super::PacketSink;
use crate::protocol::{DeviceStatus, TxPacket};
use polarprint_core::{ConnectionError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sink that appends encoded packets to a file
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    batch: Option<Vec<u8>>,
    bytes_written: u64,
    packets_written: u64,
}

impl FileSink {
    /// Create (truncate) the log file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| ConnectionError::FailedToOpen {
            port: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!("Logging packets to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            batch: None,
            bytes_written: 0,
            packets_written: 0,
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total bytes flushed so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Total packets flushed so far
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }
}

impl PacketSink for FileSink {
    fn begin_sending_packets(&mut self) {
        debug_assert!(self.batch.is_none(), "nested begin_sending_packets");
        self.batch = Some(Vec::new());
    }

    fn send_packet(&mut self, packet: TxPacket) {
        debug_assert!(self.batch.is_some(), "send_packet outside a batch");
        packet.encode_into(self.batch.get_or_insert_with(Vec::new));
        self.packets_written += 1;
    }

    fn end_sending_packets(&mut self) -> Result<()> {
        debug_assert!(self.batch.is_some(), "unmatched end_sending_packets");
        let Some(bytes) = self.batch.take() else {
            return Ok(());
        };
        self.writer
            .write_all(&bytes)
            .and_then(|_| self.writer.flush())
            .map_err(|e| ConnectionError::WriteFailed {
                reason: e.to_string(),
            })?;
        self.bytes_written += bytes.len() as u64;
        tracing::debug!("Logged {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }

    fn packets_remaining(&self) -> usize {
        0
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            heaters: [0, 0],
            rx_available: u16::MAX,
            motor_queue_available: 0x7FFF,
            seeking: false,
            frames_received: 0,
        }
    }
}
