//! In-memory sink that records every batch

use super::PacketSink;
use crate::protocol::{encode_packets, DeviceStatus, TxPacket};
use polarprint_core::{thread_safe, Result, ThreadSafe};

/// Sink that keeps every packet it receives
///
/// Clones share the same record, so a test can hand one clone to the
/// motion controller and inspect the other.
#[derive(Debug, Clone)]
pub struct MemorySink {
    batches: ThreadSafe<Vec<Vec<TxPacket>>>,
    status: ThreadSafe<DeviceStatus>,
    open: Option<Vec<TxPacket>>,
}

impl MemorySink {
    /// Sink reporting an idle device with plenty of headroom
    pub fn new() -> Self {
        Self {
            batches: thread_safe(Vec::new()),
            status: thread_safe(DeviceStatus {
                heaters: [0, 0],
                rx_available: u16::MAX,
                motor_queue_available: 0x7FFF,
                seeking: false,
                frames_received: 0,
            }),
            open: None,
        }
    }

    /// Replace the reported status
    pub fn set_status(&self, status: DeviceStatus) {
        *self.status.lock() = status;
    }

    /// Completed batches in arrival order
    pub fn batches(&self) -> Vec<Vec<TxPacket>> {
        self.batches.lock().clone()
    }

    /// All packets of all batches, flattened
    pub fn packets(&self) -> Vec<TxPacket> {
        self.batches.lock().iter().flatten().copied().collect()
    }

    /// Wire bytes of everything received
    pub fn bytes(&self) -> Vec<u8> {
        encode_packets(&self.packets())
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.batches.lock().clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketSink for MemorySink {
    fn begin_sending_packets(&mut self) {
        debug_assert!(self.open.is_none(), "nested begin_sending_packets");
        self.open = Some(Vec::new());
    }

    fn send_packet(&mut self, packet: TxPacket) {
        debug_assert!(self.open.is_some(), "send_packet outside a batch");
        self.open.get_or_insert_with(Vec::new).push(packet);
    }

    fn end_sending_packets(&mut self) -> Result<()> {
        debug_assert!(self.open.is_some(), "unmatched end_sending_packets");
        if let Some(batch) = self.open.take() {
            self.batches.lock().push(batch);
        }
        Ok(())
    }

    fn packets_remaining(&self) -> usize {
        0
    }

    fn status(&self) -> DeviceStatus {
        *self.status.lock()
    }
}
