//! Packet sinks
//!
//! The motion compiler talks to the device only through [`PacketSink`];
//! the serial transport, the file logger and the in-memory recorder are
//! interchangeable behind it.

pub mod file_sink;
pub mod memory;
pub mod queues;
pub mod serial;
pub mod transport;

pub use file_sink::FileSink;
pub use memory::MemorySink;
pub use queues::PacketQueues;
pub use serial::{
    list_ports, open_port, PortOpener, PortReader, PortWriter, SerialOpener, SerialParams,
    SerialPortInfo,
};
pub use transport::{SerialTransport, TransportConfig};

use crate::protocol::{DeviceStatus, TxPacket};
use polarprint_core::Result;

/// Destination for outbound packets plus a view of device status
///
/// Packets are only accepted between `begin_sending_packets` and
/// `end_sending_packets`; a batch becomes visible to the consumer
/// atomically at `end_sending_packets`. Unmatched begin/end calls are
/// caller defects.
pub trait PacketSink: Send {
    /// Open a batch
    fn begin_sending_packets(&mut self);

    /// Append one packet to the open batch
    fn send_packet(&mut self, packet: TxPacket);

    /// Close the batch and hand it to the consumer
    fn end_sending_packets(&mut self) -> Result<()>;

    /// Packets accepted but not yet written
    fn packets_remaining(&self) -> usize;

    /// Latest status snapshot
    fn status(&self) -> DeviceStatus;

    /// Raw temperature of heater `index` (0 or 1)
    fn heater_temp(&self, index: usize) -> u8 {
        self.status().heaters.get(index).copied().unwrap_or(0)
    }

    /// Free bytes in the device receive buffer
    fn rx_bytes_available(&self) -> u16 {
        self.status().rx_available
    }

    /// Free slots in the device motor queue
    fn motor_queue_available(&self) -> u16 {
        self.status().motor_queue_available
    }

    /// Device is homing
    fn is_seeking(&self) -> bool {
        self.status().seeking
    }

    /// Send a batch in one begin/end pair
    fn send_batch(&mut self, packets: &[TxPacket]) -> Result<()> {
        self.begin_sending_packets();
        for packet in packets {
            self.send_packet(*packet);
        }
        self.end_sending_packets()
    }
}

impl<S: PacketSink + ?Sized> PacketSink for Box<S> {
    fn begin_sending_packets(&mut self) {
        (**self).begin_sending_packets()
    }

    fn send_packet(&mut self, packet: TxPacket) {
        (**self).send_packet(packet)
    }

    fn end_sending_packets(&mut self) -> Result<()> {
        (**self).end_sending_packets()
    }

    fn packets_remaining(&self) -> usize {
        (**self).packets_remaining()
    }

    fn status(&self) -> DeviceStatus {
        (**self).status()
    }
}
