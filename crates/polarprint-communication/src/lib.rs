//! # Polarprint Communication
//!
//! Binary packet protocol spoken by the printer's controller, the
//! [`PacketSink`] seam the motion compiler writes through, the threaded
//! serial transport and device discovery.

pub mod communication;
pub mod device;
pub mod protocol;

pub use communication::{
    list_ports, open_port, FileSink, MemorySink, PacketSink, PortOpener, PortReader, PortWriter,
    SerialOpener, SerialParams, SerialPortInfo, SerialTransport, TransportConfig,
};

pub use device::{
    DeviceConnection, DeviceDiscovery, DeviceListener, DiscoveryConfig, FirmwareProgrammer,
    NoOpListener,
};

pub use protocol::{
    encode_packets, DecodedCommand, DeviceStatus, MotorId, Opcode, PacketDecoder, StatusFrame,
    TxPacket, MAX_EXTRUDERS, MAX_MOTORS,
};
