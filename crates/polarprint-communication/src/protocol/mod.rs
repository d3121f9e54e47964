//! Wire protocol
//!
//! Outbound: opcodes optionally preceded by value tokens.
//! Inbound: fixed-length `#` status frames and `V` version frames.

pub mod opcode;
pub mod packet;
pub mod status;

pub use opcode::{MotorId, Opcode, MAX_EXTRUDERS, MAX_MOTORS};
pub use packet::{encode_packets, DecodedCommand, PacketDecoder, TxPacket};
pub use status::{
    checksum, DeviceStatus, FrameScanner, InboundEvent, StatusFrame, STATUS_FRAME_LEN,
};
