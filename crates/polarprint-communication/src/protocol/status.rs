//! Inbound frame parsing
//!
//! Status frame (8 bytes):
//! `'#' | checksum | heater0 | heater1 | rxAvailLo | rxAvailHi | queueAvailLo | queueAvailHi`
//! where bit 7 of `queueAvailHi` is the seeking flag.
//!
//! Version frame (4 bytes): `'V' | checksum | verLo | verHi`.
//!
//! In both, `checksum` is the payload byte sum modulo 256.

use polarprint_core::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// First byte of a status frame
pub const STATUS_MARKER: u8 = b'#';
/// Length of a status frame in bytes
pub const STATUS_FRAME_LEN: usize = 8;
/// First byte of a version frame
pub const VERSION_MARKER: u8 = b'V';
/// Length of a version frame in bytes
pub const VERSION_FRAME_LEN: usize = 4;

const SEEKING_BIT: u16 = 0x8000;

/// Sum of payload bytes modulo 256
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Device status as reported by one status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    /// Raw heater temperatures
    pub heaters: [u8; 2],
    /// Free bytes in the device's receive buffer
    pub rx_available: u16,
    /// Free slots in the device's motor queue
    pub motor_queue_available: u16,
    /// Device is homing
    pub seeking: bool,
}

impl StatusFrame {
    /// Parse exactly one status frame
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < STATUS_FRAME_LEN {
            return Err(ProtocolError::ShortFrame {
                needed: STATUS_FRAME_LEN,
                available: bytes.len(),
            });
        }
        if bytes[0] != STATUS_MARKER {
            return Err(ProtocolError::UnknownMarker { marker: bytes[0] });
        }
        let payload = &bytes[2..STATUS_FRAME_LEN];
        let expected = checksum(payload);
        if bytes[1] != expected {
            return Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: bytes[1],
            });
        }
        let queue_word = u16::from_le_bytes([payload[4], payload[5]]);
        Ok(Self {
            heaters: [payload[0], payload[1]],
            rx_available: u16::from_le_bytes([payload[2], payload[3]]),
            motor_queue_available: queue_word & !SEEKING_BIT,
            seeking: queue_word & SEEKING_BIT != 0,
        })
    }

    /// Wire bytes for this frame; used by device simulators
    pub fn encode(&self) -> [u8; STATUS_FRAME_LEN] {
        let rx = self.rx_available.to_le_bytes();
        let mut queue_word = self.motor_queue_available & !SEEKING_BIT;
        if self.seeking {
            queue_word |= SEEKING_BIT;
        }
        let queue = queue_word.to_le_bytes();
        let payload = [self.heaters[0], self.heaters[1], rx[0], rx[1], queue[0], queue[1]];
        let mut frame = [0u8; STATUS_FRAME_LEN];
        frame[0] = STATUS_MARKER;
        frame[1] = checksum(&payload);
        frame[2..].copy_from_slice(&payload);
        frame
    }
}

/// Parse a version frame into the reported firmware version
pub fn parse_version(bytes: &[u8]) -> Result<u16, ProtocolError> {
    if bytes.len() < VERSION_FRAME_LEN {
        return Err(ProtocolError::ShortFrame {
            needed: VERSION_FRAME_LEN,
            available: bytes.len(),
        });
    }
    if bytes[0] != VERSION_MARKER {
        return Err(ProtocolError::UnknownMarker { marker: bytes[0] });
    }
    let payload = &bytes[2..VERSION_FRAME_LEN];
    let expected = checksum(payload);
    if bytes[1] != expected {
        return Err(ProtocolError::ChecksumMismatch {
            expected,
            actual: bytes[1],
        });
    }
    Ok(u16::from_le_bytes([payload[0], payload[1]]))
}

/// Wire bytes for a version frame
pub fn encode_version(version: u16) -> [u8; VERSION_FRAME_LEN] {
    let payload = version.to_le_bytes();
    [VERSION_MARKER, checksum(&payload), payload[0], payload[1]]
}

/// Latest device status as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Raw heater temperatures
    pub heaters: [u8; 2],
    /// Free bytes in the device's receive buffer
    pub rx_available: u16,
    /// Free slots in the device's motor queue
    pub motor_queue_available: u16,
    /// Device is homing
    pub seeking: bool,
    /// Number of valid status frames received so far
    pub frames_received: u64,
}

impl DeviceStatus {
    /// State assumed before the first frame and after a malformed one:
    /// nothing available, device busy.
    pub fn conservative() -> Self {
        Self {
            heaters: [0, 0],
            rx_available: 0,
            motor_queue_available: 0,
            seeking: true,
            frames_received: 0,
        }
    }

    /// Adopt a freshly parsed frame
    pub fn apply(&mut self, frame: &StatusFrame) {
        self.heaters = frame.heaters;
        self.rx_available = frame.rx_available;
        self.motor_queue_available = frame.motor_queue_available;
        self.seeking = frame.seeking;
        self.frames_received += 1;
    }

    /// Fall back to the conservative state, keeping the frame counter
    pub fn invalidate(&mut self) {
        let frames_received = self.frames_received;
        *self = Self::conservative();
        self.frames_received = frames_received;
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::conservative()
    }
}

/// Something recognised in the inbound byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A valid status frame
    Status(StatusFrame),
    /// A valid version frame
    Version(u16),
    /// A frame that failed validation and was discarded
    Malformed(ProtocolError),
}

/// Ring buffer that extracts frames from arbitrary read chunks
#[derive(Debug)]
pub struct FrameScanner {
    buffer: VecDeque<u8>,
    capacity: usize,
}

impl FrameScanner {
    /// Default ring capacity in bytes
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create a scanner with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create a scanner that keeps at most `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity: capacity.max(STATUS_FRAME_LEN),
        }
    }

    /// Append received bytes, dropping the oldest on overflow
    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.buffer.len() == self.capacity {
                self.buffer.pop_front();
            }
            self.buffer.push_back(b);
        }
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete event, or `None` when more bytes are needed
    pub fn next_event(&mut self) -> Option<InboundEvent> {
        loop {
            let marker = *self.buffer.front()?;
            let len = match marker {
                STATUS_MARKER => STATUS_FRAME_LEN,
                VERSION_MARKER => VERSION_FRAME_LEN,
                _ => {
                    self.buffer.pop_front();
                    continue;
                }
            };
            if self.buffer.len() < len {
                return None;
            }
            let frame: Vec<u8> = self.buffer.iter().take(len).copied().collect();
            let parsed = if marker == STATUS_MARKER {
                StatusFrame::parse(&frame).map(InboundEvent::Status)
            } else {
                parse_version(&frame).map(InboundEvent::Version)
            };
            return Some(match parsed {
                Ok(event) => {
                    self.buffer.drain(..len);
                    event
                }
                Err(e) => {
                    // resynchronise on the next marker candidate
                    self.buffer.pop_front();
                    InboundEvent::Malformed(e)
                }
            });
        }
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}
