//! Command opcodes
//!
//! Every opcode byte is below `0x80`; bytes with the high bit set are inline
//! value tokens (see [`crate::protocol::packet`]). Motor-addressed opcodes
//! carry the motor index in their low three bits.

use polarprint_core::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of motor slots addressable by the protocol
pub const MAX_MOTORS: u8 = 8;

/// Number of extruder slots (motor slots after the four track motors)
pub const MAX_EXTRUDERS: u8 = MAX_MOTORS - MotorId::FIRST_EXTRUDER.0;

/// Device motor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MotorId(u8);

impl MotorId {
    /// Rotating build platform
    pub const PLATFORM: MotorId = MotorId(0);
    /// Radial track carrying the extruders
    pub const RADIAL: MotorId = MotorId(1);
    /// Left vertical track
    pub const VERTICAL_LEFT: MotorId = MotorId(2);
    /// Right vertical track
    pub const VERTICAL_RIGHT: MotorId = MotorId(3);
    /// First extruder slot
    pub const FIRST_EXTRUDER: MotorId = MotorId(4);

    /// Motor id from a raw slot index
    pub fn new(index: u8) -> Option<Self> {
        (index < MAX_MOTORS).then_some(MotorId(index))
    }

    /// Motor id of the `n`th extruder
    pub fn extruder(n: u8) -> Option<Self> {
        Self::new(Self::FIRST_EXTRUDER.0.checked_add(n)?)
    }

    /// Raw slot index
    pub fn index(self) -> u8 {
        self.0
    }

    /// Extruder number if this slot is an extruder
    pub fn extruder_index(self) -> Option<u8> {
        self.0.checked_sub(Self::FIRST_EXTRUDER.0)
    }

    /// True for the radial and vertical tracks
    pub fn is_linear(self) -> bool {
        matches!(self, Self::RADIAL | Self::VERTICAL_LEFT | Self::VERTICAL_RIGHT)
    }

    /// All addressable motor slots in index order
    pub fn all() -> impl Iterator<Item = MotorId> {
        (0..MAX_MOTORS).map(MotorId)
    }
}

impl fmt::Display for MotorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::PLATFORM => write!(f, "platform"),
            Self::RADIAL => write!(f, "radial"),
            Self::VERTICAL_LEFT => write!(f, "vertical-left"),
            Self::VERTICAL_RIGHT => write!(f, "vertical-right"),
            other => write!(f, "extruder{}", other.0 - Self::FIRST_EXTRUDER.0),
        }
    }
}

/// Command opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// No operation
    Nop,
    /// Power down motor drivers, dropping queued motion
    Sleep,
    /// Power motor drivers back up
    Wake,
    /// Seek the home switches
    Home,
    /// Ask the device for a version frame
    RequestVersion,
    /// Selected motor turns clockwise
    DirectionCw,
    /// Selected motor turns counter-clockwise
    DirectionCcw,
    /// Micro-step divisor for the selected motor (argument)
    StepSize,
    /// Ticks per step for the selected motor (argument)
    StepRate,
    /// Pulse count for the selected motor; idle ticks while stopped (argument)
    Steps,
    /// Selected motor holds still
    Stop,
    /// Target temperature for heater 0 (argument)
    HeaterTarget0,
    /// Target temperature for heater 1 (argument)
    HeaterTarget1,
    /// Make `m` the selected motor
    SelectMotor(MotorId),
    /// `SelectMotor(m)` followed by `Steps` (argument)
    StepMotor(MotorId),
    /// `SelectMotor(m)` followed by `Stop`
    StopMotor(MotorId),
    /// `SelectMotor(m)` followed by `StepRate` (argument)
    RateMotor(MotorId),
}

const SELECT_BASE: u8 = 0x10;
const STEP_BASE: u8 = 0x20;
const STOP_BASE: u8 = 0x30;
const RATE_BASE: u8 = 0x40;

impl Opcode {
    /// Wire byte for this opcode
    pub fn to_byte(self) -> u8 {
        match self {
            Opcode::Nop => 0x00,
            Opcode::Sleep => 0x01,
            Opcode::Wake => 0x02,
            Opcode::Home => 0x03,
            Opcode::RequestVersion => 0x04,
            Opcode::DirectionCw => 0x05,
            Opcode::DirectionCcw => 0x06,
            Opcode::StepSize => 0x07,
            Opcode::StepRate => 0x08,
            Opcode::Steps => 0x09,
            Opcode::Stop => 0x0A,
            Opcode::HeaterTarget0 => 0x0B,
            Opcode::HeaterTarget1 => 0x0C,
            Opcode::SelectMotor(m) => SELECT_BASE + m.index(),
            Opcode::StepMotor(m) => STEP_BASE + m.index(),
            Opcode::StopMotor(m) => STOP_BASE + m.index(),
            Opcode::RateMotor(m) => RATE_BASE + m.index(),
        }
    }

    /// Parse a wire byte
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        let motor = MotorId::new(byte & 0x0F);
        let op = match (byte & 0xF0, motor) {
            (0x00, _) => match byte {
                0x00 => Some(Opcode::Nop),
                0x01 => Some(Opcode::Sleep),
                0x02 => Some(Opcode::Wake),
                0x03 => Some(Opcode::Home),
                0x04 => Some(Opcode::RequestVersion),
                0x05 => Some(Opcode::DirectionCw),
                0x06 => Some(Opcode::DirectionCcw),
                0x07 => Some(Opcode::StepSize),
                0x08 => Some(Opcode::StepRate),
                0x09 => Some(Opcode::Steps),
                0x0A => Some(Opcode::Stop),
                0x0B => Some(Opcode::HeaterTarget0),
                0x0C => Some(Opcode::HeaterTarget1),
                _ => None,
            },
            (SELECT_BASE, Some(m)) => Some(Opcode::SelectMotor(m)),
            (STEP_BASE, Some(m)) => Some(Opcode::StepMotor(m)),
            (STOP_BASE, Some(m)) => Some(Opcode::StopMotor(m)),
            (RATE_BASE, Some(m)) => Some(Opcode::RateMotor(m)),
            _ => None,
        };
        op.ok_or(ProtocolError::UnknownOpcode { byte })
    }

    /// Whether the opcode consumes the device's value register
    pub fn takes_argument(self) -> bool {
        match self {
            Opcode::StepSize
            | Opcode::StepRate
            | Opcode::Steps
            | Opcode::HeaterTarget0
            | Opcode::HeaterTarget1
            | Opcode::StepMotor(_)
            | Opcode::RateMotor(_) => true,
            Opcode::Nop
            | Opcode::Sleep
            | Opcode::Wake
            | Opcode::Home
            | Opcode::RequestVersion
            | Opcode::DirectionCw
            | Opcode::DirectionCcw
            | Opcode::Stop
            | Opcode::SelectMotor(_)
            | Opcode::StopMotor(_) => false,
        }
    }

    /// Opcode equivalent to `self` immediately followed by `next`, if the
    /// command set has one.
    ///
    /// Both arms list every variant so adding an opcode forces a decision
    /// here.
    pub fn coalesce(self, next: Opcode) -> Option<Opcode> {
        match self {
            Opcode::SelectMotor(m) => match next {
                Opcode::Steps => Some(Opcode::StepMotor(m)),
                Opcode::Stop => Some(Opcode::StopMotor(m)),
                Opcode::StepRate => Some(Opcode::RateMotor(m)),
                Opcode::Nop
                | Opcode::Sleep
                | Opcode::Wake
                | Opcode::Home
                | Opcode::RequestVersion
                | Opcode::DirectionCw
                | Opcode::DirectionCcw
                | Opcode::StepSize
                | Opcode::HeaterTarget0
                | Opcode::HeaterTarget1
                | Opcode::SelectMotor(_)
                | Opcode::StepMotor(_)
                | Opcode::StopMotor(_)
                | Opcode::RateMotor(_) => None,
            },
            Opcode::Nop
            | Opcode::Sleep
            | Opcode::Wake
            | Opcode::Home
            | Opcode::RequestVersion
            | Opcode::DirectionCw
            | Opcode::DirectionCcw
            | Opcode::StepSize
            | Opcode::StepRate
            | Opcode::Steps
            | Opcode::Stop
            | Opcode::HeaterTarget0
            | Opcode::HeaterTarget1
            | Opcode::StepMotor(_)
            | Opcode::StopMotor(_)
            | Opcode::RateMotor(_) => None,
        }
    }

    /// Inverse of [`Opcode::coalesce`]: the pair a combined opcode stands for
    pub fn split(self) -> Option<(Opcode, Opcode)> {
        match self {
            Opcode::StepMotor(m) => Some((Opcode::SelectMotor(m), Opcode::Steps)),
            Opcode::StopMotor(m) => Some((Opcode::SelectMotor(m), Opcode::Stop)),
            Opcode::RateMotor(m) => Some((Opcode::SelectMotor(m), Opcode::StepRate)),
            _ => None,
        }
    }

    /// Motor addressed by this opcode, if any
    pub fn motor(self) -> Option<MotorId> {
        match self {
            Opcode::SelectMotor(m)
            | Opcode::StepMotor(m)
            | Opcode::StopMotor(m)
            | Opcode::RateMotor(m) => Some(m),
            _ => None,
        }
    }

    /// Every opcode in the command set
    pub fn all() -> Vec<Opcode> {
        let mut ops = vec![
            Opcode::Nop,
            Opcode::Sleep,
            Opcode::Wake,
            Opcode::Home,
            Opcode::RequestVersion,
            Opcode::DirectionCw,
            Opcode::DirectionCcw,
            Opcode::StepSize,
            Opcode::StepRate,
            Opcode::Steps,
            Opcode::Stop,
            Opcode::HeaterTarget0,
            Opcode::HeaterTarget1,
        ];
        for m in MotorId::all() {
            ops.push(Opcode::SelectMotor(m));
            ops.push(Opcode::StepMotor(m));
            ops.push(Opcode::StopMotor(m));
            ops.push(Opcode::RateMotor(m));
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_bytes_are_unique_and_round_trip() {
        let mut seen = HashSet::new();
        for op in Opcode::all() {
            let byte = op.to_byte();
            assert!(byte < 0x7C, "{op:?} collides with value tags");
            assert!(seen.insert(byte), "duplicate byte for {op:?}");
            assert_eq!(Opcode::from_byte(byte), Ok(op));
        }
    }

    #[test]
    fn test_unknown_bytes_rejected() {
        for byte in [0x0D, 0x18, 0x1F, 0x50, 0x7C, 0x80, 0xFF] {
            assert_eq!(
                Opcode::from_byte(byte),
                Err(ProtocolError::UnknownOpcode { byte })
            );
        }
    }

    #[test]
    fn test_coalesce_table_is_complete_and_consistent() {
        let all = Opcode::all();
        let mut combined = 0;
        for &first in &all {
            for &second in &all {
                match first.coalesce(second) {
                    Some(op) => {
                        combined += 1;
                        assert!(!first.takes_argument());
                        assert_eq!(op.takes_argument(), second.takes_argument());
                        assert_eq!(op.split(), Some((first, second)));
                        assert_eq!(op.motor(), first.motor());
                    }
                    None => {
                        if let Some(pair) = Opcode::all().iter().find_map(|o| {
                            o.split().filter(|&(a, b)| a == first && b == second)
                        }) {
                            panic!("{pair:?} has a combined opcode but did not coalesce");
                        }
                    }
                }
            }
        }
        assert_eq!(combined, 3 * MAX_MOTORS as usize);
    }

    #[test]
    fn test_motor_ids() {
        assert_eq!(MotorId::extruder(0), Some(MotorId::FIRST_EXTRUDER));
        assert_eq!(MotorId::extruder(MAX_EXTRUDERS), None);
        assert_eq!(MotorId::extruder(2).and_then(|m| m.extruder_index()), Some(2));
        assert_eq!(MotorId::RADIAL.extruder_index(), None);
        assert!(MotorId::VERTICAL_RIGHT.is_linear());
        assert!(!MotorId::PLATFORM.is_linear());
        assert_eq!(MotorId::extruder(1).unwrap().to_string(), "extruder1");
    }
}
