//! Motor state records
//!
//! One record type covers every axis. What differs between the platform,
//! the linear tracks and the extruders lives in [`Kinematics`].
//!
//! Positions are stored in sixteenth-steps regardless of the current step
//! size, so changing micro-stepping never loses a fractional position.

use polarprint_communication::{MotorId, Opcode};
use serde::{Deserialize, Serialize};

/// Finest micro-step divisor the controller supports
pub const FINEST_DIVISOR: u32 = 16;

/// Micro-stepping mode
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum StepSize {
    /// Full steps
    Full,
    /// Half steps
    Half,
    /// Quarter steps
    Quarter,
    /// Eighth steps
    Eighth,
    /// Sixteenth steps
    #[default]
    Sixteenth,
}

impl StepSize {
    /// Micro-steps per full step
    pub fn divisor(self) -> u32 {
        match self {
            Self::Full => 1,
            Self::Half => 2,
            Self::Quarter => 4,
            Self::Eighth => 8,
            Self::Sixteenth => 16,
        }
    }

    /// Step size for a divisor of 1, 2, 4, 8 or 16
    pub fn from_divisor(divisor: u32) -> Option<Self> {
        match divisor {
            1 => Some(Self::Full),
            2 => Some(Self::Half),
            4 => Some(Self::Quarter),
            8 => Some(Self::Eighth),
            16 => Some(Self::Sixteenth),
            _ => None,
        }
    }

    /// Sixteenth-steps covered by one step at this size
    pub fn finest_units(self) -> i64 {
        i64::from(FINEST_DIVISOR / self.divisor())
    }
}

/// Rotation sense of a motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Clockwise; extrusion for extruders, outward for the radial track
    Cw,
    /// Counter-clockwise
    Ccw,
    /// Not yet known to the device
    #[default]
    Unknown,
}

impl Direction {
    /// The opposite sense; `Unknown` stays unknown
    pub fn reversed(self) -> Self {
        match self {
            Self::Cw => Self::Ccw,
            Self::Ccw => Self::Cw,
            Self::Unknown => Self::Unknown,
        }
    }

    /// Direction that moves by a signed step delta
    pub fn of_delta(delta: i64) -> Self {
        if delta < 0 {
            Self::Ccw
        } else {
            Self::Cw
        }
    }

    /// +1 for clockwise, -1 for counter-clockwise, 0 when unknown
    pub fn sign(self) -> i64 {
        match self {
            Self::Cw => 1,
            Self::Ccw => -1,
            Self::Unknown => 0,
        }
    }

    /// Opcode that sets this direction
    pub fn opcode(self) -> Option<Opcode> {
        match self {
            Self::Cw => Some(Opcode::DirectionCw),
            Self::Ccw => Some(Opcode::DirectionCcw),
            Self::Unknown => None,
        }
    }
}

/// Linear track state
#[derive(Debug, Clone, PartialEq)]
pub struct LinearState {
    /// Carriage travel per motor revolution
    pub mm_per_rotation: f64,
    /// Commanded carriage position
    pub position_mm: f64,
    /// Difference between the commanded and the stepped position
    pub error_mm: f64,
}

/// Extruder state
#[derive(Debug, Clone, PartialEq)]
pub struct ExtruderState {
    /// Fixed ring offset of the nozzle on the radial carriage
    pub ring_offset: i32,
    /// Ring under the nozzle for the current carriage position. Negative
    /// values lie across the platform centre.
    pub relative_ring: i32,
    /// Material loaded in this extruder
    pub material: u8,
    /// Backlash still to take up before extrusion starts
    pub pressure_required: u32,
    /// Full backlash budget
    pub pressure_limit: u32,
}

impl ExtruderState {
    /// Take up to `steps` of backlash; returns the steps consumed
    pub fn pressurize(&mut self, steps: u32) -> u32 {
        let taken = steps.min(self.pressure_required);
        self.pressure_required -= taken;
        taken
    }

    /// Release up to `steps` of backlash; returns the steps released
    pub fn depressurize(&mut self, steps: u32) -> u32 {
        let released = steps.min(self.pressure_limit - self.pressure_required);
        self.pressure_required += released;
        released
    }

    /// Backlash that can still be released
    pub fn pressure_owed(&self) -> u32 {
        self.pressure_limit - self.pressure_required
    }
}

/// Axis-specific state
#[derive(Debug, Clone, PartialEq)]
pub enum Kinematics {
    /// Build platform
    Rotary,
    /// Radial or vertical track
    Linear(LinearState),
    /// Material extruder
    Extruder(ExtruderState),
}

/// State of one motor
#[derive(Debug, Clone, PartialEq)]
pub struct Motor {
    /// Device slot
    pub id: MotorId,
    /// Full steps per motor revolution
    pub base_steps: u32,
    /// Motor revolutions per output revolution
    pub gearing: u32,
    /// Current micro-stepping
    pub step_size: StepSize,
    /// Current direction
    pub direction: Direction,
    /// Ticks per step, `None` when stopped
    pub step_rate: Option<u32>,
    /// Axis-specific state
    pub kinematics: Kinematics,
    position: i64,
}

impl Motor {
    /// Build platform motor
    pub fn rotary(id: MotorId, base_steps: u32, gearing: u32, step_size: StepSize) -> Self {
        Self::with_kinematics(id, base_steps, gearing, step_size, Kinematics::Rotary)
    }

    /// Linear track motor
    pub fn linear(id: MotorId, base_steps: u32, mm_per_rotation: f64, step_size: StepSize) -> Self {
        Self::with_kinematics(
            id,
            base_steps,
            1,
            step_size,
            Kinematics::Linear(LinearState {
                mm_per_rotation,
                position_mm: 0.0,
                error_mm: 0.0,
            }),
        )
    }

    /// Extruder motor, starting fully depressurized
    pub fn extruder(
        id: MotorId,
        base_steps: u32,
        step_size: StepSize,
        ring_offset: i32,
        material: u8,
        pressure_limit: u32,
    ) -> Self {
        Self::with_kinematics(
            id,
            base_steps,
            1,
            step_size,
            Kinematics::Extruder(ExtruderState {
                ring_offset,
                relative_ring: ring_offset,
                material,
                pressure_required: pressure_limit,
                pressure_limit,
            }),
        )
    }

    fn with_kinematics(
        id: MotorId,
        base_steps: u32,
        gearing: u32,
        step_size: StepSize,
        kinematics: Kinematics,
    ) -> Self {
        Self {
            id,
            base_steps,
            gearing: gearing.max(1),
            step_size,
            direction: Direction::Unknown,
            step_rate: None,
            kinematics,
            position: 0,
        }
    }

    /// Steps per output revolution at the current step size
    pub fn steps_per_rotation(&self) -> i64 {
        i64::from(self.base_steps) * i64::from(self.gearing) * i64::from(self.step_size.divisor())
    }

    /// Position in steps at the current step size, rounded toward negative
    /// infinity
    pub fn position(&self) -> i64 {
        self.position.div_euclid(self.step_size.finest_units())
    }

    /// Position in sixteenth-steps
    pub fn position_finest(&self) -> i64 {
        self.position
    }

    /// Position within one revolution, in `[0, steps_per_rotation)`
    pub fn angular_position(&self) -> i64 {
        self.position().rem_euclid(self.steps_per_rotation())
    }

    /// Move by `steps` at the current step size; negative is counter-clockwise
    pub fn advance(&mut self, steps: i64) {
        self.position += steps * self.step_size.finest_units();
    }

    /// Switch micro-stepping without disturbing the stored position
    pub fn set_step_size(&mut self, step_size: StepSize) {
        self.step_size = step_size;
    }

    /// Reset the position to zero, e.g. after homing
    pub fn zero(&mut self) {
        self.position = 0;
        if let Kinematics::Linear(linear) = &mut self.kinematics {
            linear.position_mm = 0.0;
            linear.error_mm = 0.0;
        }
    }

    /// Extruder state, if this is an extruder
    pub fn extruder_state(&self) -> Option<&ExtruderState> {
        match &self.kinematics {
            Kinematics::Extruder(state) => Some(state),
            _ => None,
        }
    }

    /// Mutable extruder state, if this is an extruder
    pub fn extruder_state_mut(&mut self) -> Option<&mut ExtruderState> {
        match &mut self.kinematics {
            Kinematics::Extruder(state) => Some(state),
            _ => None,
        }
    }

    /// Linear track state, if this is a track motor
    pub fn linear_state(&self) -> Option<&LinearState> {
        match &self.kinematics {
            Kinematics::Linear(linear) => Some(linear),
            _ => None,
        }
    }

    /// Carriage travel of one step, for linear tracks
    pub fn mm_per_step(&self) -> Option<f64> {
        match &self.kinematics {
            Kinematics::Linear(linear) => {
                Some(linear.mm_per_rotation / self.steps_per_rotation() as f64)
            }
            _ => None,
        }
    }

    /// Signed steps that move a linear track by `delta_mm`
    ///
    /// The rounding error is carried forward so repeated moves do not
    /// drift; afterwards `|error| < one step`.
    pub fn plan_linear_move(&mut self, delta_mm: f64) -> Option<i64> {
        let mm_per_step = self.mm_per_step()?;
        let Kinematics::Linear(linear) = &mut self.kinematics else {
            return None;
        };
        let wanted = delta_mm + linear.error_mm;
        let steps = (wanted / mm_per_step).round() as i64;
        linear.error_mm = wanted - steps as f64 * mm_per_step;
        linear.position_mm += delta_mm;
        debug_assert!(linear.error_mm.abs() < mm_per_step);
        Some(steps)
    }
}
