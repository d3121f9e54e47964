//! Aggregate printer state and the shadow diff
//!
//! Two `Printer`s exist during a print. The working copy is what the
//! planner believes after its moves; the shadow copy mirrors what the
//! device has been told. The shadow is only changed by [`Printer::update_state`]
//! and the packet helpers next to it, so comparing it with a target profile
//! yields exactly the bytes the device still needs.

use crate::geometry::MachineGeometry;
use crate::motor::{Direction, Kinematics, Motor};
use crate::tick_profile::TickProfile;
use polarprint_communication::{MotorId, Opcode, TxPacket};
use polarprint_core::MotionError;

/// Every motor of the machine plus the device's command-stream state
#[derive(Debug, Clone, PartialEq)]
pub struct Printer {
    motors: Vec<Motor>,
    selected: Option<MotorId>,
    last_packet: Option<TxPacket>,
    last_value: Option<u32>,
}

impl Printer {
    /// Printer for `geometry`
    pub fn new(geometry: &MachineGeometry) -> Result<Self, MotionError> {
        geometry.validate()?;
        let steps = geometry.steps_per_revolution;
        let size = geometry.step_size;

        let mut motors = vec![
            Motor::rotary(MotorId::PLATFORM, steps, geometry.platform_gearing, size),
            Motor::linear(MotorId::RADIAL, steps, geometry.radial_mm_per_rotation, size),
            Motor::linear(
                MotorId::VERTICAL_LEFT,
                steps,
                geometry.vertical_mm_per_rotation,
                size,
            ),
            Motor::linear(
                MotorId::VERTICAL_RIGHT,
                steps,
                geometry.vertical_mm_per_rotation,
                size,
            ),
        ];
        for (n, extruder) in geometry.extruders.iter().enumerate() {
            let id = u8::try_from(n)
                .ok()
                .and_then(MotorId::extruder)
                .ok_or_else(|| MotionError::InvalidGeometry {
                    reason: format!("no motor slot for extruder {}", n),
                })?;
            motors.push(Motor::extruder(
                id,
                steps,
                size,
                extruder.ring_offset,
                extruder.material,
                geometry.pressure_steps,
            ));
        }

        Ok(Self {
            motors,
            selected: None,
            last_packet: None,
            last_value: None,
        })
    }

    /// Motor in slot `id`
    pub fn motor(&self, id: MotorId) -> Result<&Motor, MotionError> {
        self.motors
            .get(usize::from(id.index()))
            .ok_or(MotionError::UnknownMotor { id: id.index() })
    }

    /// Mutable motor in slot `id`
    pub fn motor_mut(&mut self, id: MotorId) -> Result<&mut Motor, MotionError> {
        self.motors
            .get_mut(usize::from(id.index()))
            .ok_or(MotionError::UnknownMotor { id: id.index() })
    }

    /// All motors in slot order
    pub fn motors(&self) -> &[Motor] {
        &self.motors
    }

    /// Extruder motors in slot order
    pub fn extruders(&self) -> impl Iterator<Item = &Motor> {
        self.motors
            .iter()
            .filter(|m| matches!(m.kinematics, Kinematics::Extruder(_)))
    }

    /// Ids of the extruder motors
    pub fn extruder_ids(&self) -> Vec<MotorId> {
        self.extruders().map(|m| m.id).collect()
    }

    /// Platform steps per revolution at the current step size
    pub fn platform_steps_per_rotation(&self) -> i64 {
        self.motors[usize::from(MotorId::PLATFORM.index())].steps_per_rotation()
    }

    /// Move every extruder's relative ring to follow a carriage at `ring`
    pub fn set_carriage_ring(&mut self, ring: i32) {
        for motor in &mut self.motors {
            if let Some(state) = motor.extruder_state_mut() {
                state.relative_ring = state.ring_offset + ring;
            }
        }
    }

    /// Zero every position, e.g. after homing
    pub fn zero_positions(&mut self) {
        for motor in &mut self.motors {
            motor.zero();
        }
    }

    /// Motor the device currently addresses
    pub fn selected(&self) -> Option<MotorId> {
        self.selected
    }

    /// Most recent packet appended by this printer
    pub fn last_packet(&self) -> Option<TxPacket> {
        self.last_packet
    }

    /// Value the device holds in its value register
    pub fn last_value(&self) -> Option<u32> {
        self.last_value
    }

    /// Forget everything the device was told, e.g. after a Sleep/Wake cycle
    /// or homing
    pub fn invalidate(&mut self) {
        for motor in &mut self.motors {
            motor.direction = Direction::Unknown;
            motor.step_rate = None;
        }
        self.selected = None;
        self.last_packet = None;
        self.last_value = None;
    }

    /// Append `opcode`, eliding its value token when the device already
    /// holds `argument` and folding it into a preceding motor select when
    /// the command set allows
    pub fn send(&mut self, opcode: Opcode, argument: Option<u32>, out: &mut Vec<TxPacket>) {
        debug_assert_eq!(opcode.takes_argument(), argument.is_some());
        let value = match argument {
            Some(arg) if self.last_value == Some(arg) => None,
            Some(arg) => {
                self.last_value = Some(arg);
                Some(arg)
            }
            None => None,
        };

        let merged = out
            .last()
            .filter(|last| last.value.is_none())
            .and_then(|last| last.opcode.coalesce(opcode));
        let packet = match merged {
            Some(combined) => {
                out.pop();
                TxPacket {
                    opcode: combined,
                    value,
                }
            }
            None => TxPacket { opcode, value },
        };

        if let Some(motor) = packet.opcode.motor() {
            self.selected = Some(motor);
        }
        out.push(packet);
        self.last_packet = Some(packet);
    }

    fn select(&mut self, motor: MotorId, out: &mut Vec<TxPacket>) {
        if self.selected != Some(motor) {
            self.send(Opcode::SelectMotor(motor), None, out);
        }
    }

    /// Bring the device's view of `profile.motor` in line with the profile,
    /// emitting only what differs
    pub fn update_state(
        &mut self,
        profile: &TickProfile,
        out: &mut Vec<TxPacket>,
    ) -> Result<(), MotionError> {
        let id = profile.motor;
        let current = self.motor(id)?.clone();
        self.select(id, out);

        if !profile.is_idle() {
            if profile.direction != current.direction {
                if let Some(opcode) = profile.direction.opcode() {
                    self.send(opcode, None, out);
                }
            }
            if profile.step_size != current.step_size {
                self.send(
                    Opcode::StepSize,
                    Some(profile.step_size.divisor()),
                    out,
                );
            }
        }
        match profile.step_rate {
            Some(rate) if current.step_rate != Some(rate) => {
                self.send(Opcode::StepRate, Some(rate), out);
            }
            None if current.step_rate.is_some() => self.send(Opcode::Stop, None, out),
            _ => {}
        }

        let motor = self.motor_mut(id)?;
        if !profile.is_idle() {
            if profile.direction != Direction::Unknown {
                motor.direction = profile.direction;
            }
            motor.set_step_size(profile.step_size);
        }
        motor.step_rate = profile.step_rate;

        debug_assert!(
            profile.is_idle()
                || (motor.step_size == profile.step_size
                    && (profile.direction == Direction::Unknown
                        || motor.direction == profile.direction)),
            "shadow does not match profile"
        );
        debug_assert_eq!(motor.step_rate, profile.step_rate);
        Ok(())
    }

    /// Run `count` pulses, or `count` idle ticks while stopped, on `motor`
    ///
    /// Counts beyond the 32-bit value range are sent in several packets.
    pub fn send_steps(
        &mut self,
        motor: MotorId,
        count: u64,
        out: &mut Vec<TxPacket>,
    ) -> Result<(), MotionError> {
        let (running, sign) = {
            let m = self.motor(motor)?;
            (m.step_rate.is_some(), m.direction.sign())
        };
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(u64::from(u32::MAX));
            self.select(motor, out);
            self.send(Opcode::Steps, Some(chunk as u32), out);
            remaining -= chunk;
        }
        if running {
            self.motor_mut(motor)?.advance(count as i64 * sign);
        }
        Ok(())
    }
}
