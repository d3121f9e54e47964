//! Machine geometry and motion parameters

use crate::motor::StepSize;
use polarprint_core::MotionError;

/// One extruder on the radial carriage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtruderGeometry {
    /// Ring offset of the nozzle from the carriage reference
    pub ring_offset: i32,
    /// Material id loaded (non-zero)
    pub material: u8,
}

/// Mechanical description of the printer
#[derive(Debug, Clone, PartialEq)]
pub struct MachineGeometry {
    /// Full steps per motor revolution
    pub steps_per_revolution: u32,
    /// Platform motor revolutions per platform revolution
    pub platform_gearing: u32,
    /// Radial carriage travel per motor revolution
    pub radial_mm_per_rotation: f64,
    /// Vertical carriage travel per motor revolution
    pub vertical_mm_per_rotation: f64,
    /// Micro-stepping used for every motor
    pub step_size: StepSize,
    /// Extruders in slot order
    pub extruders: Vec<ExtruderGeometry>,
    /// Backlash budget of each extruder, in steps
    pub pressure_steps: u32,
    /// Radial width of one ring
    pub ring_pitch_mm: f64,
    /// Rings from the centre to the platform edge
    pub max_rings: usize,
    /// Height of one print layer
    pub layer_height_mm: f64,
}

impl Default for MachineGeometry {
    fn default() -> Self {
        Self {
            steps_per_revolution: 200,
            platform_gearing: 5,
            radial_mm_per_rotation: 8.0,
            vertical_mm_per_rotation: 2.0,
            step_size: StepSize::Quarter,
            extruders: vec![
                ExtruderGeometry {
                    ring_offset: 0,
                    material: 1,
                },
                ExtruderGeometry {
                    ring_offset: -8,
                    material: 2,
                },
            ],
            pressure_steps: 64,
            ring_pitch_mm: 0.5,
            max_rings: 200,
            layer_height_mm: 0.3,
        }
    }
}

impl MachineGeometry {
    /// Check that the description is usable
    pub fn validate(&self) -> Result<(), MotionError> {
        let invalid = |reason: &str| {
            Err(MotionError::InvalidGeometry {
                reason: reason.to_string(),
            })
        };
        if self.steps_per_revolution == 0 || self.platform_gearing == 0 {
            return invalid("steps per revolution and platform gearing must be > 0");
        }
        if !(self.radial_mm_per_rotation > 0.0 && self.vertical_mm_per_rotation > 0.0) {
            return invalid("track travel per rotation must be > 0");
        }
        if !(self.ring_pitch_mm > 0.0 && self.layer_height_mm > 0.0) {
            return invalid("ring pitch and layer height must be > 0");
        }
        if self.extruders.is_empty()
            || self.extruders.len() > usize::from(polarprint_communication::MAX_EXTRUDERS)
        {
            return invalid("between 1 and 4 extruders are supported");
        }
        if self.extruders.iter().any(|e| e.material == 0) {
            return invalid("material 0 means empty and cannot be loaded");
        }
        if self.max_rings == 0 {
            return invalid("max rings must be > 0");
        }
        Ok(())
    }

    /// Platform steps per revolution
    pub fn platform_steps_per_rotation(&self) -> i64 {
        i64::from(self.steps_per_revolution)
            * i64::from(self.platform_gearing)
            * i64::from(self.step_size.divisor())
    }

    /// Radius of the centre line of `ring`
    pub fn ring_radius_mm(&self, ring: usize) -> f64 {
        (ring as f64 + 0.5) * self.ring_pitch_mm
    }
}

/// Staged acceleration for travel moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelerationRamp {
    /// Ticks per step of the first stage
    pub start_ticks_per_step: u32,
    /// Steps spent in each stage
    pub steps_per_stage: u32,
}

impl Default for AccelerationRamp {
    fn default() -> Self {
        Self {
            start_ticks_per_step: 400,
            steps_per_stage: 32,
        }
    }
}

/// Timing parameters
#[derive(Debug, Clone, PartialEq)]
pub struct MotionParams {
    /// Device clock
    pub tick_hz: u32,
    /// Nozzle speed over the platform surface
    pub print_speed_mm_s: f64,
    /// Extruder steps per mm of deposited bead
    pub extruder_steps_per_mm: f64,
    /// Fastest platform rate allowed while printing
    pub min_platform_ticks_per_step: u32,
    /// Cruise rate for travel moves
    pub travel_ticks_per_step: u32,
    /// Rate for pressurize and depressurize moves
    pub pressure_ticks_per_step: u32,
    /// Angular samples per ring index
    pub sampling_scale: u32,
    /// Travel acceleration
    pub ramp: AccelerationRamp,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            tick_hz: 20_000,
            print_speed_mm_s: 20.0,
            extruder_steps_per_mm: 40.0,
            min_platform_ticks_per_step: 4,
            travel_ticks_per_step: 20,
            pressure_ticks_per_step: 10,
            sampling_scale: 8,
            ramp: AccelerationRamp::default(),
        }
    }
}

impl MotionParams {
    /// Check that the parameters are usable
    pub fn validate(&self) -> Result<(), MotionError> {
        let invalid = |reason: &str| {
            Err(MotionError::InvalidGeometry {
                reason: reason.to_string(),
            })
        };
        if self.tick_hz == 0 {
            return invalid("tick rate must be > 0");
        }
        if !(self.print_speed_mm_s > 0.0 && self.extruder_steps_per_mm > 0.0) {
            return invalid("print speed and extruder steps per mm must be > 0");
        }
        if self.min_platform_ticks_per_step == 0
            || self.travel_ticks_per_step == 0
            || self.pressure_ticks_per_step == 0
        {
            return invalid("rates must be at least one tick per step");
        }
        if self.sampling_scale == 0 {
            return invalid("sampling scale must be > 0");
        }
        Ok(())
    }

    /// Platform ticks per step that move `ring` at the print speed
    pub fn platform_ticks_per_step(&self, geometry: &MachineGeometry, ring: usize) -> u32 {
        let circumference = 2.0 * std::f64::consts::PI * geometry.ring_radius_mm(ring);
        let mm_per_step = circumference / geometry.platform_steps_per_rotation() as f64;
        let ticks = f64::from(self.tick_hz) * mm_per_step / self.print_speed_mm_s;
        (ticks.round() as u32).max(self.min_platform_ticks_per_step)
    }

    /// Extruder ticks per step that lay bead at the print speed
    pub fn extruder_ticks_per_step(&self) -> u32 {
        let ticks = f64::from(self.tick_hz) / (self.print_speed_mm_s * self.extruder_steps_per_mm);
        (ticks.round() as u32).max(1)
    }

    /// Ticks needed to cover `mm` at the print speed
    pub fn ticks_for_distance(&self, mm: f64) -> u64 {
        (mm / self.print_speed_mm_s * f64::from(self.tick_hz)).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(MachineGeometry::default().validate().is_ok());
        assert!(MotionParams::default().validate().is_ok());
    }

    #[test]
    fn test_platform_rate_slows_toward_centre_and_clamps() {
        let geometry = MachineGeometry::default();
        let params = MotionParams::default();
        assert_eq!(geometry.platform_steps_per_rotation(), 4000);
        let inner = params.platform_ticks_per_step(&geometry, 0);
        let outer = params.platform_ticks_per_step(&geometry, 150);
        assert_eq!(inner, params.min_platform_ticks_per_step);
        assert!(outer > inner);
    }

    #[test]
    fn test_extruder_rate() {
        let params = MotionParams::default();
        // 20000 / (20 * 40)
        assert_eq!(params.extruder_ticks_per_step(), 25);
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let mut geometry = MachineGeometry::default();
        geometry.extruders.clear();
        assert!(geometry.validate().is_err());
        let mut geometry = MachineGeometry::default();
        geometry.extruders[0].material = 0;
        assert!(geometry.validate().is_err());
    }
}
