//! Turns a loaded [`Config`] into the runtime types of the other crates

use polarprint_communication::{DiscoveryConfig, PacketSink, TransportConfig};
use polarprint_core::{MotionError, Result};
use polarprint_motion::{
    AccelerationRamp, ExtruderGeometry, MachineGeometry, MotionController, MotionParams,
    StepSize,
};
use polarprint_settings::{Config, MachineSettings, MotionSettings, TransportSettings};
use std::time::Duration;

/// Machine geometry from the `machine` section
pub fn machine_geometry(settings: &MachineSettings) -> Result<MachineGeometry> {
    let step_size =
        StepSize::from_divisor(settings.step_divisor).ok_or_else(|| MotionError::InvalidGeometry {
            reason: format!("no step size with divisor {}", settings.step_divisor),
        })?;
    let geometry = MachineGeometry {
        steps_per_revolution: settings.steps_per_revolution,
        platform_gearing: settings.platform_gearing,
        radial_mm_per_rotation: settings.radial_mm_per_rotation,
        vertical_mm_per_rotation: settings.vertical_mm_per_rotation,
        step_size,
        extruders: settings
            .extruders
            .iter()
            .map(|e| ExtruderGeometry {
                ring_offset: e.ring_offset,
                material: e.material,
            })
            .collect(),
        pressure_steps: settings.pressure_steps,
        ring_pitch_mm: settings.ring_pitch_mm,
        max_rings: settings.max_rings,
        layer_height_mm: settings.layer_height_mm,
    };
    geometry.validate()?;
    Ok(geometry)
}

/// Timing parameters from the `motion` section
pub fn motion_params(settings: &MotionSettings) -> MotionParams {
    MotionParams {
        tick_hz: settings.tick_hz,
        print_speed_mm_s: settings.print_speed_mm_s,
        extruder_steps_per_mm: settings.extruder_steps_per_mm,
        min_platform_ticks_per_step: settings.min_platform_ticks_per_step,
        travel_ticks_per_step: settings.travel_ticks_per_step,
        pressure_ticks_per_step: settings.pressure_ticks_per_step,
        sampling_scale: settings.sampling_scale,
        ramp: AccelerationRamp {
            start_ticks_per_step: settings.ramp_start_ticks_per_step,
            steps_per_stage: settings.ramp_steps_per_stage,
        },
    }
}

pub fn transport_config(settings: &TransportSettings) -> TransportConfig {
    TransportConfig {
        min_rx_headroom: settings.min_rx_headroom,
        idle_poll: Duration::from_millis(settings.idle_poll_ms),
        motor_queue_capacity: settings.motor_queue_capacity,
        ..TransportConfig::default()
    }
}

/// Discovery settings from the `connection` and `transport` sections
pub fn discovery_config(config: &Config) -> DiscoveryConfig {
    let connection = &config.connection;
    DiscoveryConfig {
        port: connection.fixed_port().map(str::to_string),
        timeout: Duration::from_millis(connection.timeout_ms),
        retries: connection.retries,
        expected_version: connection.expected_firmware_version,
        reprogram_retries: connection.reprogram_retries,
        transport: transport_config(&config.transport),
    }
}

/// Motion controller for `config` writing to `sink`
pub fn build_controller(config: &Config, sink: Box<dyn PacketSink>) -> Result<MotionController> {
    let geometry = machine_geometry(&config.machine)?;
    let params = motion_params(&config.motion);
    Ok(MotionController::new(geometry, params, sink)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polarprint_communication::MemorySink;

    #[test]
    fn test_default_config_matches_default_geometry() {
        let config = Config::default();
        assert_eq!(
            machine_geometry(&config.machine).unwrap(),
            MachineGeometry::default()
        );
        assert_eq!(motion_params(&config.motion), MotionParams::default());
    }

    #[test]
    fn test_default_transport() {
        let config = Config::default();
        let discovery = discovery_config(&config);
        assert_eq!(discovery.port, None);
        assert_eq!(discovery.timeout, Duration::from_secs(2));
        assert_eq!(discovery.transport.min_rx_headroom, 4096);
        assert_eq!(discovery.transport.idle_poll, Duration::from_secs(1));
    }

    #[test]
    fn test_fixed_port_passed_to_discovery() {
        let mut config = Config::default();
        config.connection.port = "/dev/ttyACM0".to_string();
        assert_eq!(
            discovery_config(&config).port.as_deref(),
            Some("/dev/ttyACM0")
        );
    }

    #[test]
    fn test_bad_divisor_is_a_motion_error() {
        let mut config = Config::default();
        config.machine.step_divisor = 5;
        assert!(matches!(
            machine_geometry(&config.machine),
            Err(polarprint_core::Error::Motion(MotionError::InvalidGeometry { .. }))
        ));
    }

    #[test]
    fn test_build_controller() {
        let controller = build_controller(&Config::default(), Box::new(MemorySink::new())).unwrap();
        assert_eq!(controller.working().platform_steps_per_rotation(), 4000);
        assert!(!controller.in_transaction());
    }
}
