//! Configuration file handling
//!
//! A [`Config`] groups the connection, machine, motion and transport
//! sections. Files are JSON or TOML, chosen by extension, and every load
//! and save is validated.

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Port name that asks discovery to probe every candidate port
pub const AUTO_PORT: &str = "Auto";

/// Serial connection and device discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port name, or "Auto" to probe every candidate
    pub port: String,
    pub baud_rate: u32,
    /// How long discovery waits for a status or version frame
    pub timeout_ms: u64,
    /// Open attempts per port
    pub retries: u32,
    /// Firmware version the host speaks
    pub expected_firmware_version: u16,
    /// Programming attempts after a version mismatch
    pub reprogram_retries: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: AUTO_PORT.to_string(),
            baud_rate: 115_200,
            timeout_ms: 2000,
            retries: 3,
            expected_firmware_version: 1,
            reprogram_retries: 2,
        }
    }
}

impl ConnectionSettings {
    /// Fixed port, or `None` when discovery should probe
    pub fn fixed_port(&self) -> Option<&str> {
        let port = self.port.trim();
        if port.is_empty() || port.eq_ignore_ascii_case(AUTO_PORT) {
            None
        } else {
            Some(port)
        }
    }
}

/// One extruder slot on the radial carriage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtruderSettings {
    /// Ring offset of the nozzle from the carriage reference
    pub ring_offset: i32,
    /// Loaded material id, 1 to 255
    pub material: u8,
}

/// Mechanical description of the printer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineSettings {
    pub steps_per_revolution: u32,
    pub platform_gearing: u32,
    pub radial_mm_per_rotation: f64,
    pub vertical_mm_per_rotation: f64,
    /// Micro-step divisor: 1, 2, 4, 8 or 16
    pub step_divisor: u32,
    pub pressure_steps: u32,
    pub ring_pitch_mm: f64,
    pub max_rings: usize,
    pub layer_height_mm: f64,
    pub extruders: Vec<ExtruderSettings>,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            steps_per_revolution: 200,
            platform_gearing: 5,
            radial_mm_per_rotation: 8.0,
            vertical_mm_per_rotation: 2.0,
            step_divisor: 4,
            pressure_steps: 64,
            ring_pitch_mm: 0.5,
            max_rings: 200,
            layer_height_mm: 0.3,
            extruders: vec![
                ExtruderSettings {
                    ring_offset: 0,
                    material: 1,
                },
                ExtruderSettings {
                    ring_offset: -8,
                    material: 2,
                },
            ],
        }
    }
}

/// Timing of printing and travel moves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    pub tick_hz: u32,
    pub print_speed_mm_s: f64,
    pub extruder_steps_per_mm: f64,
    pub min_platform_ticks_per_step: u32,
    pub travel_ticks_per_step: u32,
    pub pressure_ticks_per_step: u32,
    pub sampling_scale: u32,
    pub ramp_start_ticks_per_step: u32,
    pub ramp_steps_per_stage: u32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            tick_hz: 20_000,
            print_speed_mm_s: 20.0,
            extruder_steps_per_mm: 40.0,
            min_platform_ticks_per_step: 4,
            travel_ticks_per_step: 20,
            pressure_ticks_per_step: 10,
            sampling_scale: 8,
            ramp_start_ticks_per_step: 400,
            ramp_steps_per_stage: 32,
        }
    }
}

/// Serial transport flow control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// TX holds off while the device reports less RX space than this
    pub min_rx_headroom: u16,
    pub idle_poll_ms: u64,
    /// Motor queue size the device reports when empty
    pub motor_queue_capacity: u16,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            min_rx_headroom: 4096,
            idle_poll_ms: 1000,
            motor_queue_capacity: 256,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionSettings,
    pub machine: MachineSettings,
    pub motion: MotionSettings,
    pub transport: TransportSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Format::Json),
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(Format::Toml),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

impl Config {
    /// Default location: `<config dir>/polarprint/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            SettingsError::ConfigDirectory("platform has no configuration directory".to_string())
        })?;
        Ok(dir.join("polarprint").join("config.toml"))
    }

    /// Load and validate a JSON or TOML file
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::from_path(path)?;
        let content = fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;
        let config: Config = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };
        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Validate and write to a JSON or TOML file, creating parent
    /// directories as needed
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        let format = Format::from_path(path)?;
        self.validate()?;
        let content = match format {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e))
            })?;
        }
        fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Load `path` if given; otherwise the default file when it exists,
    /// falling back to built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> SettingsResult<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match Self::default_path() {
            Ok(default) if default.exists() => Self::load_from_file(&default),
            Ok(_) => {
                tracing::debug!("No configuration file; using defaults");
                Ok(Self::default())
            }
            Err(e) => {
                tracing::warn!("{}; using default configuration", e);
                Ok(Self::default())
            }
        }
    }

    /// Check every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.validate_connection()?;
        self.validate_machine()?;
        self.validate_motion()?;
        self.validate_transport()
    }

    fn validate_connection(&self) -> ConfigResult<()> {
        let c = &self.connection;
        if c.baud_rate == 0 {
            return Err(ConfigError::out_of_range("connection.baud_rate", c.baud_rate));
        }
        if c.timeout_ms == 0 {
            return Err(ConfigError::out_of_range("connection.timeout_ms", c.timeout_ms));
        }
        if c.retries == 0 {
            return Err(ConfigError::out_of_range("connection.retries", c.retries));
        }
        Ok(())
    }

    fn validate_machine(&self) -> ConfigResult<()> {
        let m = &self.machine;
        if m.steps_per_revolution == 0 {
            return Err(ConfigError::out_of_range(
                "machine.steps_per_revolution",
                m.steps_per_revolution,
            ));
        }
        if m.platform_gearing == 0 {
            return Err(ConfigError::out_of_range(
                "machine.platform_gearing",
                m.platform_gearing,
            ));
        }
        if !matches!(m.step_divisor, 1 | 2 | 4 | 8 | 16) {
            return Err(ConfigError::out_of_range(
                "machine.step_divisor",
                m.step_divisor,
            ));
        }
        for (key, value) in [
            ("machine.radial_mm_per_rotation", m.radial_mm_per_rotation),
            ("machine.vertical_mm_per_rotation", m.vertical_mm_per_rotation),
            ("machine.ring_pitch_mm", m.ring_pitch_mm),
            ("machine.layer_height_mm", m.layer_height_mm),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::out_of_range(key, value));
            }
        }
        if m.max_rings == 0 {
            return Err(ConfigError::out_of_range("machine.max_rings", m.max_rings));
        }
        if m.extruders.is_empty() || m.extruders.len() > 4 {
            return Err(ConfigError::out_of_range(
                "machine.extruders",
                format!("{} extruders", m.extruders.len()),
            ));
        }
        if let Some(e) = m.extruders.iter().find(|e| e.material == 0) {
            return Err(ConfigError::out_of_range(
                "machine.extruders.material",
                e.material,
            ));
        }
        if let Some(e) = m
            .extruders
            .iter()
            .find(|e| e.ring_offset.unsigned_abs() as usize >= m.max_rings)
        {
            return Err(ConfigError::Conflict {
                first: "machine.extruders.ring_offset".to_string(),
                second: "machine.max_rings".to_string(),
                reason: format!("offset {} is beyond the platform", e.ring_offset),
            });
        }
        Ok(())
    }

    fn validate_motion(&self) -> ConfigResult<()> {
        let m = &self.motion;
        if m.tick_hz == 0 {
            return Err(ConfigError::out_of_range("motion.tick_hz", m.tick_hz));
        }
        for (key, value) in [
            ("motion.print_speed_mm_s", m.print_speed_mm_s),
            ("motion.extruder_steps_per_mm", m.extruder_steps_per_mm),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::out_of_range(key, value));
            }
        }
        for (key, value) in [
            (
                "motion.min_platform_ticks_per_step",
                m.min_platform_ticks_per_step,
            ),
            ("motion.travel_ticks_per_step", m.travel_ticks_per_step),
            ("motion.pressure_ticks_per_step", m.pressure_ticks_per_step),
            ("motion.sampling_scale", m.sampling_scale),
            ("motion.ramp_steps_per_stage", m.ramp_steps_per_stage),
        ] {
            if value == 0 {
                return Err(ConfigError::out_of_range(key, value));
            }
        }
        if m.ramp_start_ticks_per_step < m.travel_ticks_per_step {
            return Err(ConfigError::Conflict {
                first: "motion.ramp_start_ticks_per_step".to_string(),
                second: "motion.travel_ticks_per_step".to_string(),
                reason: "the ramp must start slower than the cruise rate".to_string(),
            });
        }
        Ok(())
    }

    fn validate_transport(&self) -> ConfigResult<()> {
        let t = &self.transport;
        if t.idle_poll_ms == 0 {
            return Err(ConfigError::out_of_range(
                "transport.idle_poll_ms",
                t.idle_poll_ms,
            ));
        }
        if t.motor_queue_capacity == 0 {
            return Err(ConfigError::out_of_range(
                "transport.motor_queue_capacity",
                t.motor_queue_capacity,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_fixed_port() {
        let mut connection = ConnectionSettings::default();
        assert_eq!(connection.fixed_port(), None);
        connection.port = "auto".to_string();
        assert_eq!(connection.fixed_port(), None);
        connection.port = "/dev/ttyACM0".to_string();
        assert_eq!(connection.fixed_port(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn test_step_divisor_must_be_a_power_of_two() {
        let mut config = Config::default();
        config.machine.step_divisor = 3;
        assert_eq!(
            config.validate(),
            Err(ConfigError::out_of_range("machine.step_divisor", 3))
        );
    }

    #[test]
    fn test_empty_material_rejected() {
        let mut config = Config::default();
        config.machine.extruders[1].material = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_offset_beyond_platform_conflicts() {
        let mut config = Config::default();
        config.machine.max_rings = 8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Conflict { .. })
        ));
    }

    #[test]
    fn test_ramp_must_start_slower_than_cruise() {
        let mut config = Config::default();
        config.motion.ramp_start_ticks_per_step = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Conflict { .. })
        ));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_path(Path::new("a.json")), Ok(Format::Json));
        assert_eq!(Format::from_path(Path::new("a.TOML")), Ok(Format::Toml));
        assert!(Format::from_path(Path::new("a.yaml")).is_err());
        assert!(Format::from_path(Path::new("config")).is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            port = "/dev/ttyUSB1"

            [machine]
            max_rings = 120
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.port, "/dev/ttyUSB1");
        assert_eq!(config.connection.baud_rate, 115_200);
        assert_eq!(config.machine.max_rings, 120);
        assert_eq!(config.machine.extruders.len(), 2);
        assert_eq!(config.motion, MotionSettings::default());
    }
}
