//! Polarprint Settings Crate
//!
//! Machine geometry, motion timing, connection and transport settings,
//! stored as JSON or TOML in the platform configuration directory.

pub mod config;
pub mod error;

pub use config::{
    Config, ConnectionSettings, ExtruderSettings, MachineSettings, MotionSettings,
    TransportSettings, AUTO_PORT,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
