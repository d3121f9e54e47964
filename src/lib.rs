//! # Polarprint
//!
//! Host-side driver for a polar-coordinate multi-extruder printer: the
//! build platform rotates, a radial carriage carries up to four
//! extruders and two vertical tracks raise the carriage between layers.
//!
//! ## Architecture
//!
//! Polarprint is organized as a workspace with multiple crates:
//!
//! 1. **polarprint-core** - Error taxonomy and shared type aliases
//! 2. **polarprint-communication** - Wire protocol, packet sinks, serial transport, discovery
//! 3. **polarprint-motion** - Arcs, ring layers, tick profiles, shadow diff, print jobs
//! 4. **polarprint-settings** - Configuration files
//! 5. **polarprint** - CLI binary that integrates all crates

pub mod setup;

pub use polarprint_core::{
    ConnectionError, Error, FirmwareError, MotionError, ProtocolError, Result,
};

pub use polarprint_communication::{
    list_ports, DeviceConnection, DeviceDiscovery, DeviceListener, DeviceStatus,
    DiscoveryConfig, FileSink, FirmwareProgrammer, MemorySink, MotorId, Opcode, PacketSink,
    SerialOpener, SerialPortInfo, SerialTransport, TransportConfig, TxPacket,
};

pub use polarprint_motion::{
    ConcentricRings, FixedOutlines, JobProgress, JobState, LayerSource, MachineGeometry,
    MotionController, MotionParams, OutlineSource, PrintJob, RingLayer, StepArc,
};

pub use polarprint_settings::{Config, SettingsError};

pub use setup::{build_controller, discovery_config, machine_geometry, motion_params};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support, `info` otherwise
/// - Thread names, so TX and RX worker lines are told apart
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
