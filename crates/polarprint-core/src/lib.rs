//! # Polarprint Core
//!
//! Error taxonomy and shared-state aliases used by every polarprint crate.

pub mod error;
pub mod types;

pub use error::{ConnectionError, Error, FirmwareError, MotionError, ProtocolError, Result};
pub use types::{thread_safe, ThreadSafe};
