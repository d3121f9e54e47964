//! # Polarprint Motion
//!
//! Compiles layer geometry into device packets: rings are sampled into
//! arcs, arcs are claimed by extruders and normalized into each
//! extruder's frame, the platform's covering rotation is chosen, arcs
//! become tick profiles and the profiles are diffed against a shadow of
//! the device before being handed to a packet sink.

pub mod arc;
pub mod controller;
pub mod covering;
pub mod geometry;
pub mod job;
pub mod motor;
pub mod outline;
pub mod printer;
pub mod ring_layer;
pub mod scheduler;
pub mod source;
pub mod tick_profile;

pub use arc::{compare_arcs, sort_arcs, total_length, StepArc, EMPTY_MATERIAL};
pub use controller::MotionController;
pub use covering::{find_covering_rotation, transform_arcs, Approach, CoveringRotation};
pub use geometry::{AccelerationRamp, ExtruderGeometry, MachineGeometry, MotionParams};
pub use job::{carriage_positions, JobProgress, JobState, PrintJob};
pub use motor::{Direction, ExtruderState, Kinematics, LinearState, Motor, StepSize};
pub use outline::trace_outlines;
pub use printer::Printer;
pub use ring_layer::{normalize_arcs, sample_ring, ExtruderView, RingLayer};
pub use scheduler::CommandScheduler;
pub use source::{
    ConcentricRings, FixedOutlines, GridStack, LayerSource, MaterialGrid, OutlineSource,
    PolarPoint, Polyline, RingBand,
};
pub use tick_profile::{
    complete_depressurization, convert, convert_exact, convert_extruder, convert_ramped,
    ExtruderConversion, ExtruderTiming, TickProfile,
};
