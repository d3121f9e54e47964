//! Print job state machine
//!
//! A print is driven one unit of work at a time by [`PrintJob::tick`], so
//! the caller decides how often to run it and can stop between any two
//! steps. Each tick does at most one of: home, sample a layer, print one
//! carriage position, trace the layer's outlines, or finish the layer.

use crate::controller::MotionController;
use crate::outline::trace_outlines;
use crate::ring_layer::RingLayer;
use crate::source::{LayerSource, OutlineSource};
use polarprint_core::Result;
use std::collections::VecDeque;

/// Where a job is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Home the machine
    Homing,
    /// Sample the current layer into rings
    SampleLayer,
    /// Print the next carriage position
    PrintRings,
    /// Trace the layer's outlines
    TraceOutlines,
    /// Depressurize and raise the tracks
    FinishLayer,
    /// All layers printed
    Finished,
}

/// Snapshot reported after every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub state: JobState,
    /// Layer being printed, zero-based
    pub layer: usize,
    pub layer_count: usize,
    /// Packets sent by this job
    pub packets: usize,
}

impl JobProgress {
    /// Completed share of the job in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        if self.state == JobState::Finished || self.layer_count == 0 {
            1.0
        } else {
            self.layer as f64 / self.layer_count as f64
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == JobState::Finished
    }
}

/// A print in progress
pub struct PrintJob {
    layers: Box<dyn LayerSource>,
    outlines: Option<Box<dyn OutlineSource>>,
    state: JobState,
    layer: usize,
    rings: Option<RingLayer>,
    positions: VecDeque<i32>,
    packets: usize,
}

impl PrintJob {
    pub fn new(layers: Box<dyn LayerSource>) -> Self {
        Self {
            layers,
            outlines: None,
            state: JobState::Homing,
            layer: 0,
            rings: None,
            positions: VecDeque::new(),
            packets: 0,
        }
    }

    /// Trace outlines from `outlines` after each layer's rings
    pub fn with_outlines(mut self, outlines: Box<dyn OutlineSource>) -> Self {
        self.outlines = Some(outlines);
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress {
            state: self.state,
            layer: self.layer,
            layer_count: self.layers.layer_count(),
            packets: self.packets,
        }
    }

    /// Do one unit of work
    pub fn tick(&mut self, controller: &mut MotionController) -> Result<JobProgress> {
        match self.state {
            JobState::Homing => {
                controller.home()?;
                self.state = self.next_layer_state();
            }
            JobState::SampleLayer => {
                let layer = self.layer;
                let source = &self.layers;
                let rings = RingLayer::sample(
                    controller.geometry(),
                    controller.params().sampling_scale,
                    |x, y| source.material_at(layer, x, y),
                );
                self.positions = carriage_positions(&rings, controller).into();
                tracing::info!(
                    "Layer {}: {} carriage positions",
                    layer + 1,
                    self.positions.len()
                );
                self.rings = Some(rings);
                self.state = JobState::PrintRings;
            }
            JobState::PrintRings => self.print_next_position(controller)?,
            JobState::TraceOutlines => {
                let polylines = self
                    .outlines
                    .as_ref()
                    .map(|o| o.outlines(self.layer))
                    .unwrap_or_default();
                if !polylines.is_empty() {
                    controller.begin_motor_changes()?;
                    let segments = trace_outlines(controller, &polylines)?;
                    self.packets += controller.end_motor_changes()?;
                    tracing::debug!("Traced {} outline segments", segments);
                }
                self.state = JobState::FinishLayer;
            }
            JobState::FinishLayer => {
                if let Some(rings) = self.rings.take() {
                    if !rings.is_empty() {
                        tracing::warn!(
                            "Layer {}: {} steps of arcs have no matching extruder",
                            self.layer + 1,
                            rings.total_length()
                        );
                    }
                }
                controller.begin_motor_changes()?;
                controller.complete_depressurization()?;
                controller.move_vertical(controller.geometry().layer_height_mm)?;
                self.packets += controller.end_motor_changes()?;
                self.layer += 1;
                self.state = self.next_layer_state();
            }
            JobState::Finished => {}
        }
        Ok(self.progress())
    }

    /// Tick until the job finishes
    pub fn run_to_completion(&mut self, controller: &mut MotionController) -> Result<JobProgress> {
        loop {
            let progress = self.tick(controller)?;
            if progress.is_finished() {
                tracing::info!("Print finished: {} packets", progress.packets);
                return Ok(progress);
            }
        }
    }

    fn next_layer_state(&self) -> JobState {
        if self.layer < self.layers.layer_count() {
            JobState::SampleLayer
        } else {
            JobState::Finished
        }
    }

    fn print_next_position(&mut self, controller: &mut MotionController) -> Result<()> {
        let Some(rings) = self.rings.as_mut() else {
            self.state = JobState::SampleLayer;
            return Ok(());
        };
        let Some(position) = self.positions.pop_front() else {
            self.state = if self.outlines.is_some() {
                JobState::TraceOutlines
            } else {
                JobState::FinishLayer
            };
            return Ok(());
        };

        let arcs = rings.assign_arcs(&controller.extruder_views_at(position));
        if arcs.is_empty() {
            return Ok(());
        }
        controller.begin_motor_changes()?;
        controller.move_radial_to_ring(position)?;
        for arc in arcs {
            controller.queue_change(arc)?;
        }
        self.packets += controller.end_motor_changes()?;
        Ok(())
    }
}

/// Carriage rings that bring a loaded extruder over every ring holding
/// its material, in ascending order
///
/// The carriage spans the platform diameter. The positive side is
/// preferred; a position beyond the carriage travel falls back to the
/// ring's mirror across the centre.
pub fn carriage_positions(rings: &RingLayer, controller: &MotionController) -> Vec<i32> {
    let max = controller.geometry().max_rings as i32;
    let travel = -max..max;
    let (Some(inner), Some(outer)) = (rings.innermost(), rings.outermost()) else {
        return Vec::new();
    };

    let mut positions = Vec::new();
    for ring in inner..=outer {
        let arcs = rings.ring(ring);
        if arcs.is_empty() {
            continue;
        }
        let r = ring as i32;
        for view in controller.extruder_views_at(0) {
            if !arcs.iter().any(|arc| arc.material == view.material) {
                continue;
            }
            let offset = view.relative_ring;
            let direct = r - offset;
            let mirrored = -r - offset;
            if travel.contains(&direct) {
                positions.push(direct);
            } else if r > 0 && travel.contains(&mirrored) {
                positions.push(mirrored);
            } else {
                tracing::warn!(
                    "Ring {} is out of reach of extruder {}",
                    ring,
                    view.motor
                );
            }
        }
    }
    positions.sort_unstable();
    positions.dedup();
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arc::StepArc;
    use crate::geometry::{MachineGeometry, MotionParams};
    use polarprint_communication::MemorySink;

    fn controller() -> MotionController {
        MotionController::new(
            MachineGeometry::default(),
            MotionParams::default(),
            Box::new(MemorySink::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_carriage_positions_cover_each_material() {
        let controller = controller();
        let mut rings = RingLayer::new(200, 4000);
        rings.set_ring(20, vec![StepArc::from_material(1, 0, 100)]);
        rings.set_ring(30, vec![StepArc::from_material(2, 0, 100)]);
        // extruder 0 at offset 0 reaches ring 20 from 20; extruder 1 at
        // offset -8 reaches ring 30 from 38
        assert_eq!(carriage_positions(&rings, &controller), vec![20, 38]);
    }

    #[test]
    fn test_mirrored_position_when_direct_is_out_of_reach() {
        let controller = controller();
        let mut rings = RingLayer::new(200, 4000);
        rings.set_ring(195, vec![StepArc::from_material(2, 0, 100)]);
        // 195 + 8 is beyond travel, so print it from across the centre
        assert_eq!(carriage_positions(&rings, &controller), vec![-187]);
        let views = controller.extruder_views_at(-187);
        assert_eq!(views[1].relative_ring, -195);
    }

    #[test]
    fn test_progress_fraction() {
        let progress = JobProgress {
            state: JobState::PrintRings,
            layer: 1,
            layer_count: 4,
            packets: 0,
        };
        assert!((progress.fraction() - 0.25).abs() < 1e-9);
        assert!(!progress.is_finished());
    }
}
