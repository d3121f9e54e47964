//! Outline tracing
//!
//! Polylines are traced with the platform, the radial carriage and one
//! extruder moving together. Each segment becomes one synchronized move
//! whose duration follows the print speed along the segment's chord.

use crate::controller::MotionController;
use crate::source::{PolarPoint, Polyline};
use polarprint_communication::MotorId;
use polarprint_core::MotionError;

/// Platform step at which `angle` sits under the nozzle
fn platform_step(angle: f64, steps_per_rotation: i64) -> i64 {
    (angle / std::f64::consts::TAU * steps_per_rotation as f64).round() as i64
}

/// Shortest signed move from `from` to `to` around one revolution
fn shortest_delta(from: i64, to: i64, steps_per_rotation: i64) -> i64 {
    let delta = (to - from).rem_euclid(steps_per_rotation);
    if delta > steps_per_rotation / 2 {
        delta - steps_per_rotation
    } else {
        delta
    }
}

/// Trace `polylines` inside the open transaction
///
/// Polylines whose material no extruder carries are skipped. Returns the
/// number of segments traced.
pub fn trace_outlines(
    controller: &mut MotionController,
    polylines: &[Polyline],
) -> Result<usize, MotionError> {
    let mut segments = 0;
    for polyline in polylines {
        let Some(extruder) = controller
            .working()
            .extruders()
            .find(|m| {
                m.extruder_state()
                    .is_some_and(|s| s.material == polyline.material)
            })
            .map(|m| m.id)
        else {
            tracing::warn!(
                "No extruder loaded with material {}; skipping outline",
                polyline.material
            );
            continue;
        };
        segments += trace_polyline(controller, extruder, &polyline.points)?;
    }
    if segments > 0 {
        controller.complete_depressurization()?;
    }
    Ok(segments)
}

/// Carriage position that puts `extruder`'s nozzle over `radius_mm`
fn carriage_mm(
    controller: &MotionController,
    extruder: MotorId,
    radius_mm: f64,
) -> Result<f64, MotionError> {
    let offset = controller
        .working()
        .motor(extruder)?
        .extruder_state()
        .map_or(0, |s| s.ring_offset);
    Ok(radius_mm - f64::from(offset) * controller.geometry().ring_pitch_mm)
}

fn trace_polyline(
    controller: &mut MotionController,
    extruder: MotorId,
    points: &[PolarPoint],
) -> Result<usize, MotionError> {
    let [first, rest @ ..] = points else {
        return Ok(0);
    };
    if rest.is_empty() {
        return Ok(0);
    }
    let spr = controller.working().platform_steps_per_rotation();

    // travel to the first point without extruding
    let target = carriage_mm(controller, extruder, first.radius_mm)?;
    controller.move_radial_to_mm(target)?;
    let position = controller.working().motor(MotorId::PLATFORM)?.angular_position();
    let delta = shortest_delta(position, platform_step(first.angle, spr), spr);
    controller.execute_change(MotorId::PLATFORM, delta)?;
    controller.pressurize(extruder)?;

    let steps_per_mm = controller.params().extruder_steps_per_mm;
    let mut previous = *first;
    for point in rest {
        let distance = previous.distance_to(point);
        let ticks = controller.params().ticks_for_distance(distance).max(1);

        let radial_mm = carriage_mm(controller, extruder, point.radius_mm)?
            - carriage_mm(controller, extruder, previous.radius_mm)?;
        let radial = controller.plan_linear(MotorId::RADIAL, radial_mm)?;
        let position = controller.working().motor(MotorId::PLATFORM)?.angular_position();
        let platform = shortest_delta(position, platform_step(point.angle, spr), spr);
        let extrude = (distance * steps_per_mm).round() as i64;

        controller.queue_synchronized(
            &[
                (MotorId::PLATFORM, platform),
                (MotorId::RADIAL, radial),
                (extruder, extrude),
            ],
            ticks,
        )?;
        previous = *point;
    }
    Ok(rest.len())
}
