//! Ring layers
//!
//! A ring layer holds the arcs of one print layer bucketed by concentric
//! ring. It samples the layer's material grid along each ring, decides
//! which extruder prints which arc and re-expresses each extruder's arcs
//! in its own angular frame.
//!
//! An extruder whose relative ring is `+r` sees the platform in its
//! natural frame. One at `-r` sits across the centre and sees the same
//! ring half a revolution later, so its arcs are shifted by half a
//! rotation ("normalized") before conversion.

use crate::arc::{sort_arcs, total_length, StepArc, EMPTY_MATERIAL};
use crate::geometry::MachineGeometry;
use polarprint_communication::MotorId;

/// What the ring layer needs to know about an extruder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtruderView {
    /// Extruder motor
    pub motor: MotorId,
    /// Ring under the nozzle; negative across the centre
    pub relative_ring: i32,
    /// Material loaded
    pub material: u8,
}

/// An arc is already owned by another extruder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignConflict {
    /// Current owner
    pub owner: MotorId,
}

/// Arcs of one layer bucketed by ring
#[derive(Debug, Clone, PartialEq)]
pub struct RingLayer {
    rings: Vec<Vec<StepArc>>,
    steps_per_rotation: i64,
    innermost: Option<usize>,
    outermost: Option<usize>,
    earliest_step: Option<i64>,
    latest_step: Option<i64>,
}

impl RingLayer {
    /// Empty layer with `max_rings` rings
    pub fn new(max_rings: usize, steps_per_rotation: i64) -> Self {
        Self {
            rings: vec![Vec::new(); max_rings],
            steps_per_rotation,
            innermost: None,
            outermost: None,
            earliest_step: None,
            latest_step: None,
        }
    }

    /// Sample every ring of a layer
    ///
    /// `material_at(x_mm, y_mm)` returns the material at a point of the
    /// layer, 0 for empty.
    pub fn sample(
        geometry: &MachineGeometry,
        sampling_scale: u32,
        mut material_at: impl FnMut(f64, f64) -> u8,
    ) -> Self {
        let spr = geometry.platform_steps_per_rotation();
        let mut layer = Self::new(geometry.max_rings, spr);
        for ring in 0..geometry.max_rings {
            let samples = (ring * sampling_scale as usize).max(1);
            let radius = geometry.ring_radius_mm(ring);
            let arcs = sample_ring(samples, spr, |i| {
                let angle = std::f64::consts::TAU * i as f64 / samples as f64;
                material_at(radius * angle.cos(), radius * angle.sin())
            });
            layer.set_ring(ring, arcs);
        }
        tracing::debug!(
            "Sampled layer: rings {:?}..={:?}, {} steps of arcs",
            layer.innermost,
            layer.outermost,
            layer.total_length()
        );
        layer
    }

    /// Replace the arcs of `ring`
    pub fn set_ring(&mut self, ring: usize, mut arcs: Vec<StepArc>) {
        if ring >= self.rings.len() {
            tracing::warn!("Ignoring arcs for ring {} beyond {}", ring, self.rings.len());
            return;
        }
        sort_arcs(&mut arcs);
        self.rings[ring] = arcs;
        self.refresh_bounds();
    }

    fn refresh_bounds(&mut self) {
        self.innermost = self.rings.iter().position(|arcs| !arcs.is_empty());
        self.outermost = self.rings.iter().rposition(|arcs| !arcs.is_empty());
    }

    /// Arcs still waiting on `ring`
    pub fn ring(&self, ring: usize) -> &[StepArc] {
        self.rings.get(ring).map_or(&[], Vec::as_slice)
    }

    /// Number of rings
    pub fn ring_count(&self) -> usize {
        self.rings.len()
    }

    /// Platform steps per revolution
    pub fn steps_per_rotation(&self) -> i64 {
        self.steps_per_rotation
    }

    /// Innermost ring with arcs
    pub fn innermost(&self) -> Option<usize> {
        self.innermost
    }

    /// Outermost ring with arcs
    pub fn outermost(&self) -> Option<usize> {
        self.outermost
    }

    /// Earliest platform step of any arc taken so far
    pub fn earliest_step(&self) -> Option<i64> {
        self.earliest_step
    }

    /// Latest platform step of any arc taken so far
    pub fn latest_step(&self) -> Option<i64> {
        self.latest_step
    }

    /// No arcs remain
    pub fn is_empty(&self) -> bool {
        self.innermost.is_none()
    }

    /// Steps of arcs still waiting
    pub fn total_length(&self) -> i64 {
        self.rings.iter().map(|arcs| total_length(arcs)).sum()
    }

    /// Claim the arcs under the given extruders
    ///
    /// Returns every claimed arc with its motor set, expressed in the
    /// owning extruder's frame and sorted by motor then start. Claimed arcs
    /// leave the layer; arcs no extruder can print stay.
    pub fn assign_arcs(&mut self, extruders: &[ExtruderView]) -> Vec<StepArc> {
        let spr = self.steps_per_rotation;
        let mut rings: Vec<usize> = extruders
            .iter()
            .map(|e| e.relative_ring.unsigned_abs() as usize)
            .filter(|&r| r < self.rings.len())
            .collect();
        rings.sort_unstable();
        rings.dedup();

        let mut claimed = Vec::new();
        for ring in rings {
            let r = ring as i32;
            let positive = extruders.iter().find(|e| e.relative_ring == r).copied();
            let negative = extruders
                .iter()
                .find(|e| r > 0 && e.relative_ring == -r)
                .copied();

            let mut remaining = Vec::new();
            for arc in split_wrapping(std::mem::take(&mut self.rings[ring]), spr) {
                let mut arc = arc;
                let mut contested = false;
                for extruder in positive.iter().chain(negative.iter()) {
                    if try_assigning(&mut arc, extruder).is_err() {
                        contested = true;
                    }
                }
                match (contested, positive, negative) {
                    (true, Some(pos), Some(neg)) => {
                        claimed.extend(resolve_assignments(&arc, &pos, &neg, spr));
                    }
                    _ if arc.motor.is_some() => claimed.push(arc),
                    _ => remaining.push(arc),
                }
            }
            self.rings[ring] = remaining;
        }
        self.refresh_bounds();

        for arc in &claimed {
            self.earliest_step = Some(self.earliest_step.map_or(arc.start, |s| s.min(arc.start)));
            self.latest_step = Some(self.latest_step.map_or(arc.end, |s| s.max(arc.end)));
        }

        let negative_motors: Vec<MotorId> = extruders
            .iter()
            .filter(|e| e.relative_ring < 0)
            .map(|e| e.motor)
            .collect();
        let (mut negative, mut positive): (Vec<StepArc>, Vec<StepArc>) = claimed
            .into_iter()
            .partition(|arc| arc.motor.is_some_and(|m| negative_motors.contains(&m)));
        normalize_arcs(&mut negative, spr);
        positive.append(&mut negative);
        positive.sort_by(|a, b| a.motor.cmp(&b.motor).then(crate::arc::compare_arcs(a, b)));
        positive
    }
}

/// Turn the materials of `samples` evenly spaced points around a ring
/// into arcs
///
/// Sample `i` covers steps `[i * spr / samples, (i + 1) * spr / samples)`.
/// An arc that runs through step 0 is returned as one arc ending past
/// `spr`.
pub fn sample_ring(
    samples: usize,
    steps_per_rotation: i64,
    mut material_at: impl FnMut(usize) -> u8,
) -> Vec<StepArc> {
    let samples = samples.max(1);
    let step_of = |i: usize| i as i64 * steps_per_rotation / samples as i64;

    let mut arcs = Vec::new();
    let mut open: Option<StepArc> = None;
    for i in 0..samples {
        let material = material_at(i);
        let (start, end) = (step_of(i), step_of(i + 1));
        open = match (open.take(), material) {
            (None, EMPTY_MATERIAL) => None,
            (None, m) => Some(StepArc::from_material(m, start, end)),
            (Some(arc), EMPTY_MATERIAL) => {
                arcs.push(arc);
                None
            }
            (Some(arc), m) if arc.material == m => Some(arc.with_span(arc.start, end)),
            (Some(arc), m) => {
                arcs.push(arc);
                Some(StepArc::from_material(m, start, end))
            }
        };
    }
    arcs.extend(open);

    if arcs.len() >= 2 {
        let first = arcs[0];
        let last = arcs[arcs.len() - 1];
        if first.start == 0 && last.end == steps_per_rotation && first.material == last.material
        {
            arcs.remove(0);
            if let Some(last) = arcs.last_mut() {
                last.end = steps_per_rotation + first.end;
            }
        }
    }
    arcs
}

/// Split arcs that run past one revolution into two pieces at the wrap
pub fn split_wrapping(arcs: Vec<StepArc>, steps_per_rotation: i64) -> Vec<StepArc> {
    let mut out = Vec::with_capacity(arcs.len() + 1);
    for arc in arcs {
        if arc.wraps(steps_per_rotation) && arc.start < steps_per_rotation {
            let (head, tail) = arc.split_at(steps_per_rotation);
            out.push(head);
            out.push(tail.with_span(0, tail.end - steps_per_rotation));
        } else {
            out.push(arc);
        }
    }
    out
}

/// Claim `arc` for `extruder` if the material matches
///
/// Returns whether the extruder now owns the arc, or the conflicting owner.
pub fn try_assigning(arc: &mut StepArc, extruder: &ExtruderView) -> Result<bool, AssignConflict> {
    if arc.material != extruder.material {
        return Ok(false);
    }
    match arc.motor {
        None => {
            arc.motor = Some(extruder.motor);
            Ok(true)
        }
        Some(owner) if owner == extruder.motor => Ok(true),
        Some(owner) => Err(AssignConflict { owner }),
    }
}

/// Divide a contested arc along the half-rotation line
///
/// The half before the line goes to the positive-ring extruder, the half
/// after it to the negative-ring extruder. Lengths are conserved.
pub fn resolve_assignments(
    arc: &StepArc,
    positive: &ExtruderView,
    negative: &ExtruderView,
    steps_per_rotation: i64,
) -> Vec<StepArc> {
    let half = steps_per_rotation / 2;
    let owned = |arc: StepArc, owner: &ExtruderView| StepArc {
        motor: Some(owner.motor),
        ..arc
    };
    if arc.end <= half {
        vec![owned(*arc, positive)]
    } else if arc.start >= half {
        vec![owned(*arc, negative)]
    } else {
        let (before, after) = arc.split_at(half);
        vec![owned(before, positive), owned(after, negative)]
    }
}

/// Re-express arcs of a negative-ring extruder in its own frame, half a
/// rotation from the platform's
pub fn normalize_arcs(arcs: &mut Vec<StepArc>, steps_per_rotation: i64) {
    let spr = steps_per_rotation;
    let half = spr / 2;
    let mut out = Vec::with_capacity(arcs.len() + 1);
    for arc in arcs.drain(..) {
        let length = arc.length();
        if length >= spr {
            out.push(arc);
            continue;
        }
        let mut arc = arc;
        if !(0..spr).contains(&arc.start) {
            let start = arc.start.rem_euclid(spr);
            tracing::warn!(
                "Arc start {} outside one revolution; reducing to {}",
                arc.start,
                start
            );
            arc = arc.with_span(start, start + length);
        }
        if arc.start < half && arc.end > half {
            out.push(arc.with_span(arc.start + half, spr));
            out.push(arc.with_span(0, arc.end - half));
        } else if arc.start < half {
            out.push(arc.with_span(arc.start + half, arc.end + half));
        } else {
            out.push(arc.with_span(arc.start - half, arc.end - half));
        }
    }
    *arcs = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const M: u8 = 3;

    fn ext(slot: u8, relative_ring: i32) -> ExtruderView {
        ExtruderView {
            motor: MotorId::extruder(slot).unwrap(),
            relative_ring,
            material: M,
        }
    }

    #[test]
    fn test_sampling_state_machine() {
        // 8 samples over 400 steps: 50 steps each
        let pattern = [0, 1, 1, 0, 2, 1, 1, 0];
        let arcs = sample_ring(8, 400, |i| pattern[i]);
        assert_eq!(
            arcs,
            vec![
                StepArc::from_material(1, 50, 150),
                StepArc::from_material(2, 200, 250),
                StepArc::from_material(1, 250, 350),
            ]
        );
    }

    #[test]
    fn test_sampling_merges_arc_through_zero() {
        let pattern = [1, 1, 0, 0, 0, 0, 0, 1];
        let arcs = sample_ring(8, 400, |i| pattern[i]);
        assert_eq!(arcs, vec![StepArc::from_material(1, 350, 500)]);

        let full = sample_ring(4, 400, |_| 2);
        assert_eq!(full, vec![StepArc::from_material(2, 0, 400)]);
    }

    #[test]
    fn test_scenario_unsplit_and_wrap_split() {
        let mut layer = RingLayer::new(10, 400);
        layer.set_ring(
            4,
            vec![
                StepArc::from_material(M, 10, 190),
                StepArc::from_material(M, 350, 450),
            ],
        );
        let arcs = layer.assign_arcs(&[ext(0, 4)]);
        let owner = MotorId::extruder(0);
        assert!(arcs.iter().all(|a| a.motor == owner));
        assert!(arcs.contains(&StepArc {
            motor: owner,
            ..StepArc::from_material(M, 10, 190)
        }));
        let wrap: Vec<_> = arcs.iter().filter(|a| a.start == 0 || a.start == 350).collect();
        assert_eq!(wrap.len(), 2);
        assert_eq!(wrap.iter().map(|a| a.length()).sum::<i64>(), 100);
        assert!(layer.is_empty());
        assert_eq!(layer.earliest_step(), Some(0));
        assert_eq!(layer.latest_step(), Some(400));
    }

    #[test]
    fn test_conflict_split_at_half_rotation() {
        let mut layer = RingLayer::new(10, 400);
        layer.set_ring(
            4,
            vec![
                StepArc::from_material(M, 10, 190),
                StepArc::from_material(M, 250, 300),
                StepArc::from_material(M, 190, 240),
            ],
        );
        let positive = ext(0, 4);
        let negative = ext(1, -4);
        let arcs = layer.assign_arcs(&[positive, negative]);

        let of = |motor: MotorId| -> Vec<(i64, i64)> {
            arcs.iter()
                .filter(|a| a.motor == Some(motor))
                .map(|a| (a.start, a.end))
                .collect()
        };
        assert_eq!(of(positive.motor), vec![(10, 190), (190, 200)]);
        // negative pieces shifted back by half a rotation
        assert_eq!(of(negative.motor), vec![(0, 40), (50, 100)]);
        assert_eq!(total_length(&arcs), 180 + 10 + 40 + 50);
    }

    #[test]
    fn test_material_mismatch_stays_in_layer() {
        let mut layer = RingLayer::new(10, 400);
        layer.set_ring(2, vec![StepArc::from_material(9, 0, 100)]);
        assert!(layer.assign_arcs(&[ext(0, 2)]).is_empty());
        assert_eq!(layer.ring(2).len(), 1);
        assert_eq!(layer.innermost(), Some(2));
    }

    #[test]
    fn test_try_assigning_reports_conflict() {
        let mut arc = StepArc::from_material(M, 0, 10);
        assert_eq!(try_assigning(&mut arc, &ext(0, 1)), Ok(true));
        assert_eq!(try_assigning(&mut arc, &ext(0, 1)), Ok(true));
        assert_eq!(
            try_assigning(&mut arc, &ext(1, -1)),
            Err(AssignConflict {
                owner: MotorId::extruder(0).unwrap()
            })
        );
    }

    #[test]
    fn test_normalize_cases() {
        let mut arcs = vec![
            StepArc::from_material(M, 0, 400),
            StepArc::from_material(M, 150, 250),
            StepArc::from_material(M, 20, 60),
            StepArc::from_material(M, 300, 380),
        ];
        normalize_arcs(&mut arcs, 400);
        let spans: Vec<(i64, i64)> = arcs.iter().map(|a| (a.start, a.end)).collect();
        assert_eq!(
            spans,
            vec![(0, 400), (350, 400), (0, 50), (220, 260), (100, 180)]
        );
    }

    #[test]
    fn test_normalize_reduces_out_of_range_start() {
        let mut arcs = vec![StepArc::from_material(M, 420, 460)];
        normalize_arcs(&mut arcs, 400);
        assert_eq!((arcs[0].start, arcs[0].end), (220, 260));
    }

    fn ring_arcs() -> impl Strategy<Value = Vec<StepArc>> {
        proptest::collection::vec((1i64..60, 0i64..60), 0..8).prop_map(|pieces| {
            let mut cursor = 0;
            let mut arcs = Vec::new();
            for (len, gap) in pieces {
                let start = cursor + gap;
                if start + len > 400 {
                    break;
                }
                cursor = start + len;
                arcs.push(StepArc::from_material(M, start, cursor));
            }
            arcs
        })
    }

    proptest! {
        #[test]
        fn prop_assignment_conserves_length(arcs in ring_arcs(), ring in 1usize..9) {
            let mut layer = RingLayer::new(10, 400);
            let before = total_length(&arcs);
            layer.set_ring(ring, arcs);
            let r = ring as i32;
            let claimed = layer.assign_arcs(&[ext(0, r), ext(1, -r)]);
            prop_assert_eq!(total_length(&claimed) + layer.total_length(), before);
            prop_assert!(layer.is_empty());
            for arc in &claimed {
                prop_assert!(arc.start >= 0 && arc.end <= 400);
            }
            for motor in [MotorId::extruder(0), MotorId::extruder(1)] {
                let own: Vec<StepArc> =
                    claimed.iter().filter(|a| a.motor == motor).copied().collect();
                crate::arc::debug_assert_disjoint(&own);
            }
        }
    }
}
