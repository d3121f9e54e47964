//! Minimal covering rotation
//!
//! Before a ring is printed the platform must sweep every claimed arc
//! under its nozzle. The covering rotation is the shortest platform arc
//! that contains all of them, together with the cheapest way to reach one
//! of its ends from the current platform position.

use crate::arc::{sort_arcs, StepArc};
use crate::motor::Direction;

/// How the platform reaches the covering arc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Approach {
    /// Travel clockwise to the start, print clockwise
    DirectCw,
    /// Travel counter-clockwise to the start, print clockwise
    WrapCw,
    /// Travel counter-clockwise to the end, print counter-clockwise
    DirectCcw,
    /// Travel clockwise to the end, print counter-clockwise
    WrapCcw,
}

impl Approach {
    /// Rotation sense while printing
    pub fn print_direction(self) -> Direction {
        match self {
            Approach::DirectCw | Approach::WrapCw => Direction::Cw,
            Approach::DirectCcw | Approach::WrapCcw => Direction::Ccw,
        }
    }

    /// Rotation sense of the travel move
    pub fn travel_direction(self) -> Direction {
        match self {
            Approach::DirectCw | Approach::WrapCcw => Direction::Cw,
            Approach::WrapCw | Approach::DirectCcw => Direction::Ccw,
        }
    }
}

/// Shortest platform arc containing every queued arc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoveringRotation {
    /// Clockwise start of the covering arc, in `[0, spr)`
    pub start: i64,
    /// Length of the covering arc in platform steps
    pub length: i64,
    /// Chosen approach
    pub approach: Approach,
    /// Platform steps of the travel move
    pub travel_steps: i64,
}

impl CoveringRotation {
    /// Clockwise end of the covering arc, in `[0, spr)`
    pub fn end(&self, steps_per_rotation: i64) -> i64 {
        (self.start + self.length).rem_euclid(steps_per_rotation)
    }

    /// Platform position where printing begins
    pub fn entry(&self, steps_per_rotation: i64) -> i64 {
        match self.approach.print_direction() {
            Direction::Ccw => self.end(steps_per_rotation),
            _ => self.start,
        }
    }

    /// Signed travel move; positive is clockwise
    pub fn travel_delta(&self) -> i64 {
        self.travel_steps * self.approach.travel_direction().sign()
    }
}

/// Clockwise span from `from` that covers every arc
fn span_from(from: i64, arcs: &[StepArc], spr: i64) -> i64 {
    arcs.iter()
        .map(|arc| (arc.start - from).rem_euclid(spr) + arc.length())
        .max()
        .unwrap_or(0)
}

/// Find the covering rotation for `arcs` with the platform at `position`
///
/// Every arc start is tried as the covering start, so the search is
/// quadratic in the number of arcs. Arcs come from one ring per
/// extruder, which keeps the count small.
pub fn find_covering_rotation(
    arcs: &[StepArc],
    position: i64,
    steps_per_rotation: i64,
) -> Option<CoveringRotation> {
    let spr = steps_per_rotation;
    let arcs: Vec<StepArc> = arcs.iter().filter(|a| a.is_valid()).copied().collect();
    if arcs.is_empty() || spr <= 0 {
        return None;
    }
    let position = position.rem_euclid(spr);

    let mut candidates: Vec<(i64, i64)> = arcs
        .iter()
        .map(|arc| {
            let start = arc.start.rem_euclid(spr);
            (start, span_from(start, &arcs, spr))
        })
        .collect();
    let shortest = candidates.iter().map(|&(_, length)| length).min()?;
    candidates.retain(|&(_, length)| length == shortest);
    candidates.sort_unstable();
    candidates.dedup();

    let mut best: Option<CoveringRotation> = None;
    for (start, length) in candidates {
        let end = (start + length).rem_euclid(spr);
        let options = [
            (Approach::DirectCw, (start - position).rem_euclid(spr)),
            (Approach::WrapCw, (position - start).rem_euclid(spr)),
            (Approach::DirectCcw, (position - end).rem_euclid(spr)),
            (Approach::WrapCcw, (end - position).rem_euclid(spr)),
        ];
        for (approach, travel_steps) in options {
            if best.map_or(true, |b| travel_steps < b.travel_steps) {
                best = Some(CoveringRotation {
                    start,
                    length,
                    approach,
                    travel_steps,
                });
            }
        }
    }
    if let Some(rotation) = &best {
        tracing::debug!(
            "Covering rotation: start {} length {} via {:?}, {} travel steps",
            rotation.start,
            rotation.length,
            rotation.approach,
            rotation.travel_steps
        );
    }
    best
}

/// Re-express arcs as step offsets along the covering rotation, in print
/// order, and sort them
///
/// For a clockwise print an arc `[s, e)` lands at `(s - start) mod spr`;
/// for a counter-clockwise print it lands at `(end - e) mod spr`, so the
/// arc's tail passes the nozzle first.
pub fn transform_arcs(
    arcs: &[StepArc],
    rotation: &CoveringRotation,
    steps_per_rotation: i64,
) -> Vec<StepArc> {
    let spr = steps_per_rotation;
    let end = rotation.end(spr);
    let mut out: Vec<StepArc> = arcs
        .iter()
        .filter(|arc| arc.is_valid())
        .map(|arc| {
            let length = arc.length();
            let offset = match rotation.approach.print_direction() {
                Direction::Ccw => (end - arc.end).rem_euclid(spr),
                _ => (arc.start - rotation.start).rem_euclid(spr),
            };
            debug_assert!(
                offset + length <= rotation.length,
                "arc {:?} escapes covering rotation {:?}",
                arc,
                rotation
            );
            arc.with_span(offset, offset + length)
        })
        .collect();
    sort_arcs(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arc(start: i64, end: i64) -> StepArc {
        StepArc::from_material(1, start, end)
    }

    #[test]
    fn test_covering_skips_largest_gap() {
        // gap 120..300 is the largest, so the cover runs 300 -> 120
        let arcs = [arc(10, 120), arc(300, 350)];
        let rotation = find_covering_rotation(&arcs, 300, 400).unwrap();
        assert_eq!(rotation.start, 300);
        assert_eq!(rotation.length, 220);
        assert_eq!(rotation.approach, Approach::DirectCw);
        assert_eq!(rotation.travel_steps, 0);
    }

    #[test]
    fn test_picks_cheapest_approach() {
        let arcs = [arc(100, 150)];
        // sitting just past the end: back up to the end and print ccw
        let rotation = find_covering_rotation(&arcs, 160, 400).unwrap();
        assert_eq!(rotation.approach, Approach::DirectCcw);
        assert_eq!(rotation.travel_steps, 10);
        assert_eq!(rotation.entry(400), 150);
        assert_eq!(rotation.travel_delta(), -10);

        // just before the start: go forward
        let rotation = find_covering_rotation(&arcs, 95, 400).unwrap();
        assert_eq!(rotation.approach, Approach::DirectCw);
        assert_eq!(rotation.travel_delta(), 5);

        // just past the start, nearer it than the end
        let rotation = find_covering_rotation(&arcs, 110, 400).unwrap();
        assert_eq!(rotation.approach, Approach::WrapCw);
        assert_eq!(rotation.travel_delta(), -10);

        // a little before the end on the far side
        let rotation = find_covering_rotation(&arcs, 145, 400).unwrap();
        assert_eq!(rotation.approach, Approach::WrapCcw);
        assert_eq!(rotation.travel_delta(), 5);
    }

    #[test]
    fn test_cover_across_zero() {
        let arcs = [arc(380, 400), arc(0, 30)];
        let rotation = find_covering_rotation(&arcs, 0, 400).unwrap();
        assert_eq!(rotation.start, 380);
        assert_eq!(rotation.length, 50);
        let moved = transform_arcs(&arcs, &rotation, 400);
        assert_eq!(moved[0].start, 0);
        assert_eq!(moved[0].end, 20);
        assert_eq!((moved[1].start, moved[1].end), (20, 50));
    }

    #[test]
    fn test_transform_ccw_reverses_order() {
        let arcs = [arc(100, 120), arc(140, 150)];
        let rotation = CoveringRotation {
            start: 100,
            length: 50,
            approach: Approach::DirectCcw,
            travel_steps: 0,
        };
        let moved = transform_arcs(&arcs, &rotation, 400);
        assert_eq!((moved[0].start, moved[0].end), (0, 10));
        assert_eq!((moved[1].start, moved[1].end), (30, 50));
    }

    #[test]
    fn test_full_revolution() {
        let arcs = [arc(0, 400)];
        let rotation = find_covering_rotation(&arcs, 250, 400).unwrap();
        assert_eq!(rotation.length, 400);
        let moved = transform_arcs(&arcs, &rotation, 400);
        assert_eq!((moved[0].start, moved[0].end), (0, 400));
    }

    #[test]
    fn test_no_arcs() {
        assert!(find_covering_rotation(&[], 0, 400).is_none());
    }
}
