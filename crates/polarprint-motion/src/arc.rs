//! Step arcs
//!
//! An arc is one motor's constant-direction run over the half-open step
//! interval `[start, end)`. Platform arcs may run past one revolution;
//! `end > steps_per_rotation` means the arc wraps through zero.

use crate::motor::Direction;
use polarprint_communication::MotorId;
use std::cmp::Ordering;

/// Material id meaning "no material"
pub const EMPTY_MATERIAL: u8 = 0;

/// A constant-direction run of steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepArc {
    /// Owning motor; `None` until an extruder claims it
    pub motor: Option<MotorId>,
    /// Rotation sense
    pub direction: Direction,
    /// First step, inclusive
    pub start: i64,
    /// Last step, exclusive
    pub end: i64,
    /// Material deposited along the arc
    pub material: u8,
}

impl StepArc {
    /// Arc for a known motor
    pub fn for_motor(motor: MotorId, direction: Direction, start: i64, end: i64) -> Self {
        Self {
            motor: Some(motor),
            direction,
            start,
            end,
            material: EMPTY_MATERIAL,
        }
    }

    /// Unowned clockwise arc of `material`, as produced by ring sampling
    pub fn from_material(material: u8, start: i64, end: i64) -> Self {
        Self {
            motor: None,
            direction: Direction::Cw,
            start,
            end,
            material,
        }
    }

    /// Steps covered by the arc
    pub fn length(&self) -> i64 {
        debug_assert!(
            self.end >= self.start,
            "negative arc length: [{}, {})",
            self.start,
            self.end
        );
        self.end - self.start
    }

    /// `end > start`
    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }

    /// Arc runs past the end of one revolution
    pub fn wraps(&self, steps_per_rotation: i64) -> bool {
        self.end > steps_per_rotation
    }

    /// Step intervals intersect
    pub fn overlaps(&self, other: &StepArc) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Copy with a new interval
    pub fn with_span(&self, start: i64, end: i64) -> Self {
        Self { start, end, ..*self }
    }

    /// Split at `step`, which must lie strictly inside the arc
    pub fn split_at(&self, step: i64) -> (StepArc, StepArc) {
        debug_assert!(self.start < step && step < self.end);
        (self.with_span(self.start, step), self.with_span(step, self.end))
    }
}

/// Order arcs by start step
///
/// Ties break on end, then material, so the order is total. Arcs of the
/// same material on one motor never overlap; [`debug_assert_disjoint`]
/// checks that for a sorted run.
pub fn compare_arcs(a: &StepArc, b: &StepArc) -> Ordering {
    a.start
        .cmp(&b.start)
        .then(a.end.cmp(&b.end))
        .then(a.material.cmp(&b.material))
}

/// Sort arcs with [`compare_arcs`]
pub fn sort_arcs(arcs: &mut [StepArc]) {
    arcs.sort_by(compare_arcs);
}

/// Sum of arc lengths
pub fn total_length(arcs: &[StepArc]) -> i64 {
    arcs.iter().map(StepArc::length).sum()
}

/// Assert that equal-material arcs on the same motor do not overlap
pub fn debug_assert_disjoint(arcs: &[StepArc]) {
    if cfg!(debug_assertions) {
        for (i, a) in arcs.iter().enumerate() {
            for b in &arcs[i + 1..] {
                if a.motor == b.motor && a.material == b.material {
                    assert!(!a.overlaps(b), "overlapping arcs {:?} and {:?}", a, b);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_length_and_wrap() {
        let arc = StepArc::from_material(3, 350, 450);
        assert_eq!(arc.length(), 100);
        assert!(arc.wraps(400));
        assert!(!arc.wraps(450));
        let (a, b) = arc.split_at(400);
        assert_eq!(a.length() + b.length(), 100);
        assert_eq!(b.material, 3);
    }

    #[test]
    fn test_overlap_is_half_open() {
        let a = StepArc::from_material(1, 0, 10);
        let b = StepArc::from_material(1, 10, 20);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&a.with_span(9, 11)));
    }

    #[test]
    #[should_panic(expected = "overlapping arcs")]
    #[cfg(debug_assertions)]
    fn test_overlap_is_a_defect() {
        debug_assert_disjoint(&[
            StepArc::from_material(1, 0, 10),
            StepArc::from_material(1, 5, 15),
        ]);
    }

    fn disjoint_arcs() -> impl Strategy<Value = Vec<StepArc>> {
        proptest::collection::vec((1i64..50, 0i64..50), 1..20).prop_map(|pieces| {
            let mut cursor = 0;
            pieces
                .into_iter()
                .map(|(len, gap)| {
                    let start = cursor + gap;
                    cursor = start + len;
                    StepArc::from_material(1, start, cursor)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_sorted_disjoint_arcs_are_ordered(mut arcs in disjoint_arcs(), seed in any::<u64>()) {
            let n = arcs.len();
            arcs.rotate_left((seed as usize) % n);
            sort_arcs(&mut arcs);
            debug_assert_disjoint(&arcs);
            for pair in arcs.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
                prop_assert_eq!(compare_arcs(&pair[0], &pair[1]), Ordering::Less);
            }
        }
    }
}
