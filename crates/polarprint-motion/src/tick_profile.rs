//! Tick profiles
//!
//! A tick profile is a constant-rate pulse train for one motor over
//! `[start_tick, start_tick + tick_length)`. A profile without a step rate
//! is an idle span: the motor is stopped and counts ticks.

use crate::arc::StepArc;
use crate::geometry::AccelerationRamp;
use crate::motor::{Direction, Motor, StepSize};
use polarprint_communication::MotorId;

/// Constant-rate pulse train for one motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickProfile {
    /// Motor driven
    pub motor: MotorId,
    /// Micro-stepping while the profile runs
    pub step_size: StepSize,
    /// Rotation sense
    pub direction: Direction,
    /// Ticks per step; `None` for an idle span
    pub step_rate: Option<u32>,
    /// First tick
    pub start_tick: u64,
    /// Ticks covered
    pub tick_length: u64,
}

impl TickProfile {
    /// Profile running `steps` steps at `rate` ticks per step
    pub fn moving(
        motor: MotorId,
        step_size: StepSize,
        direction: Direction,
        rate: u32,
        start_tick: u64,
        steps: u64,
    ) -> Self {
        debug_assert!(rate > 0, "zero step rate");
        Self {
            motor,
            step_size,
            direction,
            step_rate: Some(rate),
            start_tick,
            tick_length: steps * u64::from(rate),
        }
    }

    /// Idle span
    pub fn idle(motor: MotorId, start_tick: u64, tick_length: u64) -> Self {
        Self {
            motor,
            step_size: StepSize::default(),
            direction: Direction::Unknown,
            step_rate: None,
            start_tick,
            tick_length,
        }
    }

    /// First tick after the profile
    pub fn end_tick(&self) -> u64 {
        self.start_tick + self.tick_length
    }

    /// Steps emitted
    pub fn steps(&self) -> u64 {
        self.step_rate
            .map_or(0, |rate| self.tick_length / u64::from(rate))
    }

    /// Motor is stopped for the whole span
    pub fn is_idle(&self) -> bool {
        self.step_rate.is_none()
    }

    /// Signed step delta applied to the motor position
    pub fn step_delta(&self) -> i64 {
        self.steps() as i64 * self.direction.sign()
    }

    /// Tick spans intersect
    pub fn overlaps(&self, other: &TickProfile) -> bool {
        self.start_tick < other.end_tick() && other.start_tick < self.end_tick()
    }
}

/// Order profiles by motor, then start tick
pub fn sort_profiles(profiles: &mut [TickProfile]) {
    profiles.sort_by_key(|p| (p.motor, p.start_tick));
}

/// Delay every profile by `ticks`
pub fn shift_profiles(profiles: &mut [TickProfile], ticks: u64) {
    for profile in profiles {
        profile.start_tick += ticks;
    }
}

/// Assert that no two profiles of one motor overlap
pub fn debug_assert_no_overlap(profiles: &[TickProfile]) {
    if cfg!(debug_assertions) {
        for (i, a) in profiles.iter().enumerate() {
            for b in &profiles[i + 1..] {
                if a.motor == b.motor && a.tick_length > 0 && b.tick_length > 0 {
                    assert!(!a.overlaps(b), "overlapping profiles {:?} and {:?}", a, b);
                }
            }
        }
    }
}

/// One profile per non-empty arc at `rate` ticks per step
///
/// Arc steps are placed on the tick axis at `origin_tick + step * rate`,
/// so arcs keep their relative spacing. Arcs must carry a motor.
pub fn convert(
    arcs: &[StepArc],
    step_size: StepSize,
    origin_tick: u64,
    rate: u32,
) -> Vec<TickProfile> {
    arcs.iter()
        .filter(|arc| arc.is_valid())
        .filter_map(|arc| {
            let motor = arc.motor?;
            Some(TickProfile::moving(
                motor,
                step_size,
                arc.direction,
                rate,
                origin_tick + arc.start as u64 * u64::from(rate),
                arc.length() as u64,
            ))
        })
        .collect()
}

/// Profiles that run exactly `steps` steps in exactly `total_ticks` ticks
///
/// The remainder is spread over a leading run one tick slower, so at most
/// two profiles are produced.
pub fn convert_exact(
    motor: MotorId,
    step_size: StepSize,
    direction: Direction,
    start_tick: u64,
    steps: u64,
    total_ticks: u64,
) -> Vec<TickProfile> {
    if steps == 0 {
        return Vec::new();
    }
    let rate = total_ticks / steps;
    if rate == 0 {
        tracing::warn!(
            "Motor {} cannot run {} steps in {} ticks; running at 1 tick per step",
            motor,
            steps,
            total_ticks
        );
        return vec![TickProfile::moving(motor, step_size, direction, 1, start_tick, steps)];
    }
    let slow_steps = total_ticks % steps;
    let mut profiles = Vec::with_capacity(2);
    let mut tick = start_tick;
    if slow_steps > 0 {
        let slow = TickProfile::moving(
            motor,
            step_size,
            direction,
            rate as u32 + 1,
            tick,
            slow_steps,
        );
        tick = slow.end_tick();
        profiles.push(slow);
    }
    profiles.push(TickProfile::moving(
        motor,
        step_size,
        direction,
        rate as u32,
        tick,
        steps - slow_steps,
    ));
    profiles
}

/// Split a move of `steps` into `(steps, rate)` stages that accelerate from
/// the ramp's start rate toward `cruise_rate` and decelerate symmetrically
pub fn ramp_stages(steps: u64, cruise_rate: u32, ramp: &AccelerationRamp) -> Vec<(u64, u32)> {
    let per_stage = u64::from(ramp.steps_per_stage.max(1));
    let mut rates = Vec::new();
    let mut rate = ramp.start_ticks_per_step;
    while rate > cruise_rate && (rates.len() as u64 + 1) * per_stage * 2 <= steps {
        rates.push(rate);
        rate = (rate - rate / 4).max(cruise_rate);
    }
    let peak = if rates.is_empty() { cruise_rate } else { rate };

    let ramp_steps = rates.len() as u64 * per_stage;
    let cruise_steps = steps - 2 * ramp_steps;
    let mut stages: Vec<(u64, u32)> = rates.iter().map(|&r| (per_stage, r)).collect();
    if cruise_steps > 0 {
        stages.push((cruise_steps, peak));
    }
    stages.extend(rates.iter().rev().map(|&r| (per_stage, r)));
    stages
}

/// Travel move with acceleration; returns the profiles in time order
pub fn convert_ramped(
    motor: MotorId,
    step_size: StepSize,
    direction: Direction,
    start_tick: u64,
    steps: u64,
    cruise_rate: u32,
    ramp: &AccelerationRamp,
) -> Vec<TickProfile> {
    let mut tick = start_tick;
    ramp_stages(steps, cruise_rate, ramp)
        .into_iter()
        .map(|(stage_steps, rate)| {
            let profile =
                TickProfile::moving(motor, step_size, direction, rate, tick, stage_steps);
            tick = profile.end_tick();
            profile
        })
        .collect()
}

/// Timing inputs for [`convert_extruder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtruderTiming {
    /// Earliest tick the extruder may move (transaction start)
    pub earliest_tick: u64,
    /// Tick at which platform step 0 of the arcs passes the nozzle
    pub origin_tick: u64,
    /// Platform rate while printing
    pub platform_ticks_per_step: u32,
    /// Extruder rate while printing
    pub extruder_ticks_per_step: u32,
    /// Extruder rate while pressurizing or depressurizing
    pub pressure_ticks_per_step: u32,
    /// Extruder micro-stepping
    pub step_size: StepSize,
}

/// Result of [`convert_extruder`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtruderConversion {
    /// Extrusion and pressure profiles in time order
    pub profiles: Vec<TickProfile>,
    /// Delay the whole transaction needs so the first arc starts fully
    /// pressurized. Already applied to `profiles`.
    pub shift_in_ticks_required: u64,
    /// Steps of bead extruded
    pub extruded_steps: u64,
}

/// Convert one extruder's arcs, in platform steps, into extrusion profiles
/// with pressurize and depressurize moves in the gaps
///
/// Each gap is split in half: the first half may bleed off up to the
/// backlash budget, the second half restores it before the next arc. The
/// first arc is pressurized from `earliest_tick`; if that lead is too
/// short the shortfall is returned as `shift_in_ticks_required`.
pub fn convert_extruder(
    motor: &mut Motor,
    arcs: &[StepArc],
    timing: &ExtruderTiming,
) -> ExtruderConversion {
    let id = motor.id;
    let arcs: Vec<&StepArc> = arcs.iter().filter(|arc| arc.is_valid()).collect();
    let Some(first) = arcs.first() else {
        return ExtruderConversion::default();
    };
    let Some(state) = motor.extruder_state_mut() else {
        debug_assert!(false, "motor {} is not an extruder", id);
        return ExtruderConversion::default();
    };

    let platform_rate = u64::from(timing.platform_ticks_per_step);
    let pressure_rate = u64::from(timing.pressure_ticks_per_step);
    let window = |arc: &StepArc| -> (u64, u64) {
        (
            timing.origin_tick + arc.start as u64 * platform_rate,
            timing.origin_tick + arc.end as u64 * platform_rate,
        )
    };

    let mut conversion = ExtruderConversion::default();
    let mut delta = 0i64;

    let need = u64::from(state.pressure_required) * pressure_rate;
    let lead = window(first).0.saturating_sub(timing.earliest_tick);
    let shift = need.saturating_sub(lead);
    conversion.shift_in_ticks_required = shift;

    let pressure_profile = |direction: Direction, start: u64, steps: u32| {
        TickProfile::moving(
            id,
            timing.step_size,
            direction,
            timing.pressure_ticks_per_step,
            start,
            u64::from(steps),
        )
    };

    let mut previous_end: Option<u64> = None;
    for arc in &arcs {
        let (start, end) = window(arc);
        let (start, end) = (start + shift, end + shift);

        if let Some(gap_start) = previous_end {
            let half_gap = start.saturating_sub(gap_start) / 2;
            let bleed = u32::try_from(half_gap / pressure_rate)
                .unwrap_or(u32::MAX)
                .min(state.pressure_limit);
            let released = state.depressurize(bleed);
            if released > 0 {
                conversion
                    .profiles
                    .push(pressure_profile(Direction::Ccw, gap_start, released));
                delta -= i64::from(released);
            }
        }

        let restore = state.pressure_required;
        if restore > 0 {
            let ticks = u64::from(restore) * pressure_rate;
            conversion
                .profiles
                .push(pressure_profile(Direction::Cw, start - ticks, restore));
            state.pressurize(restore);
            delta += i64::from(restore);
        }

        let window_ticks = end - start;
        let rate = u64::from(timing.extruder_ticks_per_step);
        let (steps, rate) = if window_ticks >= rate {
            (window_ticks / rate, timing.extruder_ticks_per_step)
        } else {
            (1, u32::try_from(window_ticks).unwrap_or(u32::MAX).max(1))
        };
        conversion.profiles.push(TickProfile::moving(
            id,
            timing.step_size,
            Direction::Cw,
            rate,
            start,
            steps,
        ));
        conversion.extruded_steps += steps;
        delta += steps as i64;
        previous_end = Some(end);
    }

    debug_assert_eq!(state.pressure_required, 0);
    motor.advance(delta);
    debug_assert_no_overlap(&conversion.profiles);
    conversion
}

/// Bleed off whatever backlash the extruder still owes, starting at
/// `start_tick`
pub fn complete_depressurization(
    motor: &mut Motor,
    start_tick: u64,
    pressure_ticks_per_step: u32,
) -> Option<TickProfile> {
    let id = motor.id;
    let step_size = motor.step_size;
    let state = motor.extruder_state_mut()?;
    let owed = state.pressure_owed();
    if owed == 0 {
        return None;
    }
    state.depressurize(owed);
    motor.advance(-i64::from(owed));
    Some(TickProfile::moving(
        id,
        step_size,
        Direction::Ccw,
        pressure_ticks_per_step,
        start_tick,
        u64::from(owed),
    ))
}
