//! Event-driven conversion of tick profiles into packets
//!
//! Every motor runs its own queue on the device, so each motor has its own
//! tick timeline here. The scheduler always services the motor whose
//! timeline is furthest behind, which keeps the per-motor device queues
//! evenly filled. Gaps in a timeline become idle runs: `Stop` followed by
//! a tick count.

use crate::printer::Printer;
use crate::tick_profile::{debug_assert_no_overlap, TickProfile};
use polarprint_communication::{MotorId, TxPacket, MAX_MOTORS};
use polarprint_core::MotionError;
use std::collections::VecDeque;

/// Per-motor tick cursors that persist across transactions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandScheduler {
    cursors: [u64; MAX_MOTORS as usize],
}

impl CommandScheduler {
    /// All timelines at tick zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick up to which `motor` has been scheduled
    pub fn cursor(&self, motor: MotorId) -> u64 {
        self.cursors[usize::from(motor.index())]
    }

    /// First tick at which every motor is free
    pub fn origin(&self) -> u64 {
        self.cursors.iter().copied().max().unwrap_or(0)
    }

    /// Restart every timeline, e.g. after homing or an abort
    pub fn reset(&mut self) {
        self.cursors = [0; MAX_MOTORS as usize];
    }

    /// Emit the packets that run `profiles` on the device
    ///
    /// Profiles may arrive in any order. Profiles of one motor must not
    /// overlap, and none may start before that motor's cursor.
    pub fn convert_to_commands(
        &mut self,
        mut profiles: Vec<TickProfile>,
        shadow: &mut Printer,
        out: &mut Vec<TxPacket>,
    ) -> Result<(), MotionError> {
        profiles.retain(|p| p.tick_length > 0);
        debug_assert_no_overlap(&profiles);

        let mut queues: Vec<VecDeque<TickProfile>> = vec![VecDeque::new(); MAX_MOTORS as usize];
        profiles.sort_by_key(|p| p.start_tick);
        for profile in profiles {
            queues[usize::from(profile.motor.index())].push_back(profile);
        }

        let emitted_before = out.len();
        loop {
            // next tick of interest: the motor lagging furthest behind
            let Some(slot) = (0..queues.len())
                .filter(|&slot| !queues[slot].is_empty())
                .min_by_key(|&slot| (self.cursors[slot], slot))
            else {
                break;
            };
            let Some(profile) = queues[slot].front().copied() else {
                break;
            };
            let cursor = self.cursors[slot];

            if profile.start_tick > cursor {
                let gap = TickProfile::idle(profile.motor, cursor, profile.start_tick - cursor);
                self.emit(&gap, shadow, out)?;
                continue;
            }
            debug_assert_eq!(
                profile.start_tick, cursor,
                "profile starts inside motor {} history",
                profile.motor
            );
            queues[slot].pop_front();
            self.emit(&profile, shadow, out)?;
        }
        tracing::debug!(
            "Scheduled {} packets; timelines end at {:?}",
            out.len() - emitted_before,
            self.cursors
        );
        Ok(())
    }

    fn emit(
        &mut self,
        profile: &TickProfile,
        shadow: &mut Printer,
        out: &mut Vec<TxPacket>,
    ) -> Result<(), MotionError> {
        shadow.update_state(profile, out)?;
        let count = if profile.is_idle() {
            profile.tick_length
        } else {
            profile.steps()
        };
        shadow.send_steps(profile.motor, count, out)?;
        let slot = usize::from(profile.motor.index());
        self.cursors[slot] = self.cursors[slot].max(profile.end_tick());
        Ok(())
    }
}
