//! Motion controller
//!
//! All motion is planned inside a transaction:
//!
//! 1. [`MotionController::begin_motor_changes`] clears the per-motor queues.
//! 2. Callers queue ring arcs with [`MotionController::queue_change`] and
//!    schedule immediate moves with [`MotionController::execute_change`]
//!    and the linear-track helpers.
//! 3. [`MotionController::end_motor_changes`] finds the covering rotation
//!    for the queued ring arcs, converts everything to tick profiles,
//!    diffs them against the shadow printer and hands the packets to the
//!    sink in one batch.
//!
//! Tick positions inside a transaction are relative to its start; the
//! scheduler places the transaction after everything already sent.

use crate::arc::StepArc;
use crate::covering::{find_covering_rotation, transform_arcs};
use crate::geometry::{MachineGeometry, MotionParams};
use crate::motor::Direction;
use crate::printer::Printer;
use crate::ring_layer::ExtruderView;
use crate::scheduler::CommandScheduler;
use crate::tick_profile::{
    complete_depressurization, convert, convert_exact, convert_extruder, convert_ramped,
    shift_profiles, ExtruderTiming, TickProfile,
};
use polarprint_communication::{MotorId, Opcode, PacketSink, TxPacket, MAX_MOTORS};
use polarprint_core::{Error, MotionError, Result};
use std::collections::BTreeMap;

/// Planned state as it was when the open transaction began
#[derive(Debug, Clone)]
struct Snapshot {
    working: Printer,
    carriage_ring: i32,
}

/// Plans motor changes and sends them to a packet sink
pub struct MotionController {
    /// Machine description
    geometry: MachineGeometry,
    /// Timing parameters
    params: MotionParams,
    /// Planned state, updated as moves are queued
    working: Printer,
    /// What the device has been told
    shadow: Printer,
    /// Packet destination
    sink: Box<dyn PacketSink>,
    /// Device timelines
    scheduler: CommandScheduler,
    /// Extruder arcs waiting for the ring pass, in the platform frame
    ring_arcs: Vec<StepArc>,
    /// Arcs of other motors, run at the travel rate
    queued_arcs: Vec<StepArc>,
    /// Profiles of the open transaction
    profiles: Vec<TickProfile>,
    /// Per-motor tick cursors of the open transaction
    cursors: [u64; MAX_MOTORS as usize],
    /// Restored when the open transaction cannot be sent
    snapshot: Option<Snapshot>,
    in_transaction: bool,
    disabled: Option<String>,
    carriage_ring: i32,
    packets_sent: usize,
}

impl MotionController {
    /// Controller for a validated machine
    pub fn new(
        geometry: MachineGeometry,
        params: MotionParams,
        sink: Box<dyn PacketSink>,
    ) -> std::result::Result<Self, MotionError> {
        geometry.validate()?;
        params.validate()?;
        let working = Printer::new(&geometry)?;
        let shadow = working.clone();
        Ok(Self {
            geometry,
            params,
            working,
            shadow,
            sink,
            scheduler: CommandScheduler::new(),
            ring_arcs: Vec::new(),
            queued_arcs: Vec::new(),
            profiles: Vec::new(),
            cursors: [0; MAX_MOTORS as usize],
            snapshot: None,
            in_transaction: false,
            disabled: None,
            carriage_ring: 0,
            packets_sent: 0,
        })
    }

    pub fn geometry(&self) -> &MachineGeometry {
        &self.geometry
    }

    pub fn params(&self) -> &MotionParams {
        &self.params
    }

    /// Planned machine state
    pub fn working(&self) -> &Printer {
        &self.working
    }

    /// Device state as last told
    pub fn shadow(&self) -> &Printer {
        &self.shadow
    }

    pub fn sink(&self) -> &dyn PacketSink {
        self.sink.as_ref()
    }

    pub fn sink_mut(&mut self) -> &mut dyn PacketSink {
        self.sink.as_mut()
    }

    pub fn scheduler(&self) -> &CommandScheduler {
        &self.scheduler
    }

    /// Ring under the carriage reference
    pub fn carriage_ring(&self) -> i32 {
        self.carriage_ring
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Packets handed to the sink so far
    pub fn packets_sent(&self) -> usize {
        self.packets_sent
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.is_some()
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        self.disabled.as_deref()
    }

    /// Refuse all further motion, e.g. when the firmware cannot be brought
    /// up to date
    pub fn disable(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Motion controller disabled: {}", reason);
        self.discard_transaction();
        self.disabled = Some(reason);
    }

    /// Forget what the device was told after it dropped its queues
    pub fn resync_after_abort(&mut self) {
        self.discard_transaction();
        self.shadow.invalidate();
        self.scheduler.reset();
        tracing::info!("Motion state resynchronised after abort");
    }

    fn discard_transaction(&mut self) {
        self.in_transaction = false;
        self.ring_arcs.clear();
        self.queued_arcs.clear();
        self.profiles.clear();
        self.cursors = [0; MAX_MOTORS as usize];
        self.snapshot = None;
    }

    fn ensure_enabled(&self) -> std::result::Result<(), MotionError> {
        if self.disabled.is_some() {
            return Err(MotionError::Disabled);
        }
        Ok(())
    }

    fn ensure_transaction(&self) -> std::result::Result<(), MotionError> {
        self.ensure_enabled()?;
        if !self.in_transaction {
            return Err(MotionError::NoTransaction);
        }
        Ok(())
    }

    fn ensure_idle(&self) -> std::result::Result<(), MotionError> {
        self.ensure_enabled()?;
        if self.in_transaction {
            return Err(MotionError::TransactionOpen);
        }
        Ok(())
    }

    fn cursor(&self, motor: MotorId) -> u64 {
        self.cursors[usize::from(motor.index())]
    }

    fn set_cursor(&mut self, motor: MotorId, tick: u64) {
        let slot = &mut self.cursors[usize::from(motor.index())];
        *slot = (*slot).max(tick);
    }

    fn push_profiles(&mut self, profiles: Vec<TickProfile>) {
        for profile in &profiles {
            self.set_cursor(profile.motor, profile.end_tick());
        }
        self.profiles.extend(profiles);
    }

    /// Open a transaction
    pub fn begin_motor_changes(&mut self) -> std::result::Result<(), MotionError> {
        self.ensure_idle()?;
        self.discard_transaction();
        self.snapshot = Some(Snapshot {
            working: self.working.clone(),
            carriage_ring: self.carriage_ring,
        });
        self.in_transaction = true;
        Ok(())
    }

    /// Queue an owned arc
    ///
    /// Extruder arcs are expressed in the platform frame and wait for the
    /// ring pass; arcs of other motors run at the travel rate. Zero-length
    /// arcs are dropped.
    pub fn queue_change(&mut self, arc: StepArc) -> std::result::Result<(), MotionError> {
        self.ensure_transaction()?;
        let motor = arc.motor.ok_or(MotionError::UnassignedArc {
            start: arc.start,
            end: arc.end,
        })?;
        let is_extruder = self.working.motor(motor)?.extruder_state().is_some();
        if !arc.is_valid() {
            return Ok(());
        }
        if is_extruder {
            self.ring_arcs.push(arc);
        } else {
            self.queued_arcs.push(arc);
        }
        Ok(())
    }

    /// Move `motor` by `delta` steps with the travel ramp, after anything
    /// already scheduled for it in this transaction
    pub fn execute_change(
        &mut self,
        motor: MotorId,
        delta: i64,
    ) -> std::result::Result<(), MotionError> {
        self.ensure_transaction()?;
        let step_size = self.working.motor(motor)?.step_size;
        if delta == 0 {
            return Ok(());
        }
        let profiles = convert_ramped(
            motor,
            step_size,
            Direction::of_delta(delta),
            self.cursor(motor),
            delta.unsigned_abs(),
            self.params.travel_ticks_per_step,
            &self.params.ramp,
        );
        self.working.motor_mut(motor)?.advance(delta);
        self.push_profiles(profiles);
        Ok(())
    }

    /// Move several motors together so they all finish after `ticks`
    ///
    /// Returns the relative tick at which the move starts.
    pub fn queue_synchronized(
        &mut self,
        moves: &[(MotorId, i64)],
        ticks: u64,
    ) -> std::result::Result<u64, MotionError> {
        self.ensure_transaction()?;
        let start = moves
            .iter()
            .map(|&(motor, _)| self.cursor(motor))
            .max()
            .unwrap_or(0);
        for &(motor, delta) in moves {
            let step_size = self.working.motor(motor)?.step_size;
            let profiles = convert_exact(
                motor,
                step_size,
                Direction::of_delta(delta),
                start,
                delta.unsigned_abs(),
                ticks,
            );
            self.working.motor_mut(motor)?.advance(delta);
            self.push_profiles(profiles);
            self.set_cursor(motor, start + ticks);
        }
        Ok(start)
    }

    /// Signed steps that move linear `motor` by `delta_mm`, carrying the
    /// rounding error of the working printer forward
    pub fn plan_linear(
        &mut self,
        motor: MotorId,
        delta_mm: f64,
    ) -> std::result::Result<i64, MotionError> {
        self.working
            .motor_mut(motor)?
            .plan_linear_move(delta_mm)
            .ok_or(MotionError::UnknownMotor { id: motor.index() })
    }

    /// Move the radial carriage to `target_mm` from the platform centre
    ///
    /// The carriage ring, and with it every extruder's relative ring,
    /// follows to the nearest ring.
    pub fn move_radial_to_mm(&mut self, target_mm: f64) -> std::result::Result<(), MotionError> {
        self.ensure_transaction()?;
        let current = self
            .working
            .motor(MotorId::RADIAL)?
            .linear_state()
            .map_or(0.0, |linear| linear.position_mm);
        let steps = self.plan_linear(MotorId::RADIAL, target_mm - current)?;
        self.execute_change(MotorId::RADIAL, steps)?;
        self.set_carriage_ring((target_mm / self.geometry.ring_pitch_mm).round() as i32);
        Ok(())
    }

    /// Put the carriage reference over `ring`
    pub fn move_radial_to_ring(&mut self, ring: i32) -> std::result::Result<(), MotionError> {
        self.move_radial_to_mm(f64::from(ring) * self.geometry.ring_pitch_mm)?;
        self.set_carriage_ring(ring);
        tracing::debug!("Carriage to ring {}", ring);
        Ok(())
    }

    fn set_carriage_ring(&mut self, ring: i32) {
        self.working.set_carriage_ring(ring);
        self.carriage_ring = ring;
    }

    /// Raise both vertical tracks by `delta_mm`
    pub fn move_vertical(&mut self, delta_mm: f64) -> std::result::Result<(), MotionError> {
        self.ensure_transaction()?;
        let start = self
            .cursor(MotorId::VERTICAL_LEFT)
            .max(self.cursor(MotorId::VERTICAL_RIGHT));
        for motor in [MotorId::VERTICAL_LEFT, MotorId::VERTICAL_RIGHT] {
            self.set_cursor(motor, start);
            let steps = self.plan_linear(motor, delta_mm)?;
            self.execute_change(motor, steps)?;
        }
        Ok(())
    }

    /// Extruder views for a carriage over `carriage_ring`
    pub fn extruder_views_at(&self, carriage_ring: i32) -> Vec<ExtruderView> {
        self.working
            .extruders()
            .filter_map(|motor| {
                let state = motor.extruder_state()?;
                Some(ExtruderView {
                    motor: motor.id,
                    relative_ring: state.ring_offset + carriage_ring,
                    material: state.material,
                })
            })
            .collect()
    }

    /// Take up `extruder`'s backlash now
    pub fn pressurize(&mut self, extruder: MotorId) -> std::result::Result<(), MotionError> {
        self.ensure_transaction()?;
        let start = self.cursor(extruder);
        let rate = self.params.pressure_ticks_per_step;
        let motor = self.working.motor_mut(extruder)?;
        let step_size = motor.step_size;
        let state = motor
            .extruder_state_mut()
            .ok_or(MotionError::NotAnExtruder {
                id: extruder.index(),
            })?;
        let taken = state.pressurize(state.pressure_required);
        if taken == 0 {
            return Ok(());
        }
        motor.advance(i64::from(taken));
        let profile = TickProfile::moving(
            extruder,
            step_size,
            Direction::Cw,
            rate,
            start,
            u64::from(taken),
        );
        self.push_profiles(vec![profile]);
        Ok(())
    }

    /// Release all backlash still held by any extruder
    pub fn complete_depressurization(&mut self) -> std::result::Result<(), MotionError> {
        self.ensure_transaction()?;
        let rate = self.params.pressure_ticks_per_step;
        for id in self.working.extruder_ids() {
            let start = self.cursor(id);
            if let Some(profile) =
                complete_depressurization(self.working.motor_mut(id)?, start, rate)
            {
                self.push_profiles(vec![profile]);
            }
        }
        Ok(())
    }

    /// Close the transaction and send it
    ///
    /// Returns the number of packets handed to the sink. When planning or
    /// sending fails nothing is committed: the working printer returns to
    /// its state at [`MotionController::begin_motor_changes`] and the
    /// shadow and device timelines keep what the device last received.
    pub fn end_motor_changes(&mut self) -> Result<usize> {
        self.ensure_transaction()?;
        let snapshot = self.snapshot.take();
        let planned = self.plan_ring_pass().and_then(|()| self.plan_queued_arcs());
        let profiles = std::mem::take(&mut self.profiles);
        self.discard_transaction();

        let sent = planned
            .map_err(Error::from)
            .and_then(|()| self.commit(profiles));
        if let Err(e) = &sent {
            if let Some(snapshot) = snapshot {
                self.working = snapshot.working;
                self.carriage_ring = snapshot.carriage_ring;
            }
            tracing::warn!("Motor changes not sent, rolled back: {}", e);
        }
        sent
    }

    /// Diff `profiles` against a copy of the shadow and adopt the copy
    /// only once the sink has accepted the packets
    fn commit(&mut self, mut profiles: Vec<TickProfile>) -> Result<usize> {
        shift_profiles(&mut profiles, self.scheduler.origin());
        let mut shadow = self.shadow.clone();
        let mut scheduler = self.scheduler.clone();
        let mut packets = Vec::new();
        scheduler.convert_to_commands(profiles, &mut shadow, &mut packets)?;
        self.send(&packets)?;
        self.shadow = shadow;
        self.scheduler = scheduler;
        Ok(packets.len())
    }

    fn send(&mut self, packets: &[TxPacket]) -> Result<()> {
        if packets.is_empty() {
            return Ok(());
        }
        self.sink.send_batch(packets)?;
        self.packets_sent += packets.len();
        tracing::debug!("Sent batch of {} packets", packets.len());
        Ok(())
    }

    fn plan_ring_pass(&mut self) -> std::result::Result<(), MotionError> {
        if self.ring_arcs.is_empty() {
            return Ok(());
        }
        let arcs = std::mem::take(&mut self.ring_arcs);
        let spr = self.working.platform_steps_per_rotation();
        let position = self.working.motor(MotorId::PLATFORM)?.angular_position();
        let Some(rotation) = find_covering_rotation(&arcs, position, spr) else {
            return Ok(());
        };
        self.execute_change(MotorId::PLATFORM, rotation.travel_delta())?;

        let ring = arcs
            .iter()
            .filter_map(|arc| arc.motor)
            .filter_map(|id| self.working.motor(id).ok()?.extruder_state())
            .map(|state| state.relative_ring.unsigned_abs() as usize)
            .max()
            .unwrap_or(0);
        let platform_rate = self.params.platform_ticks_per_step(&self.geometry, ring);
        let print_start = self.cursors.iter().copied().max().unwrap_or(0);

        let mut by_extruder: BTreeMap<MotorId, Vec<StepArc>> = BTreeMap::new();
        for arc in transform_arcs(&arcs, &rotation, spr) {
            if let Some(motor) = arc.motor {
                by_extruder.entry(motor).or_default().push(arc);
            }
        }

        let mut conversions = Vec::with_capacity(by_extruder.len());
        for (id, arcs) in &by_extruder {
            let timing = ExtruderTiming {
                earliest_tick: self.cursor(*id),
                origin_tick: print_start,
                platform_ticks_per_step: platform_rate,
                extruder_ticks_per_step: self.params.extruder_ticks_per_step(),
                pressure_ticks_per_step: self.params.pressure_ticks_per_step,
                step_size: self.working.motor(*id)?.step_size,
            };
            let conversion = convert_extruder(self.working.motor_mut(*id)?, arcs, &timing);
            conversions.push(conversion);
        }

        let shift = conversions
            .iter()
            .map(|c| c.shift_in_ticks_required)
            .max()
            .unwrap_or(0);
        if shift > 0 {
            tracing::debug!("Delaying ring pass {} ticks to finish pressurizing", shift);
        }
        for mut conversion in conversions {
            shift_profiles(
                &mut conversion.profiles,
                shift - conversion.shift_in_ticks_required,
            );
            self.push_profiles(conversion.profiles);
        }

        let direction = rotation.approach.print_direction();
        let platform = self.working.motor(MotorId::PLATFORM)?;
        let sweep = TickProfile::moving(
            MotorId::PLATFORM,
            platform.step_size,
            direction,
            platform_rate,
            print_start + shift,
            rotation.length as u64,
        );
        self.working
            .motor_mut(MotorId::PLATFORM)?
            .advance(rotation.length * direction.sign());
        self.push_profiles(vec![sweep]);
        tracing::debug!(
            "Ring pass over ring {}: {} arcs, sweep of {} steps",
            ring,
            arcs.len(),
            rotation.length
        );
        Ok(())
    }

    fn plan_queued_arcs(&mut self) -> std::result::Result<(), MotionError> {
        let arcs = std::mem::take(&mut self.queued_arcs);
        let mut by_motor: BTreeMap<MotorId, Vec<StepArc>> = BTreeMap::new();
        for arc in arcs {
            if let Some(motor) = arc.motor {
                by_motor.entry(motor).or_default().push(arc);
            }
        }
        for (id, arcs) in by_motor {
            let start = self.cursor(id);
            let step_size = self.working.motor(id)?.step_size;
            let profiles = convert(&arcs, step_size, start, self.params.travel_ticks_per_step);
            let delta: i64 = profiles.iter().map(TickProfile::step_delta).sum();
            self.working.motor_mut(id)?.advance(delta);
            self.push_profiles(profiles);
        }
        Ok(())
    }

    /// Set the target temperature of heater 0 or 1
    pub fn set_heater_target(&mut self, index: usize, target: u32) -> Result<()> {
        self.ensure_idle()?;
        let opcode = match index {
            0 => Opcode::HeaterTarget0,
            1 => Opcode::HeaterTarget1,
            _ => return Err(MotionError::UnknownHeater { index }.into()),
        };
        let mut shadow = self.shadow.clone();
        let mut packets = Vec::new();
        shadow.send(opcode, Some(target), &mut packets);
        self.send(&packets)?;
        self.shadow = shadow;
        tracing::info!("Heater {} target {}", index, target);
        Ok(())
    }

    /// Home every axis and restart the device timelines
    pub fn home(&mut self) -> Result<()> {
        self.ensure_idle()?;
        let mut shadow = self.shadow.clone();
        let mut packets = Vec::new();
        shadow.send(Opcode::Home, None, &mut packets);
        self.send(&packets)?;
        self.shadow = shadow;
        self.shadow.invalidate();
        self.shadow.zero_positions();
        self.shadow.set_carriage_ring(0);
        self.working.zero_positions();
        self.working.set_carriage_ring(0);
        self.carriage_ring = 0;
        self.scheduler.reset();
        tracing::info!("Homing");
        Ok(())
    }
}

impl std::fmt::Debug for MotionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionController")
            .field("carriage_ring", &self.carriage_ring)
            .field("in_transaction", &self.in_transaction)
            .field("disabled", &self.disabled)
            .field("packets_sent", &self.packets_sent)
            .finish_non_exhaustive()
    }
}
