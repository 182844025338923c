//! The frame orchestrator.

use rustc_hash::FxHashSet;
use tracing::{debug, error, info, warn};

use crate::{
    config::TickConfig,
    context::{FrameContext, LevelTick},
    dump::{self, DumpFilter, TickDump},
    error::{TickError, TickResult},
    group::TickGroup,
    level::{LevelId, TickLevel, check_admission},
    registry::{UnitId, UnitSlots},
    sequencer::TickSequencer,
    task::CompletionHandle,
    unit::{TickState, TickUnit, TickUnitDesc},
};

/// Where the manager is within a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FrameState {
    /// Between frames.
    #[default]
    Idle,
    /// Inside `start_frame`, resolving and queueing units.
    Queuing,
    /// Waiting for the driver to run this group.
    Ticking(TickGroup),
    /// Every regular group ran; only the end of frame is left.
    CatchUp,
}

/// Log a protocol violation and return it.
fn reject<T>(err: TickError) -> TickResult<T> {
    warn!("{}", err);
    Err(err)
}

fn level_mut(levels: &mut [Option<TickLevel>], id: LevelId) -> Option<&mut TickLevel> {
    levels.get_mut(id.index() as usize).and_then(Option::as_mut)
}

/// Owns every unit and level and drives frames.
///
/// # Example
///
/// ```ignore
/// let mut ticks = TickManager::new(TickConfig::from_env());
/// let physics = ticks.spawn_unit(
///     LevelId::PERSISTENT,
///     TickUnitDesc::new("physics", |ctx: &TickContext<'_>| step(ctx.delta_seconds()))
///         .group(TickGroup::StartPhysics),
/// )?;
/// let camera = ticks.spawn_unit(
///     LevelId::PERSISTENT,
///     TickUnitDesc::new("camera", |_: &TickContext<'_>| {}).prerequisite(physics),
/// )?;
///
/// ticks.tick_frame(1.0 / 60.0, LevelTick::All)?;
/// ```
pub struct TickManager {
    config: TickConfig,
    units: UnitSlots,
    /// Indexed by `LevelId`; removed levels leave a hole.
    levels: Vec<Option<TickLevel>>,
    /// Levels taking part in the current frame.
    active: Vec<LevelId>,
    sequencer: TickSequencer,
    context: FrameContext,
    frame: u64,
    state: FrameState,
}

impl TickManager {
    /// Create a manager with the persistent level.
    #[must_use]
    pub fn new(config: TickConfig) -> Self {
        let sequencer = TickSequencer::new(&config);
        info!(
            single_threaded = sequencer.is_single_threaded(),
            dedicated_server = config.dedicated_server,
            "Tick manager created"
        );
        Self {
            config,
            units: UnitSlots::new(),
            levels: vec![Some(TickLevel::new(LevelId::PERSISTENT))],
            active: Vec::new(),
            sequencer,
            context: FrameContext::default(),
            frame: 0,
            state: FrameState::Idle,
        }
    }

    pub const fn config(&self) -> &TickConfig {
        &self.config
    }

    /// Frame counter; bumped by every `start_frame` and pause frame.
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    pub const fn frame_state(&self) -> FrameState {
        self.state
    }

    /// True if every tick runs on the calling thread.
    pub const fn is_single_threaded(&self) -> bool {
        self.sequencer.is_single_threaded()
    }

    /// Number of units known to the manager, registered or not.
    pub const fn unit_count(&self) -> usize {
        self.units.len()
    }

    // ---- levels ----

    /// Create a new, visible level.
    pub fn add_level(&mut self) -> LevelId {
        let id = LevelId::new(self.levels.len() as u32);
        self.levels.push(Some(TickLevel::new(id)));
        debug!(level = id.index(), "Added level");
        id
    }

    /// Remove a level, unregistering every unit it holds.
    pub fn remove_level(&mut self, id: LevelId) -> TickResult<()> {
        if id == LevelId::PERSISTENT {
            return reject(TickError::PersistentLevel);
        }
        let Some(mut level) = self
            .levels
            .get_mut(id.index() as usize)
            .and_then(Option::take)
        else {
            return reject(TickError::UnknownLevel(id));
        };
        for unit_id in level.unit_ids() {
            if let Some(unit) = self.units.get_mut(unit_id) {
                level.remove_unit(unit_id, unit);
            }
        }
        self.active.retain(|active| *active != id);
        debug!(level = id.index(), "Removed level");
        Ok(())
    }

    /// Show or hide a level. Hidden levels do not tick; changes apply from
    /// the next frame.
    pub fn set_level_visible(&mut self, id: LevelId, visible: bool) -> TickResult<()> {
        if id == LevelId::PERSISTENT && !visible {
            return reject(TickError::PersistentLevel);
        }
        match level_mut(&mut self.levels, id) {
            Some(level) => {
                level.set_visible(visible);
                Ok(())
            }
            None => reject(TickError::UnknownLevel(id)),
        }
    }

    pub fn is_level_visible(&self, id: LevelId) -> Option<bool> {
        self.level(id).map(TickLevel::is_visible)
    }

    fn level(&self, id: LevelId) -> Option<&TickLevel> {
        self.levels.get(id.index() as usize).and_then(Option::as_ref)
    }

    // ---- unit lifecycle ----

    /// Create an unregistered unit.
    pub fn add_unit(&mut self, desc: TickUnitDesc) -> UnitId {
        self.units.insert(TickUnit::from_desc(desc))
    }

    /// Register a unit with a level.
    ///
    /// Enabled units registered while a frame is running still tick this
    /// frame through the catch-up pass. On a dedicated server, units that do
    /// not allow it are left unregistered without an error.
    pub fn register_unit(&mut self, level: LevelId, id: UnitId) -> TickResult<()> {
        let Some(unit) = self.units.get_mut(id) else {
            return reject(TickError::UnknownUnit(id));
        };
        if unit.is_registered() {
            return reject(TickError::AlreadyRegistered(id));
        }
        match check_admission(unit, &self.config) {
            Ok(true) => {}
            Ok(false) => {
                debug!(unit = %id, name = unit.name(), "Not registering unit on dedicated server");
                return Ok(());
            }
            Err(err) => return reject(err),
        }
        let Some(target) = level_mut(&mut self.levels, level) else {
            return reject(TickError::UnknownLevel(level));
        };
        target.add_unit(id, unit);
        Ok(())
    }

    /// `add_unit` followed by `register_unit`. On failure the unit is removed.
    pub fn spawn_unit(&mut self, level: LevelId, desc: TickUnitDesc) -> TickResult<UnitId> {
        if self.level(level).is_none() {
            return reject(TickError::UnknownLevel(level));
        }
        let id = self.add_unit(desc);
        if let Err(err) = self.register_unit(level, id) {
            self.units.remove(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Take a unit out of its level. Unregistered units are left alone.
    ///
    /// A unit already dispatched this frame still runs.
    pub fn unregister_unit(&mut self, id: UnitId) -> TickResult<()> {
        let Some(unit) = self.units.get_mut(id) else {
            return reject(TickError::UnknownUnit(id));
        };
        let Some(level_id) = unit.level else {
            return Ok(());
        };
        match level_mut(&mut self.levels, level_id) {
            Some(level) => {
                level.remove_unit(id, unit);
            }
            None => {
                unit.level = None;
                unit.spawner = None;
            }
        }
        Ok(())
    }

    /// Unregister and destroy a unit. Every id for it goes stale.
    pub fn remove_unit(&mut self, id: UnitId) -> TickResult<()> {
        self.unregister_unit(id)?;
        self.units.remove(id);
        Ok(())
    }

    // ---- unit settings ----

    /// Enable or disable a unit. Takes effect from the next queueing pass.
    pub fn set_enabled(&mut self, id: UnitId, enabled: bool) -> TickResult<()> {
        let Some(unit) = self.units.get_mut(id) else {
            return reject(TickError::UnknownUnit(id));
        };
        if unit.is_enabled() == enabled {
            return Ok(());
        }
        let next = if enabled {
            TickState::Enabled
        } else {
            TickState::Disabled
        };
        match unit.level.and_then(|level| level_mut(&mut self.levels, level)) {
            Some(level) => {
                level.remove_unit(id, unit);
                unit.state = next;
                level.insert(id, unit);
            }
            None => unit.state = next,
        }
        Ok(())
    }

    /// Change a unit's interval. A cooling down unit whose interval drops to
    /// zero goes straight back to ticking every frame.
    pub fn set_interval(&mut self, id: UnitId, seconds: f32) -> TickResult<()> {
        let Some(unit) = self.units.get_mut(id) else {
            return reject(TickError::UnknownUnit(id));
        };
        unit.interval = seconds;
        if seconds <= 0.0 && unit.state == TickState::CoolingDown {
            if let Some(level) = unit.level.and_then(|level| level_mut(&mut self.levels, level)) {
                level.remove_unit(id, unit);
                unit.state = TickState::Enabled;
                level.insert(id, unit);
            }
        }
        Ok(())
    }

    /// Set the high priority flag, optionally on every transitive
    /// prerequisite as well.
    pub fn set_high_priority(
        &mut self,
        id: UnitId,
        high_priority: bool,
        include_prerequisites: bool,
    ) -> TickResult<()> {
        if !self.units.contains(id) {
            return reject(TickError::UnknownUnit(id));
        }
        let mut seen = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            let Some(unit) = self.units.get_mut(next) else {
                continue;
            };
            unit.high_priority = high_priority;
            if include_prerequisites {
                stack.extend(unit.prerequisites.iter().copied());
            }
        }
        Ok(())
    }

    /// Make `id` wait for `prerequisite` every frame both tick.
    pub fn add_prerequisite(&mut self, id: UnitId, prerequisite: UnitId) -> TickResult<()> {
        if !self.units.contains(prerequisite) {
            return reject(TickError::UnknownUnit(prerequisite));
        }
        let Some(unit) = self.units.get_mut(id) else {
            return reject(TickError::UnknownUnit(id));
        };
        if !unit.prerequisites.contains(&prerequisite) {
            unit.prerequisites.push(prerequisite);
        }
        Ok(())
    }

    /// Drop an edge. `prerequisite` may already be stale.
    pub fn remove_prerequisite(&mut self, id: UnitId, prerequisite: UnitId) -> TickResult<()> {
        let Some(unit) = self.units.get_mut(id) else {
            return reject(TickError::UnknownUnit(id));
        };
        unit.prerequisites.retain(|p| *p != prerequisite);
        Ok(())
    }

    // ---- queries ----

    /// Group the unit resolved into the last time it was queued.
    pub fn actual_group(&self, id: UnitId) -> Option<TickGroup> {
        self.units.get(id).map(|unit| unit.actual_group)
    }

    pub fn tick_group(&self, id: UnitId) -> Option<TickGroup> {
        self.units.get(id).map(|unit| unit.tick_group)
    }

    pub fn state(&self, id: UnitId) -> Option<TickState> {
        self.units.get(id).map(|unit| unit.state)
    }

    pub fn is_registered(&self, id: UnitId) -> bool {
        self.units.get(id).is_some_and(TickUnit::is_registered)
    }

    /// Level holding the unit, if registered.
    pub fn unit_level(&self, id: UnitId) -> Option<LevelId> {
        self.units.get(id).and_then(|unit| unit.level)
    }

    pub fn prerequisites(&self, id: UnitId) -> Option<&[UnitId]> {
        self.units.get(id).map(|unit| unit.prerequisites.as_slice())
    }

    /// Completion handle of the unit's dispatch in the current or last frame.
    pub fn completion(&self, id: UnitId) -> Option<CompletionHandle> {
        self.units.get(id).and_then(|unit| unit.completion.clone())
    }

    // ---- frames ----

    /// Begin a frame: wake cooldown units and queue every enabled unit of
    /// every visible level. Nothing runs until its group is released.
    pub fn start_frame(&mut self, delta_seconds: f32, kind: LevelTick) -> TickResult<()> {
        if self.state != FrameState::Idle {
            return reject(TickError::FrameInProgress(self.frame));
        }
        self.frame += 1;
        self.state = FrameState::Queuing;
        self.context = FrameContext {
            delta_seconds,
            kind,
            group: TickGroup::PrePhysics,
            frame: self.frame,
        };
        self.sequencer.start_frame(&self.config, self.frame);

        self.active = self
            .levels
            .iter()
            .flatten()
            .filter(|level| level.is_visible())
            .map(TickLevel::id)
            .collect();

        let mut considered = 0;
        for &id in &self.active {
            if let Some(level) = level_mut(&mut self.levels, id) {
                considered += level.start_frame(self.context, &mut self.units);
            }
        }
        let mut dispatched = 0;
        for &id in &self.active {
            if let Some(level) = level_mut(&mut self.levels, id) {
                dispatched += level.queue_all_ticks(&mut self.units, &mut self.sequencer, &self.config);
            }
        }

        debug!(
            frame = self.frame,
            levels = self.active.len(),
            considered,
            dispatched,
            "Frame started"
        );
        self.state = FrameState::Ticking(TickGroup::PrePhysics);
        Ok(())
    }

    /// Release `group`, which must be the next group of the frame.
    ///
    /// When `blocking`, waits for everything queued so far through `group`,
    /// then queues units spawned meanwhile. Spawns landing in the catch-up
    /// group are run immediately, repeatedly, up to the configured limit.
    /// Exceeding it aborts the frame with [`TickError::RunawaySpawn`].
    ///
    /// Non-blocking release is only allowed before `LastDemotable`.
    pub fn run_group(&mut self, group: TickGroup, blocking: bool) -> TickResult<()> {
        let expected = match self.state {
            FrameState::Ticking(expected) => expected,
            FrameState::CatchUp => TickGroup::NewlySpawned,
            FrameState::Idle | FrameState::Queuing => return reject(TickError::NoFrameInProgress),
        };
        if group != expected {
            return reject(TickError::OutOfOrder {
                expected,
                requested: group,
            });
        }
        if !blocking && group >= TickGroup::LastDemotable {
            return reject(TickError::MustBlock(group));
        }

        self.sequencer.release_group(group, blocking);
        let cursor = group.next();
        self.context.group = cursor;
        self.state = if cursor.is_catch_up() {
            FrameState::CatchUp
        } else {
            FrameState::Ticking(cursor)
        };

        if blocking {
            self.catch_up(cursor)?;
        }
        Ok(())
    }

    /// Queue units spawned so far into `cursor`, running the catch-up group
    /// until no more spawns show up.
    fn catch_up(&mut self, cursor: TickGroup) -> TickResult<()> {
        let limit = self.config.max_catch_up_iterations;
        for iteration in 0..=limit {
            if iteration == limit {
                error!(
                    frame = self.frame,
                    limit, "Runaway recursive spawning of tick units, aborting frame"
                );
                self.abort_frame();
                return Err(TickError::RunawaySpawn(limit));
            }

            let mut queued = 0;
            for &id in &self.active {
                if let Some(level) = level_mut(&mut self.levels, id) {
                    queued += level.queue_newly_spawned(
                        cursor,
                        &mut self.units,
                        &mut self.sequencer,
                        &self.config,
                    );
                }
            }

            if queued > 0 && cursor.is_catch_up() {
                debug!(frame = self.frame, iteration, queued, "Running newly spawned units");
                self.sequencer.release_group(TickGroup::NewlySpawned, true);
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Drain everything still in flight and return to idle. Pending spawns
    /// are kept for the next frame.
    fn abort_frame(&mut self) {
        self.sequencer.force_drain();
        for &id in &self.active {
            if let Some(level) = level_mut(&mut self.levels, id) {
                level.abort_frame();
            }
        }
        self.active.clear();
        self.state = FrameState::Idle;
    }

    /// Finish the frame.
    ///
    /// # Panics
    ///
    /// In debug builds, if queued work was never released or spawned units
    /// were never queued. Release builds log the problem and recover.
    pub fn end_frame(&mut self) -> TickResult<()> {
        if matches!(self.state, FrameState::Idle | FrameState::Queuing) {
            return reject(TickError::NoFrameInProgress);
        }
        self.sequencer.end_frame();
        for &id in &self.active {
            if let Some(level) = level_mut(&mut self.levels, id) {
                level.end_frame();
            }
        }
        self.active.clear();
        self.state = FrameState::Idle;
        Ok(())
    }

    /// Run a whole frame, blocking on every regular group.
    pub fn tick_frame(&mut self, delta_seconds: f32, kind: LevelTick) -> TickResult<()> {
        self.start_frame(delta_seconds, kind)?;
        for group in TickGroup::REGULAR {
            self.run_group(group, true)?;
        }
        self.end_frame()
    }

    /// Run a paused frame: only pause-aware units tick, synchronously and
    /// unordered. Returns the number of units ticked.
    pub fn run_pause_frame(&mut self, delta_seconds: f32, kind: LevelTick) -> TickResult<usize> {
        if self.state != FrameState::Idle {
            return reject(TickError::FrameInProgress(self.frame));
        }
        self.frame += 1;
        self.context = FrameContext {
            delta_seconds,
            kind,
            group: TickGroup::PrePhysics,
            frame: self.frame,
        };

        let mut ticked = 0;
        for level in self.levels.iter_mut().flatten() {
            if level.is_visible() {
                ticked += level.run_pause_frame(self.context, &mut self.units, &self.config);
            }
        }
        debug!(frame = self.frame, ticked, "Pause frame");
        Ok(ticked)
    }

    /// Snapshot every registered unit of every visible level.
    pub fn dump(&self, filter: DumpFilter) -> TickDump {
        dump::collect(
            self.frame,
            &self.units,
            self.levels
                .iter()
                .flatten()
                .filter(|level| level.is_visible()),
            filter,
        )
    }
}

impl Drop for TickManager {
    fn drop(&mut self) {
        if self.state != FrameState::Idle {
            // Units may still be running against our spawn queues
            self.sequencer.force_drain();
        }
    }
}

impl std::fmt::Debug for TickManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickManager")
            .field("frame", &self.frame)
            .field("state", &self.state)
            .field("units", &self.units.len())
            .field("levels", &self.levels.iter().flatten().count())
            .field("sequencer", &self.sequencer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::context::TickContext;

    fn manager() -> TickManager {
        TickManager::new(TickConfig::default().with_single_threaded(Some(true)))
    }

    fn noop(name: &str) -> TickUnitDesc {
        TickUnitDesc::new(name, |_: &TickContext<'_>| {})
    }

    #[test]
    fn test_frame_state_transitions() {
        let mut ticks = manager();
        assert_eq!(ticks.frame_state(), FrameState::Idle);

        ticks.start_frame(0.016, LevelTick::All).unwrap();
        assert_eq!(ticks.frame_state(), FrameState::Ticking(TickGroup::PrePhysics));
        for group in TickGroup::REGULAR {
            ticks.run_group(group, true).unwrap();
        }
        assert_eq!(ticks.frame_state(), FrameState::CatchUp);
        ticks.end_frame().unwrap();
        assert_eq!(ticks.frame_state(), FrameState::Idle);
        assert_eq!(ticks.frame(), 1);
    }

    #[test]
    fn test_protocol_errors() {
        let mut ticks = manager();
        assert_eq!(
            ticks.run_group(TickGroup::PrePhysics, true),
            Err(TickError::NoFrameInProgress)
        );
        assert_eq!(ticks.end_frame(), Err(TickError::NoFrameInProgress));

        ticks.start_frame(0.016, LevelTick::All).unwrap();
        assert_eq!(
            ticks.start_frame(0.016, LevelTick::All),
            Err(TickError::FrameInProgress(1))
        );
        assert_eq!(
            ticks.run_group(TickGroup::StartPhysics, true),
            Err(TickError::OutOfOrder {
                expected: TickGroup::PrePhysics,
                requested: TickGroup::StartPhysics,
            })
        );
        for group in TickGroup::REGULAR.into_iter().take(6) {
            ticks.run_group(group, true).unwrap();
        }
        assert_eq!(
            ticks.run_group(TickGroup::LastDemotable, false),
            Err(TickError::MustBlock(TickGroup::LastDemotable))
        );
        ticks.run_group(TickGroup::LastDemotable, true).unwrap();
        ticks.end_frame().unwrap();
    }

    #[test]
    fn test_registration_errors() {
        let mut ticks = manager();
        let a = ticks.spawn_unit(LevelId::PERSISTENT, noop("a")).unwrap();
        assert_eq!(
            ticks.register_unit(LevelId::PERSISTENT, a),
            Err(TickError::AlreadyRegistered(a))
        );

        let reserved = ticks.spawn_unit(
            LevelId::PERSISTENT,
            noop("reserved").group(TickGroup::NewlySpawned),
        );
        assert_eq!(reserved, Err(TickError::ReservedGroup(TickGroup::NewlySpawned)));
        assert_eq!(ticks.unit_count(), 1);

        let missing = LevelId::new(9);
        assert_eq!(
            ticks.spawn_unit(missing, noop("b")),
            Err(TickError::UnknownLevel(missing))
        );

        ticks.remove_unit(a).unwrap();
        assert_eq!(ticks.unregister_unit(a), Err(TickError::UnknownUnit(a)));
    }

    #[test]
    fn test_unregister_twice_is_noop() {
        let mut ticks = manager();
        let a = ticks.spawn_unit(LevelId::PERSISTENT, noop("a")).unwrap();
        ticks.unregister_unit(a).unwrap();
        ticks.unregister_unit(a).unwrap();
        assert!(!ticks.is_registered(a));
    }

    #[test]
    fn test_dedicated_server_skips_opted_out_units() {
        let mut ticks = TickManager::new(TickConfig::default().with_dedicated_server(true));
        assert!(ticks.is_single_threaded());

        let a = ticks
            .spawn_unit(LevelId::PERSISTENT, noop("client").allow_on_dedicated_server(false))
            .unwrap();
        assert!(!ticks.is_registered(a));
        let b = ticks.spawn_unit(LevelId::PERSISTENT, noop("server")).unwrap();
        assert!(ticks.is_registered(b));
    }

    #[test]
    fn test_set_enabled_moves_between_sets() {
        let mut ticks = manager();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let a = ticks
            .spawn_unit(
                LevelId::PERSISTENT,
                TickUnitDesc::new("a", move |_: &TickContext<'_>| {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        ticks.set_enabled(a, false).unwrap();
        assert_eq!(ticks.state(a), Some(TickState::Disabled));
        ticks.tick_frame(0.016, LevelTick::All).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        ticks.set_enabled(a, true).unwrap();
        ticks.tick_frame(0.016, LevelTick::All).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let dump = ticks.dump(DumpFilter::ALL);
        assert_eq!((dump.enabled, dump.disabled), (1, 0));
    }

    #[test]
    fn test_set_interval_zero_leaves_cooldown() {
        let mut ticks = manager();
        let a = ticks
            .spawn_unit(LevelId::PERSISTENT, noop("a").interval(10.0))
            .unwrap();
        ticks.tick_frame(0.016, LevelTick::All).unwrap();
        assert_eq!(ticks.state(a), Some(TickState::CoolingDown));

        ticks.set_interval(a, 0.0).unwrap();
        assert_eq!(ticks.state(a), Some(TickState::Enabled));
    }

    #[test]
    fn test_high_priority_propagates() {
        let mut ticks = manager();
        let a = ticks.spawn_unit(LevelId::PERSISTENT, noop("a")).unwrap();
        let b = ticks
            .spawn_unit(LevelId::PERSISTENT, noop("b").prerequisite(a))
            .unwrap();
        let c = ticks
            .spawn_unit(LevelId::PERSISTENT, noop("c").prerequisite(b))
            .unwrap();
        // Cycle back to the top must not loop forever
        ticks.add_prerequisite(a, c).unwrap();

        ticks.set_high_priority(c, true, true).unwrap();
        let dump = ticks.dump(DumpFilter::ALL);
        for id in [a, b, c] {
            assert!(dump.entry(id).unwrap().high_priority);
        }

        ticks.set_high_priority(c, false, false).unwrap();
        let dump = ticks.dump(DumpFilter::ALL);
        assert!(!dump.entry(c).unwrap().high_priority);
        assert!(dump.entry(b).unwrap().high_priority);
    }

    #[test]
    fn test_hidden_level_does_not_tick() {
        let mut ticks = manager();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let level = ticks.add_level();
        ticks
            .spawn_unit(
                level,
                TickUnitDesc::new("streamed", move |_: &TickContext<'_>| {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        ticks.set_level_visible(level, false).unwrap();
        ticks.tick_frame(0.016, LevelTick::All).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        ticks.set_level_visible(level, true).unwrap();
        ticks.tick_frame(0.016, LevelTick::All).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert_eq!(
            ticks.set_level_visible(LevelId::PERSISTENT, false),
            Err(TickError::PersistentLevel)
        );
    }

    #[test]
    fn test_remove_level_unregisters_units() {
        let mut ticks = manager();
        let level = ticks.add_level();
        let a = ticks.spawn_unit(level, noop("a")).unwrap();

        ticks.remove_level(level).unwrap();
        assert!(!ticks.is_registered(a));
        assert_eq!(ticks.remove_level(level), Err(TickError::UnknownLevel(level)));
        assert_eq!(
            ticks.remove_level(LevelId::PERSISTENT),
            Err(TickError::PersistentLevel)
        );

        // The unit can move to another level
        ticks.register_unit(LevelId::PERSISTENT, a).unwrap();
        assert_eq!(ticks.unit_level(a), Some(LevelId::PERSISTENT));
    }

    #[test]
    fn test_registered_mid_frame_ticks_same_frame() {
        let mut ticks = manager();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        ticks.start_frame(0.016, LevelTick::All).unwrap();
        ticks.run_group(TickGroup::PrePhysics, true).unwrap();
        let late = ticks
            .spawn_unit(
                LevelId::PERSISTENT,
                TickUnitDesc::new("late", move |_: &TickContext<'_>| {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        for group in TickGroup::REGULAR.into_iter().skip(1) {
            ticks.run_group(group, true).unwrap();
        }
        ticks.end_frame().unwrap();

        // Queued after StartPhysics ran, then pushed past the physics group
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(ticks.actual_group(late), Some(TickGroup::EndPhysics));
    }

    #[test]
    fn test_enabled_mid_frame_ticks_next_frame() {
        let mut ticks = manager();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let unit = ticks
            .spawn_unit(
                LevelId::PERSISTENT,
                TickUnitDesc::new("dormant", move |_: &TickContext<'_>| {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .disabled(),
            )
            .unwrap();

        ticks.start_frame(0.016, LevelTick::All).unwrap();
        ticks.run_group(TickGroup::PrePhysics, true).unwrap();
        ticks.set_enabled(unit, true).unwrap();
        for group in TickGroup::REGULAR.into_iter().skip(1) {
            ticks.run_group(group, true).unwrap();
        }
        ticks.end_frame().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(ticks.state(unit), Some(TickState::Enabled));

        ticks.tick_frame(0.016, LevelTick::All).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interval_cleared_mid_frame_ticks_next_frame() {
        let mut ticks = manager();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let unit = ticks
            .spawn_unit(
                LevelId::PERSISTENT,
                TickUnitDesc::new("slow", move |_: &TickContext<'_>| {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .interval(10.0),
            )
            .unwrap();
        ticks.tick_frame(0.016, LevelTick::All).unwrap();
        assert_eq!(ticks.state(unit), Some(TickState::CoolingDown));

        ticks.start_frame(0.016, LevelTick::All).unwrap();
        ticks.run_group(TickGroup::PrePhysics, true).unwrap();
        ticks.set_interval(unit, 0.0).unwrap();
        for group in TickGroup::REGULAR.into_iter().skip(1) {
            ticks.run_group(group, true).unwrap();
        }
        ticks.end_frame().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        ticks.tick_frame(0.016, LevelTick::All).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
