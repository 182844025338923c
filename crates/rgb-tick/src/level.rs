//! Levels - containers of registered units.
//!
//! A registered unit sits in exactly one of the enabled set, the disabled set
//! or the cooldown list of its level. Units registered while the level's frame
//! is in flight are also pushed onto the spawn queue so the catch-up pass can
//! still tick them this frame.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{debug, error, warn};

use crate::{
    config::TickConfig,
    context::{FrameContext, PendingSpawn, SpawnQueue, TickThread},
    cooldown::CooldownList,
    error::{TickError, TickResult},
    group::TickGroup,
    registry::{UnitId, UnitSlots},
    resolver::Resolver,
    sequencer::TickSequencer,
    task::TickWork,
    unit::{TickState, TickUnit},
};

/// Handle to a level owned by a [`TickManager`](crate::TickManager).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LevelId(u32);

impl LevelId {
    /// The level every manager starts with. Always visible, never removed.
    pub const PERSISTENT: Self = Self(0);

    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Decide whether `unit` may be registered at all.
///
/// Declaring the catch-up group is an error; on a dedicated server units that
/// opted out are silently skipped (`Ok(false)`).
pub(crate) fn check_admission(unit: &TickUnit, config: &TickConfig) -> TickResult<bool> {
    if unit.tick_group.is_catch_up() {
        return Err(TickError::ReservedGroup(unit.tick_group));
    }
    Ok(!config.dedicated_server || unit.allow_on_dedicated_server)
}

/// Per-level scheduling state.
pub(crate) struct TickLevel {
    id: LevelId,
    enabled: FxHashSet<UnitId>,
    disabled: FxHashSet<UnitId>,
    cooling_down: CooldownList,
    /// Cooldown units due this frame, with the offset into the frame at which
    /// they woke. Filled by `start_frame`, consumed by `queue_all_ticks`.
    promoted: Vec<(UnitId, f32)>,
    spawner: Arc<SpawnQueue>,
    context: FrameContext,
    /// True between `start_frame` and `end_frame`.
    tick_newly_spawned: bool,
    visible: bool,
}

impl TickLevel {
    pub(crate) fn new(id: LevelId) -> Self {
        Self {
            id,
            enabled: FxHashSet::default(),
            disabled: FxHashSet::default(),
            cooling_down: CooldownList::default(),
            promoted: Vec::new(),
            spawner: Arc::new(SpawnQueue::default()),
            context: FrameContext::default(),
            tick_newly_spawned: false,
            visible: true,
        }
    }

    pub(crate) const fn id(&self) -> LevelId {
        self.id
    }

    pub(crate) const fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Number of registered units.
    pub(crate) fn len(&self) -> usize {
        self.enabled.len() + self.disabled.len() + self.cooling_down.len() + self.promoted.len()
    }

    pub(crate) fn enabled(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.enabled
            .iter()
            .copied()
            .chain(self.promoted.iter().map(|(id, _)| *id))
    }

    pub(crate) fn disabled(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.disabled.iter().copied()
    }

    /// Cooling down units with their remaining cooldown.
    pub(crate) fn cooling_down(&self) -> impl Iterator<Item = (UnitId, f32)> + '_ {
        self.cooling_down.iter()
    }

    pub(crate) fn pending_spawns(&self) -> usize {
        self.spawner.len()
    }

    /// Every registered unit, in no particular order.
    pub(crate) fn unit_ids(&self) -> Vec<UnitId> {
        self.enabled()
            .chain(self.disabled())
            .chain(self.cooling_down().map(|(id, _)| id))
            .collect()
    }

    /// Place `unit` into the set matching its state. Unlike `add_unit` this
    /// never queues it for the frame in progress.
    pub(crate) fn insert(&mut self, id: UnitId, unit: &mut TickUnit) {
        unit.level = Some(self.id);
        unit.spawner = Some(Arc::clone(&self.spawner));
        if unit.state == TickState::Disabled {
            self.disabled.insert(id);
        } else {
            unit.state = TickState::Enabled;
            self.enabled.insert(id);
        }
    }

    /// Register `unit` with this level.
    pub(crate) fn add_unit(&mut self, id: UnitId, unit: &mut TickUnit) {
        self.insert(id, unit);
        if self.tick_newly_spawned && unit.state == TickState::Enabled {
            self.spawner.push(PendingSpawn::Registered(id));
        }
    }

    /// Take `unit` out of whichever collection holds it.
    ///
    /// A pending spawn entry for it stays queued and is skipped on drain.
    pub(crate) fn remove_unit(&mut self, id: UnitId, unit: &mut TickUnit) -> bool {
        let before = self.promoted.len();
        self.promoted.retain(|(promoted, _)| *promoted != id);
        let removed = self.enabled.remove(&id)
            | self.disabled.remove(&id)
            | self.cooling_down.remove(id)
            | (self.promoted.len() != before);
        unit.level = None;
        unit.spawner = None;
        removed
    }

    /// Drop units whose owner is gone from every collection.
    fn evict_dead(&mut self, units: &mut UnitSlots) {
        let mut evicted: Vec<UnitId> = self
            .enabled
            .iter()
            .chain(self.disabled.iter())
            .copied()
            .filter(|id| !units.is_alive(*id))
            .collect();
        for id in &evicted {
            self.enabled.remove(id);
            self.disabled.remove(id);
        }
        evicted.extend(self.cooling_down.retain(|id| units.is_alive(id)));

        for id in evicted {
            debug!(unit = %id, level = self.id.0, "Evicting unit whose owner was dropped");
            if let Some(unit) = units.get_mut(id) {
                unit.level = None;
                unit.spawner = None;
            }
        }
    }

    /// Begin a frame: evict dead units and wake cooldown units that are due.
    ///
    /// Returns the number of units that will be considered this frame.
    pub(crate) fn start_frame(&mut self, context: FrameContext, units: &mut UnitSlots) -> usize {
        self.context = FrameContext {
            group: TickGroup::PrePhysics,
            ..context
        };
        self.tick_newly_spawned = true;

        self.evict_dead(units);

        self.promoted = self.cooling_down.promote(context.delta_seconds);
        for (id, _) in &self.promoted {
            if let Some(unit) = units.get_mut(*id) {
                unit.state = TickState::Enabled;
            }
        }

        self.enabled.len() + self.promoted.len()
    }

    /// Queue every enabled unit and move interval units into the cooldown
    /// list. Returns the number of units dispatched.
    pub(crate) fn queue_all_ticks(
        &mut self,
        units: &mut UnitSlots,
        sequencer: &mut TickSequencer,
        config: &TickConfig,
    ) -> usize {
        let delta = self.context.delta_seconds;
        let mut staged = Vec::new();
        let mut dispatched = 0;
        let mut resolver = Resolver {
            units,
            sequencer,
            config,
            context: self.context,
        };

        let enabled: Vec<UnitId> = self.enabled.iter().copied().collect();
        for id in enabled {
            dispatched += usize::from(resolver.queue(id));
            let interval = resolver.units.get(id).map_or(0.0, |unit| unit.interval);
            if interval > 0.0 {
                self.enabled.remove(&id);
                staged.push((id, interval));
            }
        }

        for (id, woke_at) in std::mem::take(&mut self.promoted) {
            dispatched += usize::from(resolver.queue(id));
            let interval = resolver.units.get(id).map_or(0.0, |unit| unit.interval);
            if interval > 0.0 {
                // Credit the overrun since the unit became due, at most one interval
                staged.push((id, (interval - (delta - woke_at)).max(0.0)));
            } else {
                self.enabled.insert(id);
            }
        }

        self.schedule_cooldowns(staged, units);
        dispatched
    }

    /// Queue units registered since the last pass into `group`.
    ///
    /// Descriptions spawned by running unit bodies are registered first.
    /// Returns the number of units queued; the spawn queue ends empty.
    pub(crate) fn queue_newly_spawned(
        &mut self,
        group: TickGroup,
        units: &mut UnitSlots,
        sequencer: &mut TickSequencer,
        config: &TickConfig,
    ) -> usize {
        self.context.group = group;
        let pending = self.admit_pending(units, config);

        let mut staged = Vec::new();
        let mut resolver = Resolver {
            units,
            sequencer,
            config,
            context: self.context,
        };
        let mut queued = 0;
        for id in pending {
            resolver.queue(id);
            queued += 1;
            let interval = resolver.units.get(id).map_or(0.0, |unit| unit.interval);
            if interval > 0.0 && self.enabled.remove(&id) {
                staged.push((id, interval));
            }
        }

        self.schedule_cooldowns(staged, units);
        queued
    }

    /// Drain the spawn queue, registering spawned descriptions. Returns the
    /// enabled units of this level that still need queueing.
    fn admit_pending(&mut self, units: &mut UnitSlots, config: &TickConfig) -> Vec<UnitId> {
        let mut pending = Vec::with_capacity(self.spawner.len());
        while let Some(spawn) = self.spawner.pop() {
            let id = match spawn {
                PendingSpawn::Registered(id) => id,
                PendingSpawn::Spawned(desc) => {
                    let unit = TickUnit::from_desc(desc);
                    match check_admission(&unit, config) {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(name = unit.name(), "Skipping spawned unit on dedicated server");
                            continue;
                        }
                        Err(err) => {
                            warn!(name = unit.name(), "Rejected spawned unit: {}", err);
                            continue;
                        }
                    }
                    let id = units.insert(unit);
                    if let Some(unit) = units.get_mut(id) {
                        self.insert(id, unit);
                    }
                    id
                }
            };
            let queueable = units.get(id).is_some_and(|unit| {
                unit.level == Some(self.id) && unit.state == TickState::Enabled
            });
            if queueable && !pending.contains(&id) {
                pending.push(id);
            }
        }
        pending
    }

    /// Mark staged units as cooling down and merge them into the list.
    fn schedule_cooldowns(&mut self, staged: Vec<(UnitId, f32)>, units: &mut UnitSlots) {
        if staged.is_empty() {
            return;
        }
        for (id, _) in &staged {
            if let Some(unit) = units.get_mut(*id) {
                unit.state = TickState::CoolingDown;
            }
        }
        self.cooling_down.schedule(staged);
    }

    /// Tick pause-aware units synchronously on the calling thread.
    ///
    /// No prerequisites, no groups, no workers. Cooldowns are respected: due
    /// units run and get credit, the rest keep their remaining time.
    pub(crate) fn run_pause_frame(
        &mut self,
        context: FrameContext,
        units: &mut UnitSlots,
        config: &TickConfig,
    ) -> usize {
        debug_assert!(self.promoted.is_empty());
        self.context = FrameContext {
            group: TickGroup::PrePhysics,
            ..context
        };
        self.tick_newly_spawned = true;

        let delta = context.delta_seconds;
        let mut staged = Vec::new();
        let mut ticked = 0;

        let paused = self
            .cooling_down
            .extract(|id| units.get(id).is_some_and(|unit| unit.tick_even_when_paused));
        for (id, remaining) in paused {
            let Some(unit) = units.get_mut(id) else {
                continue;
            };
            if remaining <= delta {
                self.tick_now(id, unit, config);
                ticked += 1;
                staged.push((id, (unit.interval - (delta - remaining)).max(0.0)));
            } else {
                staged.push((id, remaining - delta));
            }
        }

        let enabled: Vec<UnitId> = self.enabled.iter().copied().collect();
        for id in enabled {
            let Some(unit) = units.get_mut(id) else {
                continue;
            };
            if !unit.tick_even_when_paused || unit.state != TickState::Enabled {
                continue;
            }
            self.tick_now(id, unit, config);
            ticked += 1;
            if unit.interval > 0.0 {
                self.enabled.remove(&id);
                staged.push((id, unit.interval));
            }
        }

        self.schedule_cooldowns(staged, units);

        // Units spawned during a pause frame are registered, not ticked
        self.admit_pending(units, config);
        self.tick_newly_spawned = false;
        ticked
    }

    fn tick_now(&self, id: UnitId, unit: &mut TickUnit, config: &TickConfig) {
        let frame = self.context.frame;
        unit.visited_frame = frame;
        unit.queued_frame = frame;
        unit.completion = None;
        TickWork {
            unit: id,
            name: unit.name().to_owned(),
            function: unit.function.clone(),
            spawner: Arc::clone(&self.spawner),
            delta_seconds: self.context.delta_seconds,
            kind: self.context.kind,
            group: TickGroup::PrePhysics,
            frame,
            high_priority: unit.high_priority,
            log_tick: config.log_ticks,
        }
        .run(TickThread::Primary);
    }

    /// Close the frame. Nothing may be left in the spawn queue.
    ///
    /// # Panics
    ///
    /// In debug builds, if spawned units were never queued.
    pub(crate) fn end_frame(&mut self) {
        self.tick_newly_spawned = false;
        let pending = self.spawner.len();
        if pending > 0 {
            if cfg!(debug_assertions) {
                panic!("{pending} newly spawned units left in level {} at end of frame", self.id.0);
            }
            error!(
                pending,
                level = self.id.0,
                "Newly spawned units left at end of frame, carrying them over"
            );
        }
        debug_assert!(self.promoted.is_empty());
    }

    /// Close an aborted frame, carrying spawns over to the next one.
    pub(crate) fn abort_frame(&mut self) {
        self.tick_newly_spawned = false;
        for (id, _) in std::mem::take(&mut self.promoted) {
            self.enabled.insert(id);
        }
    }
}

impl std::fmt::Debug for TickLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickLevel")
            .field("id", &self.id)
            .field("enabled", &self.enabled.len())
            .field("disabled", &self.disabled.len())
            .field("cooling_down", &self.cooling_down.len())
            .field("pending_spawns", &self.spawner.len())
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}
