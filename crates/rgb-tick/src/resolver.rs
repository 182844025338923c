//! Prerequisite resolution.
//!
//! Walks a unit's prerequisites depth first the first time the unit is
//! touched in a frame, computes the group it actually runs in and the
//! completion handles it has to wait for, then hands it to the sequencer.
//!
//! Two frame stamps drive the walk: `visited_frame` is set on entry and
//! `queued_frame` once resolution finished. A prerequisite that is visited but
//! still not queued when its dependent folds its prerequisites is an ancestor
//! on the current path, i.e. a cycle. That edge is skipped for this frame.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::{
    config::TickConfig,
    context::FrameContext,
    group::TickGroup,
    registry::{UnitId, UnitSlots},
    sequencer::TickSequencer,
    task::{CompletionHandle, TickWork},
    unit::{TickState, TickUnit},
};

/// Borrowed view of the manager used while queueing one level.
pub(crate) struct Resolver<'a> {
    pub(crate) units: &'a mut UnitSlots,
    pub(crate) sequencer: &'a mut TickSequencer,
    pub(crate) config: &'a TickConfig,
    pub(crate) context: FrameContext,
}

/// One step of the prerequisite walk.
#[derive(Copy, Clone, Debug)]
enum Visit {
    /// First touch: stamp the unit and schedule its prerequisites.
    Enter(UnitId),
    /// Every prerequisite has been walked: fold them and dispatch.
    Exit(UnitId),
}

impl Resolver<'_> {
    /// Resolve `id` and, if enabled, queue it with the sequencer.
    ///
    /// The walk runs on an explicit stack, so chain length is bounded by
    /// memory rather than by the calling thread's stack.
    ///
    /// Returns true if the unit was dispatched by this call.
    pub(crate) fn queue(&mut self, id: UnitId) -> bool {
        let mut stack = vec![Visit::Enter(id)];
        let mut dispatched = false;

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(unit) => self.enter(unit, &mut stack),
                Visit::Exit(unit) => {
                    let queued = self.exit(unit);
                    if unit == id {
                        dispatched = queued;
                    }
                }
            }
        }

        dispatched
    }

    fn enter(&mut self, id: UnitId, stack: &mut Vec<Visit>) {
        let frame = self.context.frame;
        let Some(unit) = self.units.get_mut(id) else {
            return;
        };
        if unit.visited_frame == frame {
            return;
        }
        unit.visited_frame = frame;
        unit.completion = None;
        let prerequisites = unit.prerequisites.clone();

        stack.push(Visit::Exit(id));
        // Reversed so prerequisites resolve in declaration order
        for &prerequisite in prerequisites.iter().rev() {
            let registered = self
                .units
                .get(prerequisite)
                .is_some_and(|p| p.is_registered() && p.visited_frame != frame);
            if registered && self.units.is_alive(prerequisite) {
                stack.push(Visit::Enter(prerequisite));
            }
        }
    }

    fn exit(&mut self, id: UnitId) -> bool {
        let frame = self.context.frame;
        let Some(prerequisites) = self.units.get(id).map(|unit| unit.prerequisites.clone()) else {
            return false;
        };

        let mut max_prerequisite = TickGroup::PrePhysics;
        let mut wait_list: SmallVec<[CompletionHandle; 4]> = SmallVec::new();
        let mut stale: SmallVec<[UnitId; 4]> = SmallVec::new();

        for prerequisite in prerequisites {
            if !self.units.is_alive(prerequisite) {
                stale.push(prerequisite);
                continue;
            }
            let Some(resolved) = self.units.get(prerequisite) else {
                continue;
            };
            if !resolved.is_registered() {
                continue;
            }
            // Visited but not yet queued: an ancestor on the current path
            if resolved.queued_frame != frame {
                warn!(
                    "While processing prerequisites for {}, could not use {} because it would form a cycle",
                    self.units.get(id).map_or("<removed>", TickUnit::name),
                    resolved.name()
                );
                continue;
            }
            // Disabled or cooling down prerequisites were not dispatched this frame
            if let Some(handle) = &resolved.completion {
                max_prerequisite = max_prerequisite.max(resolved.actual_group);
                wait_list.push(handle.clone());
            }
        }

        let log_prerequisites = self.sequencer.log_ticks() && self.config.log_prerequisites;
        let Some(unit) = self.units.get_mut(id) else {
            return false;
        };

        if !stale.is_empty() {
            debug!(unit = %id, count = stale.len(), "Dropping stale prerequisites");
            unit.prerequisites.retain(|p| !stale.contains(p));
        }

        let mut actual = unit.tick_group.max(self.context.group).max(max_prerequisite);
        if Some(actual) == self.config.narrow_contract_group && unit.tick_group != actual {
            actual = actual.next();
        }
        unit.actual_group = actual;
        unit.queued_frame = frame;

        if unit.state != TickState::Enabled {
            return false;
        }
        let Some(spawner) = unit.spawner.clone() else {
            debug!(unit = %id, "Skipping unit without a level");
            return false;
        };

        let work = TickWork {
            unit: id,
            name: unit.name().to_owned(),
            function: unit.function.clone(),
            spawner,
            delta_seconds: self.context.delta_seconds,
            kind: self.context.kind,
            group: actual,
            frame,
            high_priority: unit.high_priority,
            log_tick: self.sequencer.log_ticks(),
        };
        let promoted = actual != unit.tick_group;
        let handle = self
            .sequencer
            .queue_tick(work, unit.run_on_any_thread, promoted, &wait_list);
        unit.completion = Some(handle);

        if log_prerequisites {
            self.log_prerequisites(id);
        }
        true
    }

    /// Log the prerequisite tree of `root`, each unit once.
    fn log_prerequisites(&self, root: UnitId) {
        let mut seen = FxHashSet::default();
        let mut stack = vec![(root, 0_usize)];
        while let Some((id, depth)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(unit) = self.units.get(id) else {
                info!("tick prerequisite {:indent$}<invalid> {}", "", id, indent = depth * 2);
                continue;
            };
            if depth > 0 {
                info!(
                    "tick prerequisite {:indent$}{} ({})",
                    "",
                    unit.name(),
                    unit.actual_group,
                    indent = depth * 2
                );
            }
            for &prerequisite in unit.prerequisites.iter().rev() {
                stack.push((prerequisite, depth + 1));
            }
        }
    }
}
