//! Frame context handed to the scheduler and to unit bodies.

use crossbeam::queue::SegQueue;

use crate::{group::TickGroup, registry::UnitId, unit::TickUnitDesc};

/// What kind of frame is being ticked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum LevelTick {
    /// Update time only.
    TimeOnly,
    /// Update only viewports.
    ViewportsOnly,
    /// Update everything.
    #[default]
    All,
    /// Delta time is zero, only pause-aware units tick.
    PauseTick,
}

/// Thread a unit body is executing on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TickThread {
    /// The thread driving the frame.
    Primary,
    /// A pool worker.
    Worker,
}

/// Per-frame scheduling context shared by levels and the manager.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct FrameContext {
    pub(crate) delta_seconds: f32,
    pub(crate) kind: LevelTick,
    /// Group new work is queued into; advanced as groups are released.
    pub(crate) group: TickGroup,
    pub(crate) frame: u64,
}

impl Default for FrameContext {
    fn default() -> Self {
        Self {
            delta_seconds: 0.0,
            kind: LevelTick::All,
            group: TickGroup::PrePhysics,
            frame: 0,
        }
    }
}

/// A unit that showed up after the frame's queueing pass.
pub(crate) enum PendingSpawn {
    /// Registered from the primary thread between groups.
    Registered(UnitId),
    /// Spawned by a running unit body; registered when drained.
    Spawned(TickUnitDesc),
}

/// Insertion-safe capture of newly spawned units for one level.
///
/// This is the only per-level structure written from worker threads.
#[derive(Default)]
pub(crate) struct SpawnQueue {
    pending: SegQueue<PendingSpawn>,
}

impl SpawnQueue {
    pub(crate) fn push(&self, spawn: PendingSpawn) {
        self.pending.push(spawn);
    }

    pub(crate) fn pop(&self) -> Option<PendingSpawn> {
        self.pending.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for SpawnQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnQueue")
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Everything a unit body can see about the tick it is running in.
pub struct TickContext<'a> {
    pub(crate) unit: UnitId,
    pub(crate) delta_seconds: f32,
    pub(crate) kind: LevelTick,
    pub(crate) group: TickGroup,
    pub(crate) thread: TickThread,
    pub(crate) frame: u64,
    pub(crate) spawner: &'a SpawnQueue,
}

impl TickContext<'_> {
    /// The unit being ticked.
    #[must_use]
    pub const fn unit(&self) -> UnitId {
        self.unit
    }

    /// Seconds since the previous frame.
    #[must_use]
    pub const fn delta_seconds(&self) -> f32 {
        self.delta_seconds
    }

    #[must_use]
    pub const fn kind(&self) -> LevelTick {
        self.kind
    }

    /// Group the unit actually runs in this frame.
    #[must_use]
    pub const fn group(&self) -> TickGroup {
        self.group
    }

    #[must_use]
    pub const fn thread(&self) -> TickThread {
        self.thread
    }

    /// Frame counter of the manager that dispatched this tick.
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Register a new unit in the level of the unit being ticked.
    ///
    /// Enabled units spawned this way still tick this frame, in the group
    /// after the one currently releasing or in the catch-up group.
    pub fn spawn(&self, desc: TickUnitDesc) {
        self.spawner.push(PendingSpawn::Spawned(desc));
    }
}

impl std::fmt::Debug for TickContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickContext")
            .field("unit", &self.unit)
            .field("delta_seconds", &self.delta_seconds)
            .field("kind", &self.kind)
            .field("group", &self.group)
            .field("thread", &self.thread)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}
