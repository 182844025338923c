//! Scheduler error types.

use thiserror::Error;

use crate::{group::TickGroup, level::LevelId, registry::UnitId};

/// Protocol violations reported by [`TickManager`](crate::TickManager).
///
/// Structural problems (cycles, stale prerequisites) are not errors; they are
/// logged and healed during resolution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TickError {
    /// The unit id is stale or was never handed out.
    #[error("unknown tick unit: {0}")]
    UnknownUnit(UnitId),

    /// The level id does not name a live level.
    #[error("unknown level: {0:?}")]
    UnknownLevel(LevelId),

    /// The unit is already registered with a level.
    #[error("tick unit {0} is already registered")]
    AlreadyRegistered(UnitId),

    /// Units cannot declare the catch-up group.
    #[error("tick group {0} is reserved for newly spawned units")]
    ReservedGroup(TickGroup),

    /// `run_group` was called for a group other than the current one.
    #[error("tick group {requested} run out of order, expected {expected}")]
    OutOfOrder {
        /// Group the frame is waiting to run.
        expected: TickGroup,
        /// Group the caller asked for.
        requested: TickGroup,
    },

    /// Frame operation called while no frame is in progress.
    #[error("no frame in progress")]
    NoFrameInProgress,

    /// `start_frame` called while a frame is still running.
    #[error("frame {0} is still in progress")]
    FrameInProgress(u64),

    /// Non-blocking release of a group that has to be joined.
    #[error("tick group {0} must be run blocking")]
    MustBlock(TickGroup),

    /// The persistent level cannot be removed or hidden.
    #[error("the persistent level cannot be removed or hidden")]
    PersistentLevel,

    /// Newly spawned units kept spawning more units past the catch-up limit.
    #[error("newly spawned units did not settle after {0} iterations")]
    RunawaySpawn(u32),
}

/// Result type for scheduler operations.
pub type TickResult<T> = Result<T, TickError>;
