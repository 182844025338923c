//! Per-frame tick scheduling.
//!
//! Decides, for many independently updating units, in which phase, in which
//! order and on which thread each unit's per-frame update runs. Ordering
//! comes from tick groups and prerequisite edges; sparse updates come from
//! per-unit intervals.
//!
//! # Frame Model
//!
//! ```text
//! Frame N:
//! ┌─────────────────────────────────────────────────────────────┐
//! │  start_frame: wake due cooldown units, resolve and queue    │
//! │               every enabled unit (nothing runs yet)         │
//! │  run_group(PrePhysics)     release, join, catch up spawns   │
//! │  run_group(StartPhysics)                                    │
//! │  run_group(DuringPhysics)  may be released without joining  │
//! │  run_group(EndPhysics)                                      │
//! │  run_group(PostPhysics)                                     │
//! │  run_group(PostUpdateWork)                                  │
//! │  run_group(LastDemotable)  then NewlySpawned until settled  │
//! │  end_frame: everything joined, spawn queues empty           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A unit runs in the later of its declared group and the groups of its
//! scheduled prerequisites, and never starts before they finished. Units that
//! opted in run on a rayon pool; the rest run on the thread driving the frame
//! while it waits for a group.
//!
//! # Example
//!
//! ```ignore
//! use rgb_tick::prelude::*;
//!
//! let mut ticks = TickManager::new(TickConfig::from_env());
//! let input = ticks.spawn_unit(
//!     LevelId::PERSISTENT,
//!     TickUnitDesc::new("input", |_: &TickContext<'_>| poll_input()),
//! )?;
//! ticks.spawn_unit(
//!     LevelId::PERSISTENT,
//!     TickUnitDesc::new("ai", |ctx: &TickContext<'_>| think(ctx.delta_seconds()))
//!         .prerequisite(input)
//!         .interval(0.25)
//!         .run_on_any_thread(true),
//! )?;
//!
//! loop {
//!     ticks.tick_frame(1.0 / 60.0, LevelTick::All)?;
//! }
//! ```

mod config;
mod context;
mod cooldown;
mod dump;
mod error;
mod group;
mod level;
mod manager;
mod registry;
mod resolver;
mod sequencer;
mod task;
mod unit;

pub use config::TickConfig;
pub use context::{LevelTick, TickContext, TickThread};
pub use dump::{DumpEntry, DumpFilter, DumpPrerequisite, LevelDump, TickDump};
pub use error::{TickError, TickResult};
pub use group::TickGroup;
pub use level::LevelId;
pub use manager::{FrameState, TickManager};
pub use registry::{Generation, UnitId};
pub use task::CompletionHandle;
pub use unit::{TickFunction, TickState, TickUnitDesc};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        LevelId, LevelTick, TickConfig, TickContext, TickGroup, TickManager, TickUnitDesc, UnitId,
    };
}
