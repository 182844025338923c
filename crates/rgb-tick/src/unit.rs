//! Tickable units: the registered periodic tasks the scheduler sequences.

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    context::{SpawnQueue, TickContext},
    group::TickGroup,
    level::LevelId,
    registry::UnitId,
    task::CompletionHandle,
};

/// Scheduling state of a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TickState {
    /// Runs every eligible frame.
    #[default]
    Enabled,
    /// Registered but never scheduled.
    Disabled,
    /// Enabled with an interval, waiting in its level's cooldown list.
    CoolingDown,
}

/// The per-frame work of a unit.
///
/// The scheduler never looks inside; it only decides when and where to call
/// [`tick`](TickFunction::tick).
pub trait TickFunction: Send + 'static {
    /// Run one tick.
    fn tick(&mut self, ctx: &TickContext<'_>);
}

// Implement TickFunction for closures
impl<F> TickFunction for F
where
    F: FnMut(&TickContext<'_>) + Send + 'static,
{
    fn tick(&mut self, ctx: &TickContext<'_>) {
        self(ctx);
    }
}

/// Shared, lockable tick body. Work items clone the `Arc`, not the unit.
pub(crate) type SharedTickFn = Arc<Mutex<Box<dyn TickFunction>>>;

/// Owner liveness check for units tied to some other object.
pub(crate) type OwnerRef = Weak<dyn Any + Send + Sync>;

/// Builder describing a unit before it is added to a manager.
///
/// # Example
///
/// ```ignore
/// let id = manager.spawn_unit(
///     LevelId::PERSISTENT,
///     TickUnitDesc::new("camera", |ctx: &TickContext<'_>| {
///         update_camera(ctx.delta_seconds());
///     })
///     .group(TickGroup::PostPhysics)
///     .high_priority(true),
/// )?;
/// ```
pub struct TickUnitDesc {
    pub(crate) name: String,
    pub(crate) group: TickGroup,
    pub(crate) state: TickState,
    pub(crate) interval: f32,
    pub(crate) high_priority: bool,
    pub(crate) run_on_any_thread: bool,
    pub(crate) tick_even_when_paused: bool,
    pub(crate) allow_on_dedicated_server: bool,
    pub(crate) owner: Option<OwnerRef>,
    pub(crate) prerequisites: SmallVec<[UnitId; 4]>,
    pub(crate) function: Box<dyn TickFunction>,
}

impl TickUnitDesc {
    /// Describe an enabled, every-frame `PrePhysics` unit ticking `function`.
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: FnMut(&TickContext<'_>) + Send + 'static,
    {
        Self::from_function(name, function)
    }

    /// Like [`new`](Self::new), for types implementing [`TickFunction`].
    pub fn from_function(name: impl Into<String>, function: impl TickFunction) -> Self {
        Self {
            name: name.into(),
            group: TickGroup::PrePhysics,
            state: TickState::Enabled,
            interval: 0.0,
            high_priority: false,
            run_on_any_thread: false,
            tick_even_when_paused: false,
            allow_on_dedicated_server: true,
            owner: None,
            prerequisites: SmallVec::new(),
            function: Box::new(function),
        }
    }

    /// Group the unit wants to run in.
    #[must_use]
    pub fn group(mut self, group: TickGroup) -> Self {
        self.group = group;
        self
    }

    /// Register the unit disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.state = TickState::Disabled;
        self
    }

    /// Seconds between ticks; zero or less ticks every frame.
    #[must_use]
    pub fn interval(mut self, seconds: f32) -> Self {
        self.interval = seconds;
        self
    }

    #[must_use]
    pub fn high_priority(mut self, high_priority: bool) -> Self {
        self.high_priority = high_priority;
        self
    }

    /// Allow the body to run on a pool worker instead of the primary thread.
    #[must_use]
    pub fn run_on_any_thread(mut self, any_thread: bool) -> Self {
        self.run_on_any_thread = any_thread;
        self
    }

    #[must_use]
    pub fn tick_even_when_paused(mut self, paused: bool) -> Self {
        self.tick_even_when_paused = paused;
        self
    }

    #[must_use]
    pub fn allow_on_dedicated_server(mut self, allow: bool) -> Self {
        self.allow_on_dedicated_server = allow;
        self
    }

    /// Tie the unit's lifetime to `owner`. Once every strong reference is
    /// dropped the unit counts as dead: dependents stop waiting on it and the
    /// cooldown list evicts it.
    #[must_use]
    pub fn owner<T: Any + Send + Sync>(mut self, owner: &Arc<T>) -> Self {
        let weak: Weak<T> = Arc::downgrade(owner);
        self.owner = Some(weak);
        self
    }

    /// Add a prerequisite up front.
    #[must_use]
    pub fn prerequisite(mut self, unit: UnitId) -> Self {
        if !self.prerequisites.contains(&unit) {
            self.prerequisites.push(unit);
        }
        self
    }
}

impl std::fmt::Debug for TickUnitDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickUnitDesc")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("state", &self.state)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// A unit as stored by the manager.
pub(crate) struct TickUnit {
    name: String,
    pub(crate) tick_group: TickGroup,
    pub(crate) actual_group: TickGroup,
    pub(crate) state: TickState,
    pub(crate) interval: f32,
    pub(crate) high_priority: bool,
    pub(crate) run_on_any_thread: bool,
    pub(crate) tick_even_when_paused: bool,
    pub(crate) allow_on_dedicated_server: bool,
    pub(crate) prerequisites: SmallVec<[UnitId; 4]>,
    pub(crate) completion: Option<CompletionHandle>,
    /// Level holding the unit; `None` while unregistered.
    pub(crate) level: Option<LevelId>,
    /// Spawn queue of the owning level, handed to the unit body.
    pub(crate) spawner: Option<Arc<SpawnQueue>>,
    pub(crate) visited_frame: u64,
    pub(crate) queued_frame: u64,
    owner: Option<OwnerRef>,
    pub(crate) function: SharedTickFn,
}

impl TickUnit {
    pub(crate) fn from_desc(desc: TickUnitDesc) -> Self {
        Self {
            name: desc.name,
            tick_group: desc.group,
            actual_group: desc.group,
            state: desc.state,
            interval: desc.interval,
            high_priority: desc.high_priority,
            run_on_any_thread: desc.run_on_any_thread,
            tick_even_when_paused: desc.tick_even_when_paused,
            allow_on_dedicated_server: desc.allow_on_dedicated_server,
            prerequisites: desc.prerequisites,
            completion: None,
            level: None,
            spawner: None,
            visited_frame: 0,
            queued_frame: 0,
            owner: desc.owner,
            function: Arc::new(Mutex::new(desc.function)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) const fn is_registered(&self) -> bool {
        self.level.is_some()
    }

    pub(crate) fn owner_alive(&self) -> bool {
        self.owner
            .as_ref()
            .is_none_or(|owner| owner.strong_count() > 0)
    }

    /// Enabled in the sense of "not disabled": cooling-down units count.
    pub(crate) fn is_enabled(&self) -> bool {
        self.state != TickState::Disabled
    }
}

impl std::fmt::Debug for TickUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickUnit")
            .field("name", &self.name)
            .field("tick_group", &self.tick_group)
            .field("actual_group", &self.actual_group)
            .field("state", &self.state)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}
