//! Task graph nodes and completion handles.
//!
//! Every scheduled unit becomes a [`TaskNode`] carrying a count-down of
//! unfinished prerequisites plus one hold token. The hold is dropped when the
//! node's group is released; the node dispatches itself once the count reaches
//! zero, either onto the worker pool or onto the primary thread's queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use tracing::info;

use crate::{
    context::{LevelTick, SpawnQueue, TickContext, TickThread},
    group::TickGroup,
    registry::UnitId,
    unit::SharedTickFn,
};

/// Where the sequencer sends nodes that became ready.
pub(crate) struct Dispatch {
    pool: Option<rayon::ThreadPool>,
    primary_tx: Sender<Arc<TaskNode>>,
    /// Coalescing wake-up for the primary thread when any node completes.
    wake_tx: Sender<()>,
}

impl Dispatch {
    /// Build the dispatch side and the primary thread's receivers.
    pub(crate) fn new(
        pool: Option<rayon::ThreadPool>,
    ) -> (Arc<Self>, Receiver<Arc<TaskNode>>, Receiver<()>) {
        let (primary_tx, primary_rx) = crossbeam_channel::unbounded();
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let dispatch = Arc::new(Self {
            pool,
            primary_tx,
            wake_tx,
        });
        (dispatch, primary_rx, wake_rx)
    }

    pub(crate) const fn has_workers(&self) -> bool {
        self.pool.is_some()
    }

    fn wake(&self) {
        // Full means a wake-up is already pending.
        self.wake_tx.try_send(()).ok();
    }
}

/// Everything needed to run one unit's tick away from the registry.
pub(crate) struct TickWork {
    pub(crate) unit: UnitId,
    pub(crate) name: String,
    pub(crate) function: SharedTickFn,
    pub(crate) spawner: Arc<SpawnQueue>,
    pub(crate) delta_seconds: f32,
    pub(crate) kind: LevelTick,
    pub(crate) group: TickGroup,
    pub(crate) frame: u64,
    pub(crate) high_priority: bool,
    pub(crate) log_tick: bool,
}

impl TickWork {
    pub(crate) fn run(self, thread: TickThread) {
        if self.log_tick {
            info!(
                "tick {} {:6} {:?} {}",
                if self.high_priority { "*" } else { " " },
                self.frame,
                thread,
                self.name
            );
        }
        let ctx = TickContext {
            unit: self.unit,
            delta_seconds: self.delta_seconds,
            kind: self.kind,
            group: self.group,
            thread,
            frame: self.frame,
            spawner: &self.spawner,
        };
        self.function.lock().tick(&ctx);
    }
}

#[derive(Default)]
struct NodeState {
    complete: bool,
    subsequents: SmallVec<[Arc<TaskNode>; 4]>,
}

/// One schedulable work item.
pub(crate) struct TaskNode {
    /// Unfinished prerequisites plus the hold token.
    pending: AtomicUsize,
    state: Mutex<NodeState>,
    completed: Condvar,
    work: Mutex<Option<TickWork>>,
    target: TickThread,
    dispatch: Arc<Dispatch>,
}

impl TaskNode {
    /// Create a held node. It cannot run until [`release`](Self::release).
    pub(crate) fn held(work: TickWork, target: TickThread, dispatch: Arc<Dispatch>) -> Arc<Self> {
        Arc::new(Self {
            pending: AtomicUsize::new(1),
            state: Mutex::new(NodeState::default()),
            completed: Condvar::new(),
            work: Mutex::new(Some(work)),
            target,
            dispatch,
        })
    }

    /// Make this node wait for `prerequisite`. Only valid while held.
    pub(crate) fn wait_for(self: &Arc<Self>, prerequisite: &CompletionHandle) {
        let mut state = prerequisite.node.state.lock();
        if !state.complete {
            self.pending.fetch_add(1, Ordering::AcqRel);
            state.subsequents.push(Arc::clone(self));
        }
    }

    /// Drop the hold token taken at creation.
    pub(crate) fn release(self: &Arc<Self>) {
        self.count_down();
    }

    fn count_down(self: &Arc<Self>) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.dispatch_ready();
        }
    }

    fn dispatch_ready(self: &Arc<Self>) {
        let node = Arc::clone(self);
        match (self.target, &self.dispatch.pool) {
            (TickThread::Worker, Some(pool)) => pool.spawn(move || node.execute(TickThread::Worker)),
            _ => {
                // The receiver lives as long as the sequencer; a failed send
                // means the manager is gone and nobody waits for this node.
                if let Err(err) = self.dispatch.primary_tx.send(node) {
                    err.into_inner().complete();
                }
            }
        }
    }

    /// Run the work (if still present) and signal completion.
    pub(crate) fn execute(self: &Arc<Self>, thread: TickThread) {
        let work = self.work.lock().take();
        if let Some(work) = work {
            work.run(thread);
        }
        self.complete();
    }

    fn complete(self: &Arc<Self>) {
        let subsequents = {
            let mut state = self.state.lock();
            state.complete = true;
            std::mem::take(&mut state.subsequents)
        };
        self.completed.notify_all();
        for subsequent in subsequents {
            subsequent.count_down();
        }
        self.dispatch.wake();
    }

    fn is_complete(&self) -> bool {
        self.state.lock().complete
    }
}

/// Opaque token signalled when a scheduled unit finishes its tick.
#[derive(Clone)]
pub struct CompletionHandle {
    node: Arc<TaskNode>,
}

impl CompletionHandle {
    pub(crate) const fn new(node: Arc<TaskNode>) -> Self {
        Self { node }
    }

    /// True once the unit's tick has returned.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.node.is_complete()
    }

    /// Block until the tick has returned.
    ///
    /// Do not call this from the primary thread while the frame is running:
    /// a unit pinned to the primary thread would never get to run.
    pub(crate) fn wait(&self) {
        let mut state = self.node.state.lock();
        while !state.complete {
            self.node.completed.wait(&mut state);
        }
    }

    /// True if both handles refer to the same dispatch.
    #[must_use]
    pub fn same_dispatch(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("complete", &self.is_complete())
            .finish()
    }
}
