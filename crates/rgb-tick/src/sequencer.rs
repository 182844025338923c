//! Tick sequencer - holds dispatched units per group and joins groups.

use std::sync::Arc;

use crossbeam_channel::{Receiver, select};
use tracing::{debug, error, info};

use crate::{
    config::TickConfig,
    context::TickThread,
    group::{PerGroup, TickGroup},
    task::{CompletionHandle, Dispatch, TaskNode, TickWork},
};

/// Turns resolved units into held work and releases them group by group.
pub(crate) struct TickSequencer {
    dispatch: Arc<Dispatch>,
    primary_rx: Receiver<Arc<TaskNode>>,
    wake_rx: Receiver<()>,
    /// Completion handles of everything queued per group, cleared on join.
    completions: PerGroup<Vec<CompletionHandle>>,
    /// High priority held tasks for each group.
    held_high: PerGroup<Vec<Arc<TaskNode>>>,
    /// Normal priority held tasks for each group.
    held: PerGroup<Vec<Arc<TaskNode>>>,
    /// First group the next blocking join has to wait for.
    wait_for_group: TickGroup,
    single_threaded: bool,
    /// Per-frame copy of the config switch, forced off when single threaded.
    allow_concurrent_ticks: bool,
    log_ticks: bool,
    frame: u64,
}

impl TickSequencer {
    /// Build the sequencer, spinning up a worker pool unless single threaded.
    pub(crate) fn new(config: &TickConfig) -> Self {
        let single_threaded = config.is_single_threaded();
        let pool = if single_threaded {
            None
        } else {
            let mut builder =
                rayon::ThreadPoolBuilder::new().thread_name(|index| format!("rgb-tick-{index}"));
            if let Some(workers) = config.worker_threads {
                builder = builder.num_threads(workers);
            }
            match builder.build() {
                Ok(pool) => Some(pool),
                Err(err) => {
                    error!("Failed to build tick worker pool, running single threaded: {}", err);
                    None
                }
            }
        };
        let single_threaded = pool.is_none();
        let (dispatch, primary_rx, wake_rx) = Dispatch::new(pool);

        debug!(
            single_threaded,
            workers = dispatch.has_workers(),
            "Tick sequencer ready"
        );

        Self {
            dispatch,
            primary_rx,
            wake_rx,
            completions: PerGroup::default(),
            held_high: PerGroup::default(),
            held: PerGroup::default(),
            wait_for_group: TickGroup::PrePhysics,
            single_threaded,
            allow_concurrent_ticks: false,
            log_ticks: false,
            frame: 0,
        }
    }

    pub(crate) const fn is_single_threaded(&self) -> bool {
        self.single_threaded
    }

    pub(crate) const fn log_ticks(&self) -> bool {
        self.log_ticks
    }

    /// Reset per-frame state. Everything must have been drained last frame.
    pub(crate) fn start_frame(&mut self, config: &TickConfig, frame: u64) {
        self.frame = frame;
        self.log_ticks = config.log_ticks;
        self.allow_concurrent_ticks = !self.single_threaded && config.allow_concurrent_ticks;

        if self.log_ticks {
            info!("tick {frame:6} ---------------------------------------- Start Frame");
        }

        let outstanding = self.outstanding();
        debug_assert!(
            outstanding == 0,
            "{outstanding} tick tasks outstanding at the start of a frame"
        );
        if outstanding > 0 {
            error!(outstanding, "Tick tasks left over from the previous frame, draining");
            self.force_drain();
        }
        self.wait_for_group = TickGroup::PrePhysics;
    }

    /// Create a held task for a resolved unit and track its completion.
    ///
    /// Units promoted out of their declared group always run on the primary
    /// thread, as do units that did not opt into worker threads.
    pub(crate) fn queue_tick(
        &mut self,
        work: TickWork,
        run_on_any_thread: bool,
        promoted: bool,
        wait_list: &[CompletionHandle],
    ) -> CompletionHandle {
        let group = work.group;
        let high_priority = work.high_priority;
        let target = if run_on_any_thread && self.allow_concurrent_ticks && !promoted {
            TickThread::Worker
        } else {
            TickThread::Primary
        };

        let node = TaskNode::held(work, target, Arc::clone(&self.dispatch));
        for prerequisite in wait_list {
            node.wait_for(prerequisite);
        }
        let handle = CompletionHandle::new(Arc::clone(&node));

        if high_priority {
            self.held_high[group].push(node);
        } else {
            self.held[group].push(node);
        }
        self.completions[group].push(handle.clone());
        handle
    }

    /// Number of tasks queued into `group` and not yet joined.
    pub(crate) fn queued_in(&self, group: TickGroup) -> usize {
        self.completions[group].len()
    }

    /// Release the held tasks of `group`.
    ///
    /// When `blocking`, waits for every group since the last join through
    /// `group`, running primary-thread work in the meantime. Otherwise runs
    /// whatever primary-thread work is ready and returns.
    pub(crate) fn release_group(&mut self, group: TickGroup, blocking: bool) {
        if self.log_ticks {
            info!(
                "tick {:6} ---------------------------------------- Release tick group {}",
                self.frame, group
            );
        }

        for node in self.held_high[group].drain(..) {
            node.release();
        }
        for node in self.held[group].drain(..) {
            node.release();
        }

        if blocking || self.single_threaded {
            for block in self.wait_for_group.through(group) {
                let handles = std::mem::take(&mut self.completions[block]);
                self.wait_all(&handles);
            }
            // The catch-up group is released repeatedly, so the cursor stays put
            if !group.is_catch_up() {
                self.wait_for_group = group.next();
            }
        } else {
            self.process_primary_until_idle();
        }
    }

    /// Check that every group was joined. Returns the number of tasks that
    /// were still outstanding; those are released and waited for.
    pub(crate) fn end_frame(&mut self) -> usize {
        if self.log_ticks {
            info!(
                "tick {:6} ---------------------------------------- End Frame",
                self.frame
            );
        }
        let outstanding = self.outstanding();
        if outstanding > 0 {
            if cfg!(debug_assertions) {
                panic!("{outstanding} tick tasks outstanding at end of frame");
            }
            error!(outstanding, "Tick tasks outstanding at end of frame, draining");
            self.force_drain();
        }
        outstanding
    }

    /// Release and join every group regardless of the cursor.
    pub(crate) fn force_drain(&mut self) {
        for group in TickGroup::ALL {
            for node in self.held_high[group].drain(..) {
                node.release();
            }
            for node in self.held[group].drain(..) {
                node.release();
            }
        }
        for group in TickGroup::ALL {
            let handles = std::mem::take(&mut self.completions[group]);
            self.wait_all(&handles);
        }
        self.wait_for_group = TickGroup::PrePhysics;
    }

    fn outstanding(&self) -> usize {
        self.completions
            .iter()
            .map(|(_, handles)| handles.len())
            .chain(self.held.iter().map(|(_, held)| held.len()))
            .chain(self.held_high.iter().map(|(_, held)| held.len()))
            .sum()
    }

    /// Run ready primary-thread tasks without waiting for more.
    fn process_primary_until_idle(&self) {
        while let Ok(node) = self.primary_rx.try_recv() {
            node.execute(TickThread::Primary);
        }
    }

    /// Block until every handle fired, servicing the primary queue.
    fn wait_all(&self, handles: &[CompletionHandle]) {
        let mut next = 0;
        while next < handles.len() {
            self.process_primary_until_idle();
            if handles[next].is_complete() {
                next += 1;
                continue;
            }
            select! {
                recv(self.primary_rx) -> node => {
                    if let Ok(node) = node {
                        node.execute(TickThread::Primary);
                    }
                }
                recv(self.wake_rx) -> _ => {}
            }
        }
    }
}

impl std::fmt::Debug for TickSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickSequencer")
            .field("single_threaded", &self.single_threaded)
            .field("allow_concurrent_ticks", &self.allow_concurrent_ticks)
            .field("wait_for_group", &self.wait_for_group)
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        context::{LevelTick, SpawnQueue, TickContext},
        registry::UnitId,
    };

    fn work(group: TickGroup, high_priority: bool, body: impl FnMut() + Send + 'static) -> TickWork {
        let mut body = body;
        TickWork {
            unit: UnitId::from_bits(0),
            name: "test".into(),
            function: Arc::new(Mutex::new(Box::new(move |_: &TickContext<'_>| body()))),
            spawner: Arc::new(SpawnQueue::default()),
            delta_seconds: 0.016,
            kind: LevelTick::All,
            group,
            frame: 1,
            high_priority,
            log_tick: false,
        }
    }

    fn sequencer(single_threaded: bool) -> TickSequencer {
        let config = TickConfig::default()
            .with_single_threaded(Some(single_threaded))
            .with_worker_threads(Some(2));
        let mut sequencer = TickSequencer::new(&config);
        sequencer.start_frame(&config, 1);
        sequencer
    }

    #[test]
    fn test_nothing_runs_before_release() {
        let mut sequencer = sequencer(true);
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let handle = sequencer.queue_tick(
            work(TickGroup::PrePhysics, false, move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            false,
            false,
            &[],
        );
        assert!(!handle.is_complete());
        assert_eq!(sequencer.queued_in(TickGroup::PrePhysics), 1);

        sequencer.release_group(TickGroup::PrePhysics, true);
        assert!(handle.is_complete());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(sequencer.end_frame(), 0);
    }

    #[test]
    fn test_high_priority_released_first() {
        let mut sequencer = sequencer(true);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        sequencer.queue_tick(
            work(TickGroup::PrePhysics, false, move || o.lock().push("normal")),
            false,
            false,
            &[],
        );
        let o = Arc::clone(&order);
        sequencer.queue_tick(
            work(TickGroup::PrePhysics, true, move || o.lock().push("high")),
            false,
            false,
            &[],
        );

        sequencer.release_group(TickGroup::PrePhysics, true);
        assert_eq!(*order.lock(), vec!["high", "normal"]);
    }

    #[test]
    fn test_cross_group_wait_list() {
        let mut sequencer = sequencer(false);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        let first = sequencer.queue_tick(
            work(TickGroup::PrePhysics, false, move || {
                std::thread::yield_now();
                o.lock().push(1);
            }),
            true,
            false,
            &[],
        );
        let o = Arc::clone(&order);
        sequencer.queue_tick(
            work(TickGroup::PrePhysics, false, move || o.lock().push(2)),
            true,
            false,
            &[first],
        );

        sequencer.release_group(TickGroup::PrePhysics, true);
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn test_non_blocking_release_joins_later() {
        let mut sequencer = sequencer(false);
        let counter = Arc::new(AtomicU32::new(0));

        for group in [TickGroup::DuringPhysics, TickGroup::EndPhysics] {
            let c = Arc::clone(&counter);
            sequencer.queue_tick(
                work(group, false, move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
                true,
                false,
                &[],
            );
        }

        sequencer.release_group(TickGroup::PrePhysics, true);
        sequencer.release_group(TickGroup::StartPhysics, true);
        sequencer.release_group(TickGroup::DuringPhysics, false);
        sequencer.release_group(TickGroup::EndPhysics, true);

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(sequencer.queued_in(TickGroup::DuringPhysics), 0);
    }

    #[test]
    fn test_catch_up_group_can_release_repeatedly() {
        let mut sequencer = sequencer(true);
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let c = Arc::clone(&counter);
            sequencer.queue_tick(
                work(TickGroup::NewlySpawned, false, move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
                false,
                false,
                &[],
            );
            sequencer.release_group(TickGroup::NewlySpawned, true);
        }

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(sequencer.end_frame(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outstanding at end of frame")]
    fn test_unreleased_work_at_end_frame_panics() {
        let mut sequencer = sequencer(true);
        sequencer.queue_tick(work(TickGroup::PostPhysics, false, || {}), false, false, &[]);
        sequencer.end_frame();
    }
}
