//! Scheduler configuration.

use std::str::FromStr;

use crate::group::TickGroup;

/// Knobs for a [`TickManager`](crate::TickManager).
///
/// Build with [`Default`] plus the `with_*` methods, or read from the
/// environment with [`from_env`](Self::from_env).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickConfig {
    /// Let units that opted in run on pool workers.
    pub allow_concurrent_ticks: bool,
    /// Log every tick and group release at `info`.
    pub log_ticks: bool,
    /// When logging ticks, also list each unit's prerequisite tree. Off by
    /// default.
    pub log_prerequisites: bool,
    /// Worker pool size; `None` lets rayon decide.
    pub worker_threads: Option<usize>,
    /// Force (`Some(true)`) or forbid (`Some(false)`) the single threaded
    /// fallback. `None` falls back below three cores.
    pub single_threaded: Option<bool>,
    /// Dedicated servers run single threaded and skip units that opted out.
    pub dedicated_server: bool,
    /// Group that only units declaring it may run in; others resolving into
    /// it are bumped one group later.
    pub narrow_contract_group: Option<TickGroup>,
    /// Bound on catch-up passes for units spawned mid-frame.
    pub max_catch_up_iterations: u32,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            allow_concurrent_ticks: true,
            log_ticks: false,
            log_prerequisites: false,
            worker_threads: None,
            single_threaded: None,
            dedicated_server: false,
            narrow_contract_group: Some(TickGroup::DuringPhysics),
            max_catch_up_iterations: 100,
        }
    }
}

impl TickConfig {
    /// Read the configuration from `RGB_TICK_*` environment variables,
    /// keeping the default for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            allow_concurrent_ticks: env_flag("RGB_TICK_ALLOW_CONCURRENT")
                .unwrap_or(defaults.allow_concurrent_ticks),
            log_ticks: env_flag("RGB_TICK_LOG").unwrap_or(defaults.log_ticks),
            log_prerequisites: env_flag("RGB_TICK_LOG_PREREQUISITES")
                .unwrap_or(defaults.log_prerequisites),
            worker_threads: env_parse("RGB_TICK_WORKERS").or(defaults.worker_threads),
            single_threaded: env_flag("RGB_TICK_SINGLE_THREADED").or(defaults.single_threaded),
            dedicated_server: env_flag("RGB_TICK_DEDICATED_SERVER")
                .unwrap_or(defaults.dedicated_server),
            narrow_contract_group: defaults.narrow_contract_group,
            max_catch_up_iterations: env_parse("RGB_TICK_MAX_CATCH_UP")
                .unwrap_or(defaults.max_catch_up_iterations),
        }
    }

    #[must_use]
    pub const fn with_allow_concurrent_ticks(mut self, allow: bool) -> Self {
        self.allow_concurrent_ticks = allow;
        self
    }

    #[must_use]
    pub const fn with_log_ticks(mut self, log: bool) -> Self {
        self.log_ticks = log;
        self
    }

    #[must_use]
    pub const fn with_log_prerequisites(mut self, log: bool) -> Self {
        self.log_prerequisites = log;
        self
    }

    #[must_use]
    pub const fn with_worker_threads(mut self, workers: Option<usize>) -> Self {
        self.worker_threads = workers;
        self
    }

    #[must_use]
    pub const fn with_single_threaded(mut self, single_threaded: Option<bool>) -> Self {
        self.single_threaded = single_threaded;
        self
    }

    #[must_use]
    pub const fn with_dedicated_server(mut self, dedicated: bool) -> Self {
        self.dedicated_server = dedicated;
        self
    }

    #[must_use]
    pub const fn with_narrow_contract_group(mut self, group: Option<TickGroup>) -> Self {
        self.narrow_contract_group = group;
        self
    }

    #[must_use]
    pub const fn with_max_catch_up_iterations(mut self, iterations: u32) -> Self {
        self.max_catch_up_iterations = iterations;
        self
    }

    /// Whether the manager will run everything on the calling thread.
    #[must_use]
    pub fn is_single_threaded(&self) -> bool {
        if self.dedicated_server {
            return true;
        }
        self.single_threaded
            .unwrap_or_else(|| match std::thread::available_parallelism() {
                Ok(cores) => cores.get() < 3,
                Err(_) => true,
            })
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}
