//! Tick scheduler runner
//!
//! This binary:
//! 1. Builds a `TickManager` from `RGB_TICK_*` environment variables
//! 2. Registers a synthetic scene of input, physics and actor units
//! 3. Runs frames at a fixed rate, replacing a short-lived effect unit once a
//!    second, and logs a unit dump at the end
//!
//! Environment:
//! - `TICK_UNITS` - number of actor units (default 1000)
//! - `TICK_FRAMES` - frames to run, 0 runs forever (default 600)
//! - `TARGET_FPS` - frame rate, must be positive (default 60)
//! - `TICK_DUMP` - log a dump of every unit on exit (default on)

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rgb_tick::DumpFilter;
use rgb_tick::prelude::*;
use tracing::{debug, info};

/// Tick counters for the periodic summary.
#[derive(Default)]
struct Stats {
    actor_ticks: AtomicU64,
    effect_ticks: AtomicU64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Register the scene. Actors depend on input; every fourth one also waits
/// for physics, every third one only ticks ten times a second.
fn build_scene(ticks: &mut TickManager, actors: u64, stats: &Arc<Stats>) -> eyre::Result<()> {
    let input = ticks.spawn_unit(
        LevelId::PERSISTENT,
        TickUnitDesc::new("input", |_: &TickContext<'_>| {}).high_priority(true),
    )?;

    let physics = ticks.spawn_unit(
        LevelId::PERSISTENT,
        TickUnitDesc::new("physics", |ctx: &TickContext<'_>| {
            debug!(dt = ctx.delta_seconds(), "Physics step");
        })
        .group(TickGroup::StartPhysics)
        .prerequisite(input),
    )?;

    let level = ticks.add_level();
    for i in 0..actors {
        let stats = Arc::clone(stats);
        let mut desc = TickUnitDesc::new(format!("actor-{i}"), move |_: &TickContext<'_>| {
            stats.actor_ticks.fetch_add(1, Ordering::Relaxed);
        })
        .prerequisite(input)
        .run_on_any_thread(true);

        if i % 4 == 0 {
            desc = desc.group(TickGroup::EndPhysics).prerequisite(physics);
        }
        if i % 3 == 0 {
            desc = desc.interval(0.1);
        }
        ticks.spawn_unit(level, desc)?;
    }

    info!(units = ticks.unit_count(), "Scene built");
    Ok(())
}

/// Spawn an effect that lives until the next one replaces it.
fn spawn_effect(ticks: &mut TickManager, stats: &Arc<Stats>) -> eyre::Result<UnitId> {
    let stats = Arc::clone(stats);
    let name = format!("effect-{}", ticks.frame() + 1);
    let effect = ticks.spawn_unit(
        LevelId::PERSISTENT,
        TickUnitDesc::new(name, move |_: &TickContext<'_>| {
            stats.effect_ticks.fetch_add(1, Ordering::Relaxed);
        })
        .group(TickGroup::PostUpdateWork)
        .run_on_any_thread(true),
    )?;
    Ok(effect)
}

/// Wall-clock budget of one frame at `target_fps`.
fn frame_budget(target_fps: f32) -> eyre::Result<Duration> {
    Duration::try_from_secs_f32(1.0 / target_fps)
        .map_err(|_| eyre::eyre!("TARGET_FPS must be a positive frame rate, got {target_fps}"))
}

fn main() -> eyre::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rgb_tick_runner=info".parse()?)
                .add_directive("rgb_tick=info".parse()?),
        )
        .init();

    info!("Starting tick runner");

    // Configuration
    let actors: u64 = env_or("TICK_UNITS", 1000);
    let frames: u64 = env_or("TICK_FRAMES", 600);
    let target_fps: f32 = env_or("TARGET_FPS", 60.0);
    let dump = env_or("TICK_DUMP", true);

    let config = TickConfig::from_env();
    info!(?config, actors, frames, target_fps, "Configuration");

    let mut ticks = TickManager::new(config);
    let stats = Arc::new(Stats::default());
    build_scene(&mut ticks, actors, &stats)?;

    // Run frame loop
    let target_delta = frame_budget(target_fps)?;
    let mut delta = target_delta;
    let mut effect: Option<UnitId> = None;

    while frames == 0 || ticks.frame() < frames {
        let start = Instant::now();

        if ticks.frame().is_multiple_of(60) {
            if let Some(expired) = effect.take() {
                ticks.remove_unit(expired)?;
            }
            effect = Some(spawn_effect(&mut ticks, &stats)?);
        }

        ticks.tick_frame(delta.as_secs_f32(), LevelTick::All)?;

        if ticks.frame().is_multiple_of(60) {
            info!(
                frame = ticks.frame(),
                actor_ticks = stats.actor_ticks.load(Ordering::Relaxed),
                effect_ticks = stats.effect_ticks.load(Ordering::Relaxed),
                frame_ms = start.elapsed().as_secs_f32() * 1000.0,
                "Progress"
            );
        }

        // Sleep to maintain target FPS
        let elapsed = start.elapsed();
        if elapsed < target_delta {
            std::thread::sleep(target_delta - elapsed);
        }
        delta = start.elapsed();
    }

    if dump {
        info!("\n{}", ticks.dump(DumpFilter::ALL));
    }

    Ok(())
}
