//! # Runtime — Lifecycle and the Tick Loop
//!
//! A [`Runtime`] is what [`App::build`](crate::app::App::build) produces. It
//! owns the world, the event bus, the globals and every system with its
//! private state, and moves through a fixed lifecycle:
//!
//! ```text
//!          start()            pause()
//!   Idle ──────────▶ Running ────────▶ Paused
//!                      │  ▲   resume()   │
//!                      │  └──────────────┘
//!               stop() ▼                  │ stop()
//!                    Stopped ◀────────────┘
//! ```
//!
//! ## One tick
//!
//! 1. Rotate every event channel and rebase every system's read offsets
//!    (disabled systems included, so they stay correct while skipped).
//! 2. Run each enabled system of `First`, `PreUpdate`, `Update`,
//!    `PostUpdate`, `Last`, in order, each with its own context.
//! 3. Advance the cycle counter and apply pause/stop requests made by
//!    systems during the tick.
//!
//! The runtime never drives itself. The host calls [`Runtime::tick`] from
//! its own frame callback, or hands a [`FrameDriver`] to [`Runtime::run`].

use std::time::{Duration, Instant};

use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::ecs::World;
use crate::error::{EcsError, Result};
use crate::event::EventBus;
use crate::resource::Globals;
use crate::schedule::{Control, Phase, Schedule, SystemFn, SystemId, SystemState};

#[cfg(feature = "diagnostics")]
use crate::schedule::SystemTiming;

/// Where a runtime is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RuntimeStatus {
    /// Built, startup not run yet.
    Idle,
    Running,
    Paused,
    /// Shutdown has run. Terminal.
    Stopped,
}

pub struct Runtime {
    world: World,
    events: EventBus,
    globals: Globals,
    schedule: Schedule,
    control: Control,
    /// Locals and event offsets for calls made by host code.
    external: SystemState,
    status: RuntimeStatus,
    config: RuntimeConfig,
    /// Per-system timings from the most recent tick.
    #[cfg(feature = "diagnostics")]
    timings: Vec<SystemTiming>,
    /// Entities spawned and destroyed during the most recent tick.
    #[cfg(feature = "diagnostics")]
    tick_counters: (u32, u32),
}

impl Runtime {
    pub(crate) fn new(
        world: World,
        events: EventBus,
        globals: Globals,
        schedule: Schedule,
        control: Control,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            world,
            events,
            globals,
            schedule,
            control,
            external: SystemState::default(),
            status: RuntimeStatus::Idle,
            config,
            #[cfg(feature = "diagnostics")]
            timings: Vec::new(),
            #[cfg(feature = "diagnostics")]
            tick_counters: (0, 0),
        }
    }

    pub fn status(&self) -> RuntimeStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == RuntimeStatus::Running
    }

    /// Number of completed ticks.
    pub fn cycle(&self) -> u64 {
        self.control.cycle
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut Globals {
        &mut self.globals
    }

    pub fn system_count(&self) -> usize {
        self.schedule.len()
    }

    /// Names of the systems in `phase`, in run order.
    pub fn system_names(&self, phase: Phase) -> Vec<&str> {
        self.schedule
            .phase(phase)
            .iter()
            .map(|entry| entry.name.as_str())
            .collect()
    }

    /// A context for host code outside any system. It has its own locals and
    /// event offsets, kept across calls and rebased every tick.
    pub fn context(&mut self) -> Context<'_> {
        Context::new(
            &mut self.world,
            &mut self.events,
            &mut self.globals,
            &mut self.external,
            &mut self.control,
        )
    }

    pub fn enable<F: 'static>(&mut self, system: F) -> bool {
        self.control.set_enabled(SystemId::of(&system), true)
    }

    pub fn disable<F: 'static>(&mut self, system: F) -> bool {
        self.control.set_enabled(SystemId::of(&system), false)
    }

    pub fn toggle<F: 'static>(&mut self, system: F) -> bool {
        self.control.toggle(SystemId::of(&system))
    }

    pub fn is_enabled<F: 'static>(&self, system: F) -> bool {
        let id = SystemId::of(&system);
        self.control.is_known(id) && self.control.is_enabled(id)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Run the startup phases, awaiting each asynchronous system before
    /// moving to the next, then enter `Running`.
    ///
    /// If a startup system fails the error is returned and the runtime stays
    /// `Idle`.
    pub async fn start(&mut self) -> Result<()> {
        match self.status {
            RuntimeStatus::Idle => {}
            RuntimeStatus::Stopped => return Err(EcsError::RuntimeStopped),
            status => {
                log::warn!("start called on a runtime that is already {status:?}");
                return Ok(());
            }
        }

        log::info!(
            "starting runtime: {} systems, {} channels, {} globals",
            self.schedule.len(),
            self.events.len(),
            self.globals.len()
        );
        self.globals.run_before_startup();

        for phase in Phase::STARTUP {
            for entry in self.schedule.phase_mut(phase).iter_mut() {
                if !self.control.is_enabled(entry.id) {
                    continue;
                }
                log::trace!("startup system {}", entry.name);
                let mut ctx = Context::new(
                    &mut self.world,
                    &mut self.events,
                    &mut self.globals,
                    &mut entry.state,
                    &mut self.control,
                );
                let result = match &entry.run {
                    SystemFn::Sync(run) => run(&mut ctx),
                    SystemFn::Async(run) => run(&mut ctx).await,
                };
                if let Err(err) = result {
                    log::error!("startup system `{}` failed: {err}", entry.name);
                    return Err(err);
                }
            }
        }

        self.globals.run_before_first_tick();
        self.status = RuntimeStatus::Running;
        log::info!("runtime running");
        Ok(())
    }

    /// [`start`](Runtime::start), blocking the current thread.
    pub fn start_blocking(&mut self) -> Result<()> {
        pollster::block_on(self.start())
    }

    /// Run one tick with `elapsed` as the host time.
    ///
    /// Returns whether the runtime is still running afterwards. Ticking an
    /// idle or paused runtime does nothing and returns `false`. The first
    /// system error aborts the tick and is returned.
    pub fn tick(&mut self, elapsed: Duration) -> Result<bool> {
        match self.status {
            RuntimeStatus::Running => {}
            RuntimeStatus::Stopped => return Err(EcsError::RuntimeStopped),
            RuntimeStatus::Idle | RuntimeStatus::Paused => return Ok(false),
        }

        // Spawns and destroys made between ticks do not count toward this one.
        #[cfg(feature = "diagnostics")]
        self.world.take_tick_counters();

        let shifts = self.events.rotate_all();
        let expired: usize = shifts.values().sum();
        if expired > 0 {
            log::debug!("cycle {}: {expired} events expired", self.control.cycle);
        }
        for entry in self.schedule.entries_mut() {
            entry.state.cursors.rebase(&shifts);
        }
        self.external.cursors.rebase(&shifts);
        self.control.elapsed = elapsed;

        #[cfg(feature = "diagnostics")]
        self.timings.clear();

        for phase in Phase::TICK {
            for entry in self.schedule.phase_mut(phase).iter_mut() {
                if !self.control.is_enabled(entry.id) {
                    continue;
                }
                // Asynchronous systems are rejected outside startup at build time.
                let SystemFn::Sync(run) = &entry.run else {
                    continue;
                };

                #[cfg(feature = "diagnostics")]
                let started = Instant::now();

                let mut ctx = Context::new(
                    &mut self.world,
                    &mut self.events,
                    &mut self.globals,
                    &mut entry.state,
                    &mut self.control,
                );
                if let Err(err) = run(&mut ctx) {
                    log::error!(
                        "system `{}` failed in {phase:?} at cycle {}: {err}",
                        entry.name,
                        self.control.cycle
                    );
                    return Err(err);
                }

                #[cfg(feature = "diagnostics")]
                self.timings.push(SystemTiming {
                    name: entry.name.clone(),
                    phase,
                    duration_us: started.elapsed().as_secs_f64() * 1_000_000.0,
                });
            }
        }

        self.control.cycle += 1;

        #[cfg(feature = "diagnostics")]
        {
            self.tick_counters = self.world.take_tick_counters();
        }

        if std::mem::take(&mut self.control.stop_requested) {
            self.stop()?;
        } else if std::mem::take(&mut self.control.pause_requested) {
            self.pause()?;
        }
        Ok(self.is_running())
    }

    /// Stop scheduling ticks. All state is kept.
    pub fn pause(&mut self) -> Result<()> {
        match self.status {
            RuntimeStatus::Running => {
                self.status = RuntimeStatus::Paused;
                log::info!("runtime paused at cycle {}", self.control.cycle);
            }
            RuntimeStatus::Paused => {}
            RuntimeStatus::Idle => log::warn!("pause called before start"),
            RuntimeStatus::Stopped => return Err(EcsError::RuntimeStopped),
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.status {
            RuntimeStatus::Paused => {
                self.status = RuntimeStatus::Running;
                log::info!("runtime resumed at cycle {}", self.control.cycle);
            }
            RuntimeStatus::Running => {}
            RuntimeStatus::Idle => log::warn!("resume called before start"),
            RuntimeStatus::Stopped => return Err(EcsError::RuntimeStopped),
        }
        Ok(())
    }

    /// Run the shutdown phase and every global's `on_shutdown`, then halt for
    /// good. Stopping twice does nothing.
    ///
    /// Every shutdown system runs even if an earlier one fails; the first
    /// error is returned afterwards.
    pub fn stop(&mut self) -> Result<()> {
        if self.status == RuntimeStatus::Stopped {
            return Ok(());
        }
        self.status = RuntimeStatus::Stopped;

        let mut first_error = None;
        for entry in self.schedule.phase_mut(Phase::Shutdown).iter_mut() {
            if !self.control.is_enabled(entry.id) {
                continue;
            }
            let SystemFn::Sync(run) = &entry.run else {
                continue;
            };
            let mut ctx = Context::new(
                &mut self.world,
                &mut self.events,
                &mut self.globals,
                &mut entry.state,
                &mut self.control,
            );
            if let Err(err) = run(&mut ctx) {
                log::error!("shutdown system `{}` failed: {err}", entry.name);
                first_error.get_or_insert(err);
            }
        }
        self.globals.run_on_shutdown();
        log::info!("runtime stopped after {} ticks", self.control.cycle);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drive ticks from `driver` until the runtime leaves `Running` or the
    /// driver runs dry. Starts an idle runtime first.
    ///
    /// Returns the status the loop ended in. A paused runtime can be resumed
    /// and handed back to `run`.
    pub fn run(&mut self, driver: &mut impl FrameDriver) -> Result<RuntimeStatus> {
        match self.status {
            RuntimeStatus::Idle => self.start_blocking()?,
            RuntimeStatus::Stopped => return Err(EcsError::RuntimeStopped),
            _ => {}
        }
        while self.is_running() {
            let Some(elapsed) = driver.next_frame() else {
                log::debug!("frame driver exhausted at cycle {}", self.control.cycle);
                break;
            };
            self.tick(elapsed)?;
        }
        Ok(self.status)
    }

    /// Snapshot of entity, query, channel and system statistics.
    #[cfg(feature = "diagnostics")]
    pub fn diagnostics(&self) -> crate::diag::DiagSnapshot {
        crate::diag::DiagSnapshot::capture(
            self.status,
            self.control.cycle,
            &self.world,
            &self.events,
            &self.timings,
            self.tick_counters,
        )
    }
}

/// The host's clock: hands the runtime one frame at a time.
pub trait FrameDriver {
    /// Wait until the next frame is due and return the host time since the
    /// driver's first frame, or `None` once the host stops producing frames.
    fn next_frame(&mut self) -> Option<Duration>;
}

/// Largest gap the driver tries to catch up on before resetting its pace.
const MAX_FRAME_LAG: Duration = Duration::from_millis(250);

/// Sleeps the current thread to hold a fixed frame rate.
pub struct FixedRateDriver {
    /// `None` runs unpaced.
    frame: Option<Duration>,
    started: Option<Instant>,
    next_due: Option<Instant>,
    limit: Option<u64>,
    produced: u64,
}

impl FixedRateDriver {
    /// Pace frames at `fps` per second. Zero means as fast as possible.
    pub fn new(fps: u32) -> Self {
        Self {
            frame: (fps > 0).then(|| Duration::from_secs(1) / fps),
            started: None,
            next_due: None,
            limit: None,
            produced: 0,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.target_fps)
    }

    /// Stop after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.produced
    }
}

impl FrameDriver for FixedRateDriver {
    fn next_frame(&mut self) -> Option<Duration> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return None;
        }

        let now = Instant::now();
        let started = *self.started.get_or_insert(now);

        if let Some(frame) = self.frame {
            let due = self.next_due.unwrap_or(now);
            if due > now {
                std::thread::sleep(due - now);
            }
            let after = Instant::now();
            self.next_due = Some(if after.duration_since(due) > MAX_FRAME_LAG {
                log::warn!("frame driver fell {:?} behind, resetting pace", after - due);
                after + frame
            } else {
                due + frame
            });
        }

        self.produced += 1;
        Some(Instant::now() - started)
    }
}

/// Advances time by a fixed step per frame without sleeping.
///
/// Useful for tests, replays and headless simulation.
pub struct SteppedDriver {
    step: Duration,
    elapsed: Duration,
    remaining: Option<u64>,
}

impl SteppedDriver {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            elapsed: Duration::ZERO,
            remaining: None,
        }
    }

    pub fn with_limit(mut self, frames: u64) -> Self {
        self.remaining = Some(frames);
        self
    }
}

impl FrameDriver for SteppedDriver {
    fn next_frame(&mut self) -> Option<Duration> {
        if let Some(remaining) = &mut self.remaining {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        self.elapsed += self.step;
        Some(self.elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::resource::Global;

    #[derive(Default)]
    struct Trace(Vec<String>);

    impl Global for Trace {
        fn before_startup(&mut self) {
            self.0.push("before_startup".into());
        }

        fn before_first_tick(&mut self) {
            self.0.push("before_first_tick".into());
        }

        fn on_shutdown(&mut self) {
            self.0.push("on_shutdown".into());
        }
    }

    fn push(ctx: &mut Context<'_>, what: &str) -> Result<()> {
        ctx.global_mut::<Trace>()?.0.push(what.to_string());
        Ok(())
    }

    fn setup(ctx: &mut Context<'_>) -> Result<()> {
        push(ctx, "setup")
    }

    fn first(ctx: &mut Context<'_>) -> Result<()> {
        push(ctx, "first")
    }

    fn update(ctx: &mut Context<'_>) -> Result<()> {
        push(ctx, "update")
    }

    fn last(ctx: &mut Context<'_>) -> Result<()> {
        push(ctx, "last")
    }

    fn teardown(ctx: &mut Context<'_>) -> Result<()> {
        push(ctx, "teardown")
    }

    fn trace(runtime: &Runtime) -> Vec<String> {
        runtime.globals().get::<Trace>().unwrap().0.clone()
    }

    fn app() -> App {
        App::new()
            .global::<Trace>()
            .system(Phase::Last, last)
            .update(update)
            .system(Phase::First, first)
            .startup(setup)
            .shutdown(teardown)
    }

    #[test]
    fn lifecycle_order() {
        let mut runtime = app().build().unwrap();
        assert_eq!(runtime.status(), RuntimeStatus::Idle);
        assert!(!runtime.tick(Duration::ZERO).unwrap());

        runtime.start_blocking().unwrap();
        assert!(runtime.tick(Duration::from_millis(16)).unwrap());
        runtime.stop().unwrap();
        runtime.stop().unwrap();

        assert_eq!(
            trace(&runtime),
            vec![
                "before_startup",
                "setup",
                "before_first_tick",
                "first",
                "update",
                "last",
                "teardown",
                "on_shutdown",
            ]
        );
        assert_eq!(runtime.tick(Duration::ZERO), Err(EcsError::RuntimeStopped));
        assert_eq!(runtime.start_blocking(), Err(EcsError::RuntimeStopped));
    }

    #[test]
    fn system_names_follow_run_order() {
        let runtime = app().update(first).build().unwrap();
        assert_eq!(runtime.system_names(Phase::Update), vec!["update", "first"]);
        assert_eq!(runtime.system_names(Phase::Startup), vec!["setup"]);
        assert!(runtime.system_names(Phase::PreUpdate).is_empty());
    }

    #[test]
    fn pause_skips_ticks_but_keeps_state() {
        let mut runtime = app().build().unwrap();
        runtime.start_blocking().unwrap();
        runtime.tick(Duration::ZERO).unwrap();
        runtime.pause().unwrap();
        assert!(!runtime.tick(Duration::ZERO).unwrap());
        assert_eq!(runtime.cycle(), 1);
        runtime.resume().unwrap();
        assert!(runtime.tick(Duration::ZERO).unwrap());
        assert_eq!(runtime.cycle(), 2);
    }

    #[test]
    fn disabled_systems_are_skipped() {
        let mut runtime = app().build().unwrap();
        runtime.start_blocking().unwrap();
        assert!(runtime.disable(update));
        runtime.tick(Duration::ZERO).unwrap();
        assert!(!trace(&runtime).contains(&"update".to_string()));
        assert!(runtime.toggle(update));
        assert!(runtime.is_enabled(update));
    }

    #[test]
    fn systems_can_request_stop() {
        fn quit(ctx: &mut Context<'_>) -> Result<()> {
            if ctx.cycle() == 2 {
                ctx.request_stop();
            }
            Ok(())
        }
        let mut runtime = app().update(quit).build().unwrap();
        let mut driver = SteppedDriver::new(Duration::from_millis(10)).with_limit(100);
        assert_eq!(runtime.run(&mut driver).unwrap(), RuntimeStatus::Stopped);
        assert_eq!(runtime.cycle(), 3);
        assert!(trace(&runtime).contains(&"on_shutdown".to_string()));
    }

    #[test]
    fn first_system_error_aborts_the_tick() {
        fn boom(_ctx: &mut Context<'_>) -> Result<()> {
            Err(EcsError::NoResultsInQuery)
        }
        let mut runtime = app().system(Phase::PreUpdate, boom).build().unwrap();
        runtime.start_blocking().unwrap();
        assert_eq!(runtime.tick(Duration::ZERO), Err(EcsError::NoResultsInQuery));
        assert_eq!(trace(&runtime).last().map(String::as_str), Some("first"));
        assert_eq!(runtime.cycle(), 0);
    }

    #[test]
    fn elapsed_reaches_systems() {
        fn record(ctx: &mut Context<'_>) -> Result<()> {
            let elapsed = ctx.elapsed();
            ctx.set_local(elapsed);
            let ms = elapsed.as_millis();
            push(ctx, &format!("t={ms}"))
        }
        let mut runtime = app().update(record).build().unwrap();
        let mut driver = SteppedDriver::new(Duration::from_millis(5)).with_limit(2);
        assert_eq!(runtime.run(&mut driver).unwrap(), RuntimeStatus::Running);
        assert!(trace(&runtime).contains(&"t=10".to_string()));
    }

    #[test]
    fn fixed_rate_driver_limit() {
        let mut driver = FixedRateDriver::new(0).with_limit(3);
        assert!(driver.next_frame().is_some());
        assert!(driver.next_frame().is_some());
        assert!(driver.next_frame().is_some());
        assert!(driver.next_frame().is_none());
        assert_eq!(driver.frames_produced(), 3);

        let mut paced = FixedRateDriver::new(1000).with_limit(2);
        let first = paced.next_frame().unwrap();
        let second = paced.next_frame().unwrap();
        assert!(second >= first);
    }
}
