//! Frame timing and delta time.
//!
//! [`TimePlugin`] inserts the [`Time`] global and refreshes it at the start of
//! every tick, in [`Phase::First`], from the host time handed to
//! [`Runtime::tick`](crate::runtime::Runtime::tick).

use std::time::Duration;

use crate::app::{App, Plugin};
use crate::context::Context;
use crate::error::Result;
use crate::resource::Global;
use crate::schedule::Phase;

/// Frame timing global.
#[derive(Debug, Default, Clone, Copy)]
pub struct Time {
    /// Host time at the start of the current tick.
    last: Duration,
    /// Duration of the previous frame.
    delta: Duration,
    /// Sum of all deltas so far.
    elapsed: Duration,
    /// Number of ticks seen.
    frame_count: u64,
}

impl Global for Time {
    fn before_first_tick(&mut self) {
        *self = Self::default();
    }
}

impl Time {
    pub(crate) fn advance(&mut self, now: Duration) {
        self.delta = now.saturating_sub(self.last);
        self.elapsed += self.delta;
        self.last = now;
        self.frame_count += 1;
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Delta time in seconds (f32), the most common way to use it.
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Estimated FPS based on the last frame's delta.
    pub fn fps(&self) -> f32 {
        if self.delta.as_secs_f32() > 0.0 {
            1.0 / self.delta.as_secs_f32()
        } else {
            0.0
        }
    }
}

fn update_time(ctx: &mut Context<'_>) -> Result<()> {
    let now = ctx.elapsed();
    ctx.global_mut::<Time>()?.advance(now);
    Ok(())
}

/// Registers [`Time`] and keeps it current.
pub struct TimePlugin;

impl Plugin for TimePlugin {
    fn build(&self, app: &mut App) {
        app.add_global_with(Time::default)
            .add_system(Phase::First, update_time);
    }
}

/// Local countdown that lets a system run only every so often.
///
/// ```ignore
/// fn spawn_wave(ctx: &mut Context<'_>) -> Result<()> {
///     if SystemTimer::check(ctx)? {
///         return Ok(());
///     }
///     SystemTimer::set(ctx, Duration::from_secs(5));
///     // ...
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SystemTimer {
    left: Duration,
}

impl SystemTimer {
    /// Start (or restart) the calling system's countdown.
    pub fn set(ctx: &mut Context<'_>, duration: Duration) {
        ctx.set_local(SystemTimer { left: duration });
    }

    /// Count the calling system's timer down by this frame's delta. Returns
    /// true while time is left.
    pub fn check(ctx: &mut Context<'_>) -> Result<bool> {
        let delta = ctx.global::<Time>()?.delta();
        let timer = ctx.local_or_insert_with(|| SystemTimer {
            left: Duration::ZERO,
        });
        timer.left = timer.left.saturating_sub(delta);
        Ok(!timer.left.is_zero())
    }

    pub fn left(&self) -> Duration {
        self.left
    }
}
