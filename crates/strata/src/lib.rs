//! # Strata — Entity Component System Runtime
//!
//! A small single-threaded ECS: recyclable entity ids, one column per
//! component type, a parent/child hierarchy, query caches kept current on
//! every mutation, double-buffered event channels with per-system cursors,
//! and a phase-ordered scheduler driven by the host's frame clock.
//!
//! Start with `use strata::prelude::*`, describe your game on an
//! [`App`](app::App), then [`build`](app::App::build) a
//! [`Runtime`](runtime::Runtime) and drive it.

pub mod app;
pub mod config;
pub mod context;
pub mod ecs;
pub mod error;
pub mod event;
pub mod logging;
pub mod plugins;
pub mod prelude;
pub mod resource;
pub mod runtime;
pub mod schedule;

#[cfg(feature = "diagnostics")]
pub mod diag;
