//! Built-in plugins.
//!
//! - [`time`]: frame timing global and per-system countdowns
//! - [`transform`]: 2D transforms propagated down the hierarchy

pub mod time;
pub mod transform;

pub use time::{SystemTimer, Time, TimePlugin};
pub use transform::{GlobalTransform, Transform, TransformPlugin, transform_bundle};
