//! Convenience re-exports — `use strata::prelude::*` for the common items.

pub use crate::app::{App, Plugin};
pub use crate::config::RuntimeConfig;
pub use crate::context::Context;
pub use crate::ecs::{
    Bundle, Component, ComponentKey, Entity, EntityMut, Filter, ParentOf, Preprocess, Processed, Query,
    QueryArg, QueryView, Tag, UniqueTag, World, child_with, has_no_parent, not_tagged, tagged,
    with, with_all, without,
};
pub use crate::error::{EcsError, Result};
pub use crate::event::Event;
pub use crate::logging::init_logger;
pub use crate::plugins::{
    GlobalTransform, SystemTimer, Time, TimePlugin, Transform, TransformPlugin, transform_bundle,
};
pub use crate::resource::Global;
pub use crate::runtime::{FixedRateDriver, FrameDriver, Runtime, RuntimeStatus, SteppedDriver};
pub use crate::schedule::{BoxFuture, Phase, SystemId};
pub use glam::Vec2;
#[cfg(feature = "diagnostics")]
pub use crate::diag::DiagSnapshot;
