//! # Entity Component System Core
//!
//! Entities are recyclable integer ids, components live in one dense column
//! per type indexed by id, and queries are cached result sets kept current on
//! every mutation instead of being recomputed each frame.
//!
//! ## Module Overview
//!
//! - [`allocator`] — Free-block id allocator
//! - [`component`] — Type-erased per-type columns (`Box<dyn Any>`)
//! - [`entity`] — Generational handles, tags, unique tags
//! - [`hierarchy`] — Parent/child arena
//! - [`query`] — Descriptors, filters, the incremental cache
//! - [`fetch`] — Typed query views
//! - [`world`] — The registry tying it all together

pub mod allocator;
pub mod component;
pub mod entity;
pub mod fetch;
pub mod hierarchy;
pub mod query;
pub mod world;

pub use allocator::Eid;
pub use component::{Component, ComponentKey};
pub use entity::{Entity, Tag, UniqueTag};
pub use fetch::{ParentOf, Preprocess, Processed, Query, QueryData};
pub use query::{
    Filter, QueryArg, QueryId, QueryView, child_with, has_no_parent, not_tagged, tagged, with,
    with_all, without,
};
pub use world::{Bundle, EntityMut, World};
