//! The execution context handed to every system.
//!
//! A [`Context`] borrows the runtime's shared state (world, event bus,
//! globals, scheduler control) together with the state owned by the system
//! currently running. Locals and event offsets therefore always belong to the
//! caller, whichever phase it runs in.
//!
//! # Example
//!
//! ```ignore
//! fn movement(ctx: &mut Context<'_>) -> Result<()> {
//!     let dt = ctx.global::<Time>()?.delta_secs();
//!     let mut q = ctx.query::<(&mut Position, &Velocity)>([])?;
//!     for (pos, vel) in q.iter() {
//!         pos.0 += vel.0 * dt;
//!     }
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use crate::ecs::{Bundle, Entity, EntityMut, Filter, Query, QueryData, World};
use crate::error::Result;
use crate::event::{Event, EventBus};
use crate::resource::{Global, Globals};
use crate::schedule::{Control, SystemId, SystemState};

pub struct Context<'a> {
    pub world: &'a mut World,
    pub(crate) events: &'a mut EventBus,
    pub(crate) globals: &'a mut Globals,
    pub(crate) state: &'a mut SystemState,
    pub(crate) control: &'a mut Control,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        world: &'a mut World,
        events: &'a mut EventBus,
        globals: &'a mut Globals,
        state: &'a mut SystemState,
        control: &'a mut Control,
    ) -> Self {
        Self {
            world,
            events,
            globals,
            state,
            control,
        }
    }

    // ── Entities ─────────────────────────────────────────────────────────

    /// Create a root entity with `bundle`.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Result<Entity> {
        self.world.spawn(bundle)
    }

    pub fn entity(&mut self, entity: Entity) -> Result<EntityMut<'_>> {
        self.world.entity_mut(entity)
    }

    pub fn destroy(&mut self, entity: Entity) -> Result<()> {
        self.world.destroy(entity)
    }

    /// Resolve (or reuse) a cached query. See [`World::query`].
    pub fn query<Q: QueryData>(
        &mut self,
        filters: impl IntoIterator<Item = Filter>,
    ) -> Result<Query<'_, Q>> {
        self.world.query::<Q>(filters)
    }

    // ── Events ───────────────────────────────────────────────────────────

    pub fn dispatch<E: Event>(&mut self, event: E) -> Result<()> {
        self.events.dispatch(event)
    }

    /// Every `E` this system has not read yet, oldest first.
    pub fn poll<E: Event>(&mut self) -> Result<impl Iterator<Item = &E>> {
        self.state.cursors.poll::<E>(&*self.events)
    }

    /// Whether this system has read every `E` currently available.
    pub fn has_none<E: Event>(&self) -> Result<bool> {
        self.state.cursors.has_none::<E>(&*self.events)
    }

    // ── Resources ────────────────────────────────────────────────────────

    pub fn global<G: Global>(&self) -> Result<&G> {
        self.globals.get::<G>()
    }

    pub fn global_mut<G: Global>(&mut self) -> Result<&mut G> {
        self.globals.get_mut::<G>()
    }

    pub fn local<T: 'static + Send + Sync>(&self) -> Option<&T> {
        self.state.locals.get::<T>()
    }

    pub fn local_mut<T: 'static + Send + Sync>(&mut self) -> Option<&mut T> {
        self.state.locals.get_mut::<T>()
    }

    pub fn local_or_insert_with<T: 'static + Send + Sync>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> &mut T {
        self.state.locals.get_or_insert_with(init)
    }

    /// Store a local, returning the one it replaced.
    pub fn set_local<T: 'static + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.state.locals.insert(value)
    }

    pub fn delete_local<T: 'static + Send + Sync>(&mut self) -> Option<T> {
        self.state.locals.remove::<T>()
    }

    // ── Scheduling ───────────────────────────────────────────────────────

    /// Enable every registration of `system`. Returns false if it was never
    /// registered.
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

    /// Number of ticks completed before the current one.
    pub fn cycle(&self) -> u64 {
        self.control.cycle
    }

    /// Host time passed to the current tick.
    pub fn elapsed(&self) -> Duration {
        self.control.elapsed
    }

    /// Pause the runtime once the current tick finishes.
    pub fn request_pause(&mut self) {
        self.control.pause_requested = true;
    }

    /// Stop the runtime once the current tick finishes.
    pub fn request_stop(&mut self) {
        self.control.stop_requested = true;
    }
}
