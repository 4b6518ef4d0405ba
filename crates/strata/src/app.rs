//! App builder and plugin system.
//!
//! [`App`] is a plain configuration value: component types, event channels,
//! global constructors and phase-bucketed systems. Nothing runs until
//! [`build`](App::build) turns it into a [`Runtime`].
//!
//! Plugins are just more configuration. Merging two apps concatenates every
//! list and drops duplicates (same type, or same system in the same phase),
//! keeping the first occurrence's position. Globals are the exception: a
//! later constructor for the same type replaces the earlier one in place.
//!
//! # Example
//!
//! ```ignore
//! use strata::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let mut runtime = App::new()
//!         .plugin(TimePlugin)
//!         .component::<Position>()
//!         .event::<Collision>()
//!         .startup(setup)
//!         .update(movement)
//!         .build()?;
//!     runtime.start_blocking()?;
//!     runtime.run(&mut FixedRateDriver::new(60))?;
//!     Ok(())
//! }
//! ```

use std::any::TypeId;
use std::rc::Rc;

use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::ecs::{Component, World};
use crate::error::{EcsError, Result};
use crate::event::{Event, EventBus};
use crate::resource::{Global, Globals};
use crate::runtime::Runtime;
use crate::schedule::{BoxFuture, Control, Phase, Schedule, SystemDecl};

/// A bundle of configuration that can be applied to an [`App`].
///
/// ```ignore
/// pub struct PhysicsPlugin;
///
/// impl Plugin for PhysicsPlugin {
///     fn build(&self, app: &mut App) {
///         app.add_component::<Velocity>();
///         app.add_system(Phase::Update, integrate);
///     }
/// }
/// ```
pub trait Plugin {
    fn build(&self, app: &mut App);
}

#[derive(Clone)]
struct ComponentDecl {
    type_id: TypeId,
    register: fn(&mut World),
}

#[derive(Clone)]
struct EventDecl {
    type_id: TypeId,
    declare: fn(&mut EventBus),
}

#[derive(Clone)]
struct GlobalDecl {
    type_id: TypeId,
    name: &'static str,
    insert: Rc<dyn Fn(&mut Globals)>,
}

fn register_component<T: Component>(world: &mut World) {
    world.register::<T>();
}

fn declare_event<E: Event>(events: &mut EventBus) {
    events.declare::<E>();
}

/// Runtime configuration under construction.
#[derive(Clone, Default)]
pub struct App {
    components: Vec<ComponentDecl>,
    events: Vec<EventDecl>,
    globals: Vec<GlobalDecl>,
    systems: Vec<(Phase, SystemDecl)>,
    /// Misconfigurations reported by `build`.
    errors: Vec<String>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Consuming builder ────────────────────────────────────────────────

    pub fn component<T: Component>(mut self) -> Self {
        self.add_component::<T>();
        self
    }

    pub fn event<E: Event>(mut self) -> Self {
        self.add_event::<E>();
        self
    }

    /// Construct `G` with `Default` when the runtime is built.
    pub fn global<G: Global + Default>(mut self) -> Self {
        self.add_global_with(G::default);
        self
    }

    /// Construct `G` with `init` when the runtime is built.
    pub fn global_with<G: Global>(mut self, init: impl Fn() -> G + 'static) -> Self {
        self.add_global_with(init);
        self
    }

    pub fn system<F>(mut self, phase: Phase, system: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<()> + 'static,
    {
        self.add_system(phase, system);
        self
    }

    /// A system that runs once in [`Phase::Startup`].
    pub fn startup<F>(self, system: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<()> + 'static,
    {
        self.system(Phase::Startup, system)
    }

    /// An asynchronous system that runs once in [`Phase::Startup`].
    pub fn startup_async<F>(mut self, system: F) -> Self
    where
        F: for<'a, 'b> Fn(&'a mut Context<'b>) -> BoxFuture<'a> + 'static,
    {
        self.add_async_system(Phase::Startup, system);
        self
    }

    /// A system that runs every tick in [`Phase::Update`].
    pub fn update<F>(self, system: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<()> + 'static,
    {
        self.system(Phase::Update, system)
    }

    pub fn shutdown<F>(self, system: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<()> + 'static,
    {
        self.system(Phase::Shutdown, system)
    }

    pub fn plugin(mut self, plugin: impl Plugin) -> Self {
        plugin.build(&mut self);
        self
    }

    /// Append everything in `other`, dropping duplicates.
    pub fn merge(mut self, other: &App) -> Self {
        self.merge_from(other);
        self
    }

    // ── In-place variants (for plugins) ──────────────────────────────────

    pub fn add_component<T: Component>(&mut self) -> &mut Self {
        let type_id = TypeId::of::<T>();
        if !self.components.iter().any(|c| c.type_id == type_id) {
            self.components.push(ComponentDecl {
                type_id,
                register: register_component::<T>,
            });
        }
        self
    }

    pub fn add_event<E: Event>(&mut self) -> &mut Self {
        let type_id = TypeId::of::<E>();
        if !self.events.iter().any(|e| e.type_id == type_id) {
            self.events.push(EventDecl {
                type_id,
                declare: declare_event::<E>,
            });
        }
        self
    }

    pub fn add_global_with<G: Global>(&mut self, init: impl Fn() -> G + 'static) -> &mut Self {
        self.push_global(GlobalDecl {
            type_id: TypeId::of::<G>(),
            name: std::any::type_name::<G>(),
            insert: Rc::new(move |globals: &mut Globals| globals.insert(init())),
        });
        self
    }

    pub fn add_system<F>(&mut self, phase: Phase, system: F) -> &mut Self
    where
        F: Fn(&mut Context<'_>) -> Result<()> + 'static,
    {
        self.push_system(phase, SystemDecl::sync(system));
        self
    }

    /// Asynchronous systems are only allowed in the startup phases; anything
    /// else makes [`build`](App::build) fail.
    pub fn add_async_system<F>(&mut self, phase: Phase, system: F) -> &mut Self
    where
        F: for<'a, 'b> Fn(&'a mut Context<'b>) -> BoxFuture<'a> + 'static,
    {
        let decl = SystemDecl::future(system);
        if !phase.is_startup() {
            self.errors.push(format!(
                "asynchronous system `{}` registered in {phase:?}",
                decl.name
            ));
            return self;
        }
        self.push_system(phase, decl);
        self
    }

    pub fn add_plugin(&mut self, plugin: impl Plugin) -> &mut Self {
        plugin.build(self);
        self
    }

    pub fn merge_from(&mut self, other: &App) -> &mut Self {
        for c in &other.components {
            if !self.components.iter().any(|own| own.type_id == c.type_id) {
                self.components.push(c.clone());
            }
        }
        for e in &other.events {
            if !self.events.iter().any(|own| own.type_id == e.type_id) {
                self.events.push(e.clone());
            }
        }
        for g in &other.globals {
            self.push_global(g.clone());
        }
        for (phase, decl) in &other.systems {
            self.push_system(*phase, decl.clone());
        }
        self.errors.extend(other.errors.iter().cloned());
        log::debug!(
            "merged app: {} components, {} events, {} globals, {} systems",
            self.components.len(),
            self.events.len(),
            self.globals.len(),
            self.systems.len()
        );
        self
    }

    fn push_global(&mut self, decl: GlobalDecl) {
        match self.globals.iter_mut().find(|g| g.type_id == decl.type_id) {
            Some(existing) => {
                log::debug!("replacing global constructor for `{}`", decl.name);
                *existing = decl;
            }
            None => self.globals.push(decl),
        }
    }

    fn push_system(&mut self, phase: Phase, decl: SystemDecl) {
        let duplicate = self
            .systems
            .iter()
            .any(|(p, own)| *p == phase && own.id == decl.id);
        if duplicate {
            log::debug!("system `{}` already in {phase:?}, skipping", decl.name);
        } else {
            self.systems.push((phase, decl));
        }
    }

    // ── Introspection ────────────────────────────────────────────────────

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Number of systems registered in `phase`.
    pub fn system_count(&self, phase: Phase) -> usize {
        self.systems.iter().filter(|(p, _)| *p == phase).count()
    }

    /// System names in `phase`, in run order.
    pub fn system_names(&self, phase: Phase) -> Vec<&str> {
        self.systems
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, decl)| decl.name.as_str())
            .collect()
    }

    // ── Build ────────────────────────────────────────────────────────────

    pub fn build(&self) -> Result<Runtime> {
        self.build_with(RuntimeConfig::default())
    }

    /// Instantiate every declaration into a fresh [`Runtime`].
    pub fn build_with(&self, config: RuntimeConfig) -> Result<Runtime> {
        config.validate()?;
        if let Some(first) = self.errors.first() {
            return Err(EcsError::InvalidConfig(first.clone()));
        }

        let mut world = World::with_config(&config);
        for c in &self.components {
            (c.register)(&mut world);
        }

        let mut events = EventBus::new();
        for e in &self.events {
            (e.declare)(&mut events);
        }

        let mut globals = Globals::new();
        for g in &self.globals {
            (g.insert)(&mut globals);
        }

        let schedule = Schedule::new(&self.systems);
        let control = Control::new(schedule.ids());

        log::debug!(
            "built runtime: {} components, {} channels, {} globals, {} systems",
            self.components.len(),
            events.len(),
            globals.len(),
            schedule.len()
        );
        Ok(Runtime::new(world, events, globals, schedule, control, config))
    }
}

/// An app is itself a plugin: applying it merges it in.
impl Plugin for App {
    fn build(&self, app: &mut App) {
        app.merge_from(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pos;
    impl Component for Pos {}

    struct Hit;

    #[derive(Default)]
    struct Level(u32);
    impl Global for Level {}

    fn a(_ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    fn b(_ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    fn load<'a>(_ctx: &'a mut Context<'_>) -> BoxFuture<'a> {
        Box::pin(async { Ok::<(), EcsError>(()) })
    }

    #[test]
    fn merge_deduplicates_preserving_order() {
        let left = App::new().component::<Pos>().event::<Hit>().update(a);
        let right = App::new()
            .component::<Pos>()
            .event::<Hit>()
            .update(b)
            .update(a)
            .startup(a);
        let merged = left.merge(&right);
        assert_eq!(merged.component_count(), 1);
        assert_eq!(merged.event_count(), 1);
        assert_eq!(merged.system_names(Phase::Update), vec!["a", "b"]);
        // Same function in another phase is a separate registration.
        assert_eq!(merged.system_count(Phase::Startup), 1);
    }

    #[test]
    fn later_global_constructor_wins() {
        let app = App::new()
            .global::<Level>()
            .merge(&App::new().global_with(|| Level(7)));
        assert_eq!(app.global_count(), 1);
        let runtime = app.build().unwrap();
        assert_eq!(runtime.globals().get::<Level>().unwrap().0, 7);
    }

    #[test]
    fn plugins_are_merged() {
        struct Physics;
        impl Plugin for Physics {
            fn build(&self, app: &mut App) {
                app.add_component::<Pos>().add_system(Phase::PostUpdate, b);
            }
        }
        let bundle = App::new().update(a);
        let app = App::new().plugin(Physics).plugin(bundle.clone()).plugin(bundle);
        assert_eq!(app.system_count(Phase::Update), 1);
        assert_eq!(app.system_count(Phase::PostUpdate), 1);
        assert_eq!(app.component_count(), 1);
    }

    #[test]
    fn async_systems_outside_startup_fail_the_build() {
        let mut app = App::new().startup_async(load);
        assert!(app.build().is_ok());
        app.add_async_system(Phase::Update, load);
        assert!(matches!(app.build(), Err(EcsError::InvalidConfig(_))));
    }

    #[test]
    fn build_rejects_bad_config() {
        let config = RuntimeConfig {
            eid_min: 5,
            eid_max: 1,
            ..Default::default()
        };
        assert!(App::new().build_with(config).is_err());
    }
}
