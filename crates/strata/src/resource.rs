//! Global and per-system resources.
//!
//! A *global* is a singleton that lives as long as the runtime and is visible
//! to every system. A *local* belongs to one system's context and nobody else
//! ever sees it. Both are keyed by type.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::{EcsError, Result};

/// A runtime-wide singleton.
///
/// The hooks run at fixed points of the runtime lifecycle and default to
/// doing nothing.
pub trait Global: 'static + Send + Sync {
    /// Before the first startup system.
    fn before_startup(&mut self) {}

    /// After startup, before the first tick.
    fn before_first_tick(&mut self) {}

    /// After the shutdown systems.
    fn on_shutdown(&mut self) {}
}

type Value = Box<dyn Any + Send + Sync>;
type HookFn = fn(&mut Value);

fn before_startup<G: Global>(value: &mut Value) {
    if let Some(global) = value.downcast_mut::<G>() {
        global.before_startup();
    }
}

fn before_first_tick<G: Global>(value: &mut Value) {
    if let Some(global) = value.downcast_mut::<G>() {
        global.before_first_tick();
    }
}

fn on_shutdown<G: Global>(value: &mut Value) {
    if let Some(global) = value.downcast_mut::<G>() {
        global.on_shutdown();
    }
}

struct GlobalSlot {
    value: Value,
    before_startup: HookFn,
    before_first_tick: HookFn,
    on_shutdown: HookFn,
}

/// All globals, in registration order.
#[derive(Default)]
pub struct Globals {
    slots: Vec<GlobalSlot>,
    index: HashMap<TypeId, usize>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`, replacing any previous `G` in place.
    pub fn insert<G: Global>(&mut self, value: G) {
        let slot = GlobalSlot {
            value: Box::new(value),
            before_startup: before_startup::<G>,
            before_first_tick: before_first_tick::<G>,
            on_shutdown: on_shutdown::<G>,
        };
        match self.index.get(&TypeId::of::<G>()) {
            Some(&i) => self.slots[i] = slot,
            None => {
                self.index.insert(TypeId::of::<G>(), self.slots.len());
                self.slots.push(slot);
            }
        }
    }

    pub fn contains<G: Global>(&self) -> bool {
        self.index.contains_key(&TypeId::of::<G>())
    }

    pub fn get<G: Global>(&self) -> Result<&G> {
        self.index
            .get(&TypeId::of::<G>())
            .and_then(|&i| self.slots[i].value.downcast_ref::<G>())
            .ok_or(EcsError::UnknownGlobalAccess(std::any::type_name::<G>()))
    }

    pub fn get_mut<G: Global>(&mut self) -> Result<&mut G> {
        match self.index.get(&TypeId::of::<G>()) {
            Some(&i) => self.slots[i]
                .value
                .downcast_mut::<G>()
                .ok_or(EcsError::UnknownGlobalAccess(std::any::type_name::<G>())),
            None => Err(EcsError::UnknownGlobalAccess(std::any::type_name::<G>())),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn run_before_startup(&mut self) {
        for slot in &mut self.slots {
            (slot.before_startup)(&mut slot.value);
        }
    }

    pub(crate) fn run_before_first_tick(&mut self) {
        for slot in &mut self.slots {
            (slot.before_first_tick)(&mut slot.value);
        }
    }

    pub(crate) fn run_on_shutdown(&mut self) {
        for slot in &mut self.slots {
            (slot.on_shutdown)(&mut slot.value);
        }
    }
}

/// Resources private to one system.
#[derive(Default)]
pub struct Locals {
    values: HashMap<TypeId, Value>,
}

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: 'static + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: 'static + Send + Sync>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    pub fn get_or_insert_with<T: 'static + Send + Sync>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        self.values
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(init()))
            .downcast_mut::<T>()
            .unwrap_or_else(|| unreachable!("local keyed by its own TypeId"))
    }

    /// Store `value`, returning the previous one.
    pub fn insert<T: 'static + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn remove<T: 'static + Send + Sync>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn contains<T: 'static + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Score {
        points: u32,
        phases: Vec<&'static str>,
    }

    impl Global for Score {
        fn before_startup(&mut self) {
            self.phases.push("startup");
        }

        fn on_shutdown(&mut self) {
            self.phases.push("shutdown");
        }
    }

    struct Missing;
    impl Global for Missing {}

    #[test]
    fn globals_by_type() {
        let mut globals = Globals::new();
        globals.insert(Score::default());
        globals.get_mut::<Score>().unwrap().points = 3;
        assert_eq!(globals.get::<Score>().unwrap().points, 3);
        assert_eq!(
            globals.get::<Missing>().err(),
            Some(EcsError::UnknownGlobalAccess(std::any::type_name::<Missing>()))
        );
    }

    #[test]
    fn reinsert_replaces_in_place() {
        let mut globals = Globals::new();
        globals.insert(Score::default());
        globals.insert(Missing);
        globals.insert(Score {
            points: 9,
            phases: Vec::new(),
        });
        assert_eq!(globals.len(), 2);
        assert_eq!(globals.get::<Score>().unwrap().points, 9);
    }

    #[test]
    fn lifecycle_hooks_dispatch_to_the_right_type() {
        let mut globals = Globals::new();
        globals.insert(Score::default());
        globals.run_before_startup();
        globals.run_before_first_tick();
        globals.run_on_shutdown();
        assert_eq!(globals.get::<Score>().unwrap().phases, vec!["startup", "shutdown"]);
    }

    #[test]
    fn locals() {
        let mut locals = Locals::new();
        assert!(locals.get::<u32>().is_none());
        *locals.get_or_insert_with(|| 1u32) += 1;
        assert_eq!(locals.get::<u32>(), Some(&2));
        assert_eq!(locals.insert(10u32), Some(2));
        assert_eq!(locals.remove::<u32>(), Some(10));
        assert!(!locals.contains::<u32>());
    }
}
