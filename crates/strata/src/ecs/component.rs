//! # Component — Dense Per-Type Storage Indexed by Entity Id
//!
//! Every registered component type owns one growable column of optional,
//! type-erased slots. The slot for an entity lives at index `eid`, so lookups
//! are a bounds check plus a downcast:
//!
//! ```text
//! Position: [Some(p0), None,     Some(p2), None, ...]
//! Velocity: [None,     Some(v1), Some(v2), None, ...]
//!            eid 0     eid 1     eid 2     eid 3
//! ```
//!
//! All columns share one capacity. When an id beyond it is written, every
//! column doubles together and the new slots start out empty.
//!
//! Slots are `Box<dyn Any + Send + Sync>`: no unsafe, type checked on access.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use super::allocator::Eid;
use super::world::EntityMut;
use crate::error::{EcsError, Result};

/// Default number of slots each column starts with.
pub const DEFAULT_CAPACITY: usize = 1000;

/// One type-erased component slot.
pub(crate) type Slot = Option<Box<dyn Any + Send + Sync>>;

/// Identity of a component type plus its name for error messages.
#[derive(Debug, Clone, Copy)]
pub struct ComponentKey {
    pub id: TypeId,
    pub name: &'static str,
}

impl ComponentKey {
    pub fn of<T: Component>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

impl PartialEq for ComponentKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentKey {}

impl std::hash::Hash for ComponentKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Lifecycle hook signature, see [`Component`].
pub type HookFn = for<'a, 'w> fn(&'a mut EntityMut<'w>) -> Result<()>;

/// Data that can be attached to an entity.
///
/// Both hooks default to doing nothing. `on_insert` runs after the entity is
/// fully created (components stored, parent attached, queries updated);
/// `on_destroy` runs before anything is torn down. A hook error aborts the
/// surrounding create or destroy and is returned to its caller.
///
/// ```ignore
/// struct Health(u32);
///
/// impl Component for Health {
///     fn on_destroy(entity: &mut EntityMut<'_>) -> Result<()> {
///         log::info!("{:?} died", entity.id());
///         Ok(())
///     }
/// }
/// ```
pub trait Component: 'static + Send + Sync {
    fn on_insert(_entity: &mut EntityMut<'_>) -> Result<()> {
        Ok(())
    }

    fn on_destroy(_entity: &mut EntityMut<'_>) -> Result<()> {
        Ok(())
    }
}

/// Column for one registered component type.
struct ComponentColumn {
    name: &'static str,
    slots: Vec<Slot>,
    /// Set while a query holds the slots (see [`ComponentStore::lend`]).
    lent: bool,
    on_insert: HookFn,
    on_destroy: HookFn,
}

/// All component columns, keyed by type.
pub struct ComponentStore {
    /// Columns in registration order.
    columns: Vec<ComponentColumn>,
    index: HashMap<TypeId, usize>,
    capacity: usize,
}

impl ComponentStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            columns: Vec::new(),
            index: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register `T`. Registering twice is a no-op.
    pub fn register<T: Component>(&mut self) {
        let tid = TypeId::of::<T>();
        if self.index.contains_key(&tid) {
            return;
        }
        let mut slots = Vec::with_capacity(self.capacity);
        slots.resize_with(self.capacity, || None);
        self.index.insert(tid, self.columns.len());
        self.columns.push(ComponentColumn {
            name: std::any::type_name::<T>(),
            slots,
            lent: false,
            on_insert: T::on_insert,
            on_destroy: T::on_destroy,
        });
    }

    pub fn is_registered(&self, tid: TypeId) -> bool {
        self.index.contains_key(&tid)
    }

    /// Number of slots per column.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of registered types.
    pub fn type_count(&self) -> usize {
        self.columns.len()
    }

    fn column(&self, tid: TypeId, name: &'static str) -> Result<&ComponentColumn> {
        self.index
            .get(&tid)
            .map(|&i| &self.columns[i])
            .ok_or(EcsError::UnknownComponentType(name))
    }

    fn column_mut(&mut self, tid: TypeId, name: &'static str) -> Result<&mut ComponentColumn> {
        match self.index.get(&tid) {
            Some(&i) => Ok(&mut self.columns[i]),
            None => Err(EcsError::UnknownComponentType(name)),
        }
    }

    pub fn get<T: Component>(&self, eid: Eid) -> Result<Option<&T>> {
        let col = self.column(TypeId::of::<T>(), std::any::type_name::<T>())?;
        Ok(col
            .slots
            .get(eid as usize)
            .and_then(|slot| slot.as_ref())
            .and_then(|boxed| boxed.downcast_ref::<T>()))
    }

    pub fn get_mut<T: Component>(&mut self, eid: Eid) -> Result<Option<&mut T>> {
        let col = self.column_mut(TypeId::of::<T>(), std::any::type_name::<T>())?;
        Ok(col
            .slots
            .get_mut(eid as usize)
            .and_then(|slot| slot.as_mut())
            .and_then(|boxed| boxed.downcast_mut::<T>()))
    }

    /// Whether `eid` holds a value of type `key`.
    pub fn contains(&self, key: ComponentKey, eid: Eid) -> Result<bool> {
        let col = self.column(key.id, key.name)?;
        Ok(col.slots.get(eid as usize).is_some_and(|slot| slot.is_some()))
    }

    /// Store `value` for `eid`, replacing any previous value.
    pub fn set<T: Component>(&mut self, eid: Eid, value: T) -> Result<()> {
        let key = ComponentKey::of::<T>();
        self.column(key.id, key.name)?;
        if eid as usize >= self.capacity {
            self.grow(eid as usize);
        }
        let col = self.column_mut(key.id, key.name)?;
        col.slots[eid as usize] = Some(Box::new(value));
        Ok(())
    }

    /// Clear `eid`'s slot for `T`. Returns whether a value was present.
    pub fn delete<T: Component>(&mut self, eid: Eid) -> Result<bool> {
        let col = self.column_mut(TypeId::of::<T>(), std::any::type_name::<T>())?;
        Ok(col
            .slots
            .get_mut(eid as usize)
            .and_then(|slot| slot.take())
            .is_some())
    }

    /// Clear every column's slot for `eid`.
    pub fn delete_all(&mut self, eid: Eid) {
        for col in &mut self.columns {
            if let Some(slot) = col.slots.get_mut(eid as usize) {
                *slot = None;
            }
        }
    }

    /// Destroy hooks of the components `eid` currently holds, in
    /// registration order.
    pub(crate) fn destroy_hooks(&self, eid: Eid) -> Vec<HookFn> {
        self.columns
            .iter()
            .filter(|col| col.slots.get(eid as usize).is_some_and(|s| s.is_some()))
            .map(|col| col.on_destroy)
            .collect()
    }

    pub(crate) fn insert_hook(&self, key: ComponentKey) -> Option<HookFn> {
        self.index.get(&key.id).map(|&i| self.columns[i].on_insert)
    }

    /// Names of the components `eid` currently holds.
    pub fn component_names(&self, eid: Eid) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|col| col.slots.get(eid as usize).is_some_and(|s| s.is_some()))
            .map(|col| col.name)
            .collect()
    }

    /// Double every column until `eid` fits.
    fn grow(&mut self, eid: usize) {
        let mut capacity = self.capacity;
        while eid >= capacity {
            capacity *= 2;
        }
        log::debug!("growing component store {} -> {capacity} slots", self.capacity);
        for col in &mut self.columns {
            // A lent column is restored at its old length and topped up on return.
            if !col.lent {
                col.slots.resize_with(capacity, || None);
            }
        }
        self.capacity = capacity;
    }

    /// Move a column's slots out so a query can hold them mutably while the
    /// rest of the store stays readable. Must be paired with [`give_back`].
    ///
    /// [`give_back`]: Self::give_back
    pub(crate) fn lend(&mut self, key: ComponentKey) -> Result<Vec<Slot>> {
        let col = self.column_mut(key.id, key.name)?;
        if col.lent {
            return Err(EcsError::ConflictingQueryAccess(key.name));
        }
        col.lent = true;
        Ok(std::mem::take(&mut col.slots))
    }

    pub(crate) fn give_back(&mut self, key: ComponentKey, mut slots: Vec<Slot>) {
        let capacity = self.capacity;
        let Some(&i) = self.index.get(&key.id) else {
            return;
        };
        let col = &mut self.columns[i];
        slots.resize_with(capacity, || None);
        col.slots = slots;
        col.lent = false;
    }
}

impl Default for ComponentStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Position(i32, i32);
    impl Component for Position {}

    #[derive(Debug, PartialEq)]
    struct Velocity(i32);
    impl Component for Velocity {}

    struct Unregistered;
    impl Component for Unregistered {}

    fn store() -> ComponentStore {
        let mut store = ComponentStore::new(4);
        store.register::<Position>();
        store.register::<Velocity>();
        store
    }

    #[test]
    fn set_and_get() {
        let mut store = store();
        store.set(1, Position(3, 4)).unwrap();
        assert_eq!(store.get::<Position>(1).unwrap(), Some(&Position(3, 4)));
        assert_eq!(store.get::<Position>(0).unwrap(), None);
        assert_eq!(store.get::<Velocity>(1).unwrap(), None);
    }

    #[test]
    fn unregistered_type_fails() {
        let mut store = store();
        assert_eq!(
            store.set(0, Unregistered).unwrap_err(),
            EcsError::UnknownComponentType(std::any::type_name::<Unregistered>())
        );
        assert!(store.get::<Unregistered>(0).is_err());
        assert!(store.delete::<Unregistered>(0).is_err());
    }

    #[test]
    fn set_beyond_capacity_grows_all_columns() {
        let mut store = store();
        assert_eq!(store.capacity(), 4);

        store.set(9, Velocity(1)).unwrap();
        assert_eq!(store.capacity(), 16);
        assert_eq!(store.get::<Velocity>(9).unwrap(), Some(&Velocity(1)));
        // The other column grew in lockstep and its new slots are empty.
        assert_eq!(store.get::<Position>(15).unwrap(), None);
        store.set(15, Position(0, 0)).unwrap();
        assert_eq!(store.capacity(), 16);
    }

    #[test]
    fn delete_and_delete_all() {
        let mut store = store();
        store.set(2, Position(1, 1)).unwrap();
        store.set(2, Velocity(5)).unwrap();

        assert!(store.delete::<Velocity>(2).unwrap());
        assert!(!store.delete::<Velocity>(2).unwrap());

        store.set(2, Velocity(6)).unwrap();
        assert_eq!(store.component_names(2).len(), 2);
        store.delete_all(2);
        assert!(store.component_names(2).is_empty());
    }

    #[test]
    fn lending_a_column_twice_conflicts() {
        let mut store = store();
        let key = ComponentKey::of::<Position>();
        let slots = store.lend(key).unwrap();
        assert_eq!(
            store.lend(key).unwrap_err(),
            EcsError::ConflictingQueryAccess(key.name)
        );
        store.give_back(key, slots);
        assert!(store.lend(key).is_ok());
    }
}
