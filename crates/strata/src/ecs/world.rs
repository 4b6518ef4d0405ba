//! # World — The Entity Registry
//!
//! The [`World`] owns every piece of entity state and keeps them consistent:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ World                                                │
//! │                                                      │
//! │  entities:   EntityTable   ids, generations, tags    │
//! │  hierarchy:  Hierarchy     parent/child arena        │
//! │  components: ComponentStore one column per type      │
//! │  queries:    QueryCache    descriptor → matching ids │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutating call (create, destroy, tag, untag, insert, delete,
//! re-parent) re-checks the touched entity against every live query cache
//! before returning, together with its parent and direct children. Query
//! results are therefore never stale between calls, and reading them never
//! scans.
//!
//! ## Destruction does not cascade
//!
//! Destroying an entity detaches its children and leaves them alive as roots.
//! Use [`World::despawn_recursive`] to take a whole subtree down.

use super::allocator::Eid;
use super::component::{Component, ComponentKey, ComponentStore};
use super::entity::{Entity, EntityTable, Tag, UniqueTag};
use super::fetch::{Query, QueryData};
use super::hierarchy::Hierarchy;
use super::query::{Filter, QueryCache, QueryDescriptor, QueryView};
use crate::config::RuntimeConfig;
use crate::error::{EcsError, Result};

/// Entity, component, hierarchy and query state.
pub struct World {
    entities: EntityTable,
    hierarchy: Hierarchy,
    components: ComponentStore,
    queries: QueryCache,
    /// Entities whose destroy hooks are running.
    dying: Vec<Eid>,
    /// Number of entities spawned this tick (diagnostics only).
    #[cfg(feature = "diagnostics")]
    spawned_this_tick: u32,
    /// Number of entities destroyed this tick (diagnostics only).
    #[cfg(feature = "diagnostics")]
    destroyed_this_tick: u32,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }

    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self {
            entities: EntityTable::new(config.eid_min, config.eid_max),
            hierarchy: Hierarchy::new(),
            components: ComponentStore::new(config.initial_capacity),
            queries: QueryCache::new(),
            dying: Vec::new(),
            #[cfg(feature = "diagnostics")]
            spawned_this_tick: 0,
            #[cfg(feature = "diagnostics")]
            destroyed_this_tick: 0,
        }
    }

    /// Register component type `T`. Registering twice is a no-op.
    pub fn register<T: Component>(&mut self) {
        self.components.register::<T>();
    }

    pub fn is_registered<T: Component>(&self) -> bool {
        self.components.is_registered(std::any::TypeId::of::<T>())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of distinct query caches.
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    pub fn components(&self) -> &ComponentStore {
        &self.components
    }

    pub(crate) fn query_cache(&self) -> &QueryCache {
        &self.queries
    }

    pub fn view(&self) -> QueryView<'_> {
        QueryView::new(&self.components, &self.entities, &self.hierarchy)
    }

    /// Re-check `eids` against every cache.
    fn revalidate(&mut self, eids: impl IntoIterator<Item = Eid>) {
        let view = QueryView::new(&self.components, &self.entities, &self.hierarchy);
        for eid in eids {
            if view.entities.entity_of(eid).is_some() {
                self.queries.validate(eid, &view);
            }
        }
    }

    /// Re-check `eid` and its direct neighbours after a component or tag change.
    fn touch(&mut self, eid: Eid) {
        let mut eids = vec![eid];
        eids.extend(self.hierarchy.parent(eid));
        eids.extend_from_slice(self.hierarchy.children(eid));
        self.revalidate(eids);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Create a root entity from a bundle.
    ///
    /// ```ignore
    /// let e = world.spawn((Position { x: 0, y: 0 }, Velocity { dx: 1, dy: 0 }))?;
    /// ```
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Result<Entity> {
        self.create(bundle, None)
    }

    /// Create an entity attached under `parent`.
    pub fn spawn_child<B: Bundle>(&mut self, parent: Entity, bundle: B) -> Result<Entity> {
        self.create(bundle, Some(parent))
    }

    /// Create an entity with `bundle`, optionally under `parent`.
    ///
    /// Every component type must be registered; nothing is allocated if one
    /// is not. Insert hooks run last, in bundle order.
    pub fn create<B: Bundle>(&mut self, bundle: B, parent: Option<Entity>) -> Result<Entity> {
        let keys = B::keys();
        if let Some(key) = keys.iter().find(|k| !self.components.is_registered(k.id)) {
            return Err(EcsError::UnknownComponentType(key.name));
        }
        if let Some(parent) = parent {
            self.entities.check(parent)?;
        }

        let entity = self.entities.allocate()?;
        bundle.store(entity.index, &mut self.components)?;
        self.hierarchy.insert(entity.index);
        if let Some(parent) = parent {
            self.hierarchy.attach(entity.index, parent.index);
        }
        #[cfg(feature = "diagnostics")]
        {
            self.spawned_this_tick += 1;
        }
        log::trace!("spawned {entity:?} (parent {parent:?})");

        self.revalidate(std::iter::once(entity.index).chain(parent.map(|p| p.index)));

        for key in keys {
            if !self.entities.is_alive(entity) {
                break;
            }
            if let Some(hook) = self.components.insert_hook(key) {
                hook(&mut EntityMut {
                    world: self,
                    entity,
                })?;
            }
        }
        Ok(entity)
    }

    /// Destroy `entity`. Its children become roots.
    ///
    /// Destroy hooks run first, for each component the entity holds, in
    /// registration order. A hook error aborts the destroy and leaves the
    /// entity alive.
    pub fn destroy(&mut self, entity: Entity) -> Result<()> {
        self.entities.check(entity)?;
        if self.dying.contains(&entity.index) {
            return Ok(());
        }

        self.dying.push(entity.index);
        let hooks = self.components.destroy_hooks(entity.index);
        let mut result = Ok(());
        for hook in hooks {
            result = hook(&mut EntityMut {
                world: self,
                entity,
            });
            if result.is_err() {
                break;
            }
        }
        self.dying.retain(|&eid| eid != entity.index);
        result?;

        self.components.delete_all(entity.index);
        let (parent, orphans) = self.hierarchy.remove(entity.index);
        self.entities.free(entity);
        self.queries.evict(entity.index);
        #[cfg(feature = "diagnostics")]
        {
            self.destroyed_this_tick += 1;
        }
        log::trace!("destroyed {entity:?}, {} children orphaned", orphans.len());

        self.revalidate(parent.into_iter().chain(orphans));
        Ok(())
    }

    /// Destroy `entity` and every descendant, leaves first.
    pub fn despawn_recursive(&mut self, entity: Entity) -> Result<()> {
        self.entities.check(entity)?;
        let mut doomed: Vec<Entity> = self
            .hierarchy
            .descendants(entity.index)
            .into_iter()
            .filter_map(|eid| self.entities.entity_of(eid))
            .collect();
        doomed.reverse();
        doomed.push(entity);
        for e in doomed {
            if self.entities.is_alive(e) {
                self.destroy(e)?;
            }
        }
        Ok(())
    }

    /// Destroy every live entity.
    pub fn despawn_all(&mut self) -> Result<()> {
        let all: Vec<Entity> = self
            .entities
            .live()
            .filter_map(|eid| self.entities.entity_of(eid))
            .collect();
        for entity in all {
            if self.entities.is_alive(entity) {
                self.destroy(entity)?;
            }
        }
        Ok(())
    }

    pub fn entity_mut(&mut self, entity: Entity) -> Result<EntityMut<'_>> {
        self.entities.check(entity)?;
        Ok(EntityMut {
            world: self,
            entity,
        })
    }

    // ── Components ───────────────────────────────────────────────────

    /// Attach `value` to `entity`, replacing any previous `T`.
    pub fn insert<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.entities.check(entity)?;
        self.components.set(entity.index, value)?;
        log::trace!("{entity:?} += {}", std::any::type_name::<T>());
        self.touch(entity.index);
        Ok(())
    }

    /// Remove `T` from `entity`. Returns whether it was present.
    pub fn delete<T: Component>(&mut self, entity: Entity) -> Result<bool> {
        self.entities.check(entity)?;
        let removed = self.components.delete::<T>(entity.index)?;
        if removed {
            log::trace!("{entity:?} -= {}", std::any::type_name::<T>());
            self.touch(entity.index);
        }
        Ok(removed)
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Result<Option<&T>> {
        self.entities.check(entity)?;
        self.components.get::<T>(entity.index)
    }

    /// Mutable access to one component. Does not change which queries the
    /// entity matches, so no re-validation happens.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<Option<&mut T>> {
        self.entities.check(entity)?;
        self.components.get_mut::<T>(entity.index)
    }

    pub fn has<T: Component>(&self, entity: Entity) -> Result<bool> {
        self.entities.check(entity)?;
        self.components
            .contains(ComponentKey::of::<T>(), entity.index)
    }

    /// Every component in `B`, or `None` if any is missing.
    ///
    /// ```ignore
    /// if let Some((pos, vel)) = world.get_many::<(Position, Velocity)>(e)? { ... }
    /// ```
    pub fn get_many<B: Bundle>(&self, entity: Entity) -> Result<Option<B::Refs<'_>>> {
        self.entities.check(entity)?;
        B::refs(entity.index, &self.components)
    }

    // ── Tags ─────────────────────────────────────────────────────────

    pub fn tag(&mut self, entity: Entity, tag: impl Into<Tag>) -> Result<()> {
        self.tag_all(entity, [tag.into()])
    }

    /// Attach every tag, or none if a unique tag is already held.
    pub fn tag_all(&mut self, entity: Entity, tags: impl IntoIterator<Item = Tag>) -> Result<()> {
        let tags: Vec<Tag> = tags.into_iter().collect();
        self.entities.add_tags(entity, &tags)?;
        self.touch(entity.index);
        Ok(())
    }

    /// Remove `tag`. Returns whether the entity held it.
    pub fn untag(&mut self, entity: Entity, tag: impl Into<Tag>) -> Result<bool> {
        let removed = self.entities.remove_tag(entity, &tag.into())?;
        if removed {
            self.touch(entity.index);
        }
        Ok(removed)
    }

    pub fn has_tag(&self, entity: Entity, tag: impl Into<Tag>) -> Result<bool> {
        self.entities.check(entity)?;
        Ok(self.entities.has_tag(entity.index, &tag.into()))
    }

    pub fn unique_holder(&self, tag: UniqueTag) -> Option<Entity> {
        self.entities.unique_holder(tag)
    }

    pub fn tagged(&self, tag: impl Into<Tag>) -> Vec<Entity> {
        self.entities.tagged(&tag.into())
    }

    // ── Hierarchy ────────────────────────────────────────────────────

    pub fn parent(&self, entity: Entity) -> Result<Option<Entity>> {
        self.entities.check(entity)?;
        Ok(self
            .hierarchy
            .parent(entity.index)
            .and_then(|eid| self.entities.entity_of(eid)))
    }

    pub fn children(&self, entity: Entity) -> Result<Vec<Entity>> {
        self.children_filtered(entity, &[])
    }

    /// Direct children passing every filter, in attach order.
    pub fn children_filtered(&self, entity: Entity, filters: &[Filter]) -> Result<Vec<Entity>> {
        self.entities.check(entity)?;
        for filter in filters {
            filter.check(&self.components)?;
        }
        let view = self.view();
        Ok(self
            .hierarchy
            .children(entity.index)
            .iter()
            .filter(|&&eid| filters.iter().all(|f| f.test(eid, &view)))
            .filter_map(|&eid| self.entities.entity_of(eid))
            .collect())
    }

    /// All descendants, breadth first.
    pub fn descendants(&self, entity: Entity) -> Result<Vec<Entity>> {
        self.entities.check(entity)?;
        Ok(self
            .hierarchy
            .descendants(entity.index)
            .into_iter()
            .filter_map(|eid| self.entities.entity_of(eid))
            .collect())
    }

    pub fn root_of(&self, entity: Entity) -> Result<Entity> {
        self.entities.check(entity)?;
        let root = self.hierarchy.root_of(entity.index);
        Ok(self.entities.entity_of(root).unwrap_or(entity))
    }

    /// Move `child` under `parent`, detaching it from its old parent.
    pub fn set_parent(&mut self, child: Entity, parent: Entity) -> Result<()> {
        self.entities.check(child)?;
        self.entities.check(parent)?;
        if self.hierarchy.is_ancestor(child.index, parent.index) {
            return Err(EcsError::HierarchyCycle { child, parent });
        }
        let old = self.hierarchy.attach(child.index, parent.index);
        self.revalidate([child.index, parent.index].into_iter().chain(old));
        Ok(())
    }

    /// Make `child` a root. Returns its former parent.
    pub fn remove_parent(&mut self, child: Entity) -> Result<Option<Entity>> {
        self.entities.check(child)?;
        let old = self.hierarchy.detach(child.index);
        self.revalidate(std::iter::once(child.index).chain(old));
        Ok(old.and_then(|eid| self.entities.entity_of(eid)))
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Resolve (or reuse) the cache for `Q` plus `filters` and open a view.
    ///
    /// ```ignore
    /// let mut q = world.query::<(Entity, &mut Position)>([with::<Player>()])?;
    /// for (e, pos) in q.iter() {
    ///     pos.x += 1;
    /// }
    /// ```
    pub fn query<Q: QueryData>(
        &mut self,
        filters: impl IntoIterator<Item = Filter>,
    ) -> Result<Query<'_, Q>> {
        let mut items = Vec::new();
        Q::describe(&mut items);
        let descriptor = QueryDescriptor::new(items, filters.into_iter().collect());
        descriptor.check(&self.components)?;

        let view = QueryView::new(&self.components, &self.entities, &self.hierarchy);
        let id = self.queries.resolve(descriptor, &view);
        Query::new(
            id,
            self.queries.matches(id),
            &mut self.components,
            &self.entities,
            &self.hierarchy,
        )
    }

    /// Reset the per-tick spawn/destroy counters, returning their values.
    #[cfg(feature = "diagnostics")]
    pub(crate) fn take_tick_counters(&mut self) -> (u32, u32) {
        let counts = (self.spawned_this_tick, self.destroyed_this_tick);
        self.spawned_this_tick = 0;
        self.destroyed_this_tick = 0;
        counts
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable handle to one live entity.
///
/// Component hooks receive one of these; so does anything that wants to chain
/// several operations on the same entity.
pub struct EntityMut<'w> {
    world: &'w mut World,
    entity: Entity,
}

impl<'w> EntityMut<'w> {
    pub fn id(&self) -> Entity {
        self.entity
    }

    pub fn is_alive(&self) -> bool {
        self.world.is_alive(self.entity)
    }

    /// The whole world, for work beyond this entity.
    pub fn world(&mut self) -> &mut World {
        self.world
    }

    pub fn insert<T: Component>(&mut self, value: T) -> Result<&mut Self> {
        self.world.insert(self.entity, value)?;
        Ok(self)
    }

    pub fn delete<T: Component>(&mut self) -> Result<bool> {
        self.world.delete::<T>(self.entity)
    }

    pub fn access<T: Component>(&self) -> Result<Option<&T>> {
        self.world.get::<T>(self.entity)
    }

    pub fn access_mut<T: Component>(&mut self) -> Result<Option<&mut T>> {
        self.world.get_mut::<T>(self.entity)
    }

    pub fn access_many<B: Bundle>(&self) -> Result<Option<B::Refs<'_>>> {
        self.world.get_many::<B>(self.entity)
    }

    pub fn has<T: Component>(&self) -> Result<bool> {
        self.world.has::<T>(self.entity)
    }

    pub fn tag(&mut self, tag: impl Into<Tag>) -> Result<&mut Self> {
        self.world.tag(self.entity, tag)?;
        Ok(self)
    }

    pub fn tag_all(&mut self, tags: impl IntoIterator<Item = Tag>) -> Result<&mut Self> {
        self.world.tag_all(self.entity, tags)?;
        Ok(self)
    }

    pub fn untag(&mut self, tag: impl Into<Tag>) -> Result<bool> {
        self.world.untag(self.entity, tag)
    }

    pub fn has_tag(&self, tag: impl Into<Tag>) -> Result<bool> {
        self.world.has_tag(self.entity, tag)
    }

    pub fn parent(&self) -> Result<Option<Entity>> {
        self.world.parent(self.entity)
    }

    pub fn children(&self, filters: &[Filter]) -> Result<Vec<Entity>> {
        self.world.children_filtered(self.entity, filters)
    }

    /// Create a child of this entity.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Result<Entity> {
        self.world.spawn_child(self.entity, bundle)
    }

    pub fn set_parent(&mut self, parent: Entity) -> Result<()> {
        self.world.set_parent(self.entity, parent)
    }

    pub fn remove_parent(&mut self) -> Result<Option<Entity>> {
        self.world.remove_parent(self.entity)
    }

    pub fn destroy(self) -> Result<()> {
        self.world.destroy(self.entity)
    }
}

/// A set of components created together.
///
/// Implemented for `()` and tuples of up to 8 components.
pub trait Bundle: 'static {
    /// Shared references to every member, see [`World::get_many`].
    type Refs<'a>;

    fn keys() -> Vec<ComponentKey>;

    fn store(self, eid: Eid, store: &mut ComponentStore) -> Result<()>;

    fn refs(eid: Eid, store: &ComponentStore) -> Result<Option<Self::Refs<'_>>>;
}

impl Bundle for () {
    type Refs<'a> = ();

    fn keys() -> Vec<ComponentKey> {
        Vec::new()
    }

    fn store(self, _eid: Eid, _store: &mut ComponentStore) -> Result<()> {
        Ok(())
    }

    fn refs(_eid: Eid, _store: &ComponentStore) -> Result<Option<()>> {
        Ok(Some(()))
    }
}

macro_rules! impl_bundle {
    ($($T:ident),+) => {
        impl<$($T: Component),+> Bundle for ($($T,)+) {
            type Refs<'a> = ($(&'a $T,)+);

            fn keys() -> Vec<ComponentKey> {
                vec![$(ComponentKey::of::<$T>()),+]
            }

            #[allow(non_snake_case)]
            fn store(self, eid: Eid, store: &mut ComponentStore) -> Result<()> {
                let ($($T,)+) = self;
                $(store.set(eid, $T)?;)+
                Ok(())
            }

            fn refs(eid: Eid, store: &ComponentStore) -> Result<Option<Self::Refs<'_>>> {
                Ok(Some(($(
                    match store.get::<$T>(eid)? {
                        Some(value) => value,
                        None => return Ok(None),
                    },
                )+)))
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::fetch::{ParentOf, Preprocess, Processed};
    use crate::ecs::query::{child_with, has_no_parent, tagged, with, without};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: i32,
        y: i32,
    }
    impl Component for Position {}

    #[derive(Debug, PartialEq)]
    struct Velocity {
        dx: i32,
        dy: i32,
    }
    impl Component for Velocity {}

    struct Marker;
    impl Component for Marker {}

    struct Unregistered;
    impl Component for Unregistered {}

    static INSERTS: AtomicUsize = AtomicUsize::new(0);
    static DESTROYS: AtomicUsize = AtomicUsize::new(0);

    struct Hooked;
    impl Component for Hooked {
        fn on_insert(entity: &mut EntityMut<'_>) -> Result<()> {
            INSERTS.fetch_add(1, Ordering::SeqCst);
            entity.insert(Marker)?;
            Ok(())
        }

        fn on_destroy(entity: &mut EntityMut<'_>) -> Result<()> {
            DESTROYS.fetch_add(1, Ordering::SeqCst);
            // Destroying the entity again from its own hook is a no-op.
            let id = entity.id();
            entity.world().destroy(id)
        }
    }

    fn world() -> World {
        let mut world = World::new();
        world.register::<Position>();
        world.register::<Velocity>();
        world.register::<Marker>();
        world.register::<Hooked>();
        world
    }

    #[test]
    fn spawn_and_query() {
        let mut world = world();
        world
            .spawn((Position { x: 1, y: 2 }, Velocity { dx: 1, dy: 1 }))
            .unwrap();
        world
            .spawn((Position { x: 3, y: 4 }, Velocity { dx: 2, dy: 2 }))
            .unwrap();
        world.spawn((Position { x: 5, y: 6 },)).unwrap();

        let mut q = world.query::<(&Position, &Velocity)>([]).unwrap();
        assert_eq!(q.len(), 2);
        let xs: Vec<i32> = q.iter().map(|(p, _)| p.x).collect();
        assert_eq!(xs, vec![1, 3]);
    }

    #[test]
    fn query_mutate() {
        let mut world = world();
        let e = world
            .spawn((Position { x: 0, y: 0 }, Velocity { dx: 1, dy: 2 }))
            .unwrap();

        world
            .query::<(&mut Position, &Velocity)>([])
            .unwrap()
            .for_each(|(pos, vel)| {
                pos.x += vel.dx;
                pos.y += vel.dy;
            });

        assert_eq!(world.get::<Position>(e).unwrap(), Some(&Position { x: 1, y: 2 }));
    }

    #[test]
    fn unregistered_bundle_allocates_nothing() {
        let mut world = world();
        let err = world.spawn((Position { x: 0, y: 0 }, Unregistered)).unwrap_err();
        assert!(matches!(err, EcsError::UnknownComponentType(_)));
        assert_eq!(world.entity_count(), 0);
        // The first id is still free.
        let e = world.spawn(()).unwrap();
        assert_eq!(e.index(), 0);
    }

    #[test]
    fn stale_handles_fail() {
        let mut world = world();
        let e = world.spawn((Position { x: 0, y: 0 },)).unwrap();
        world.destroy(e).unwrap();
        let reused = world.spawn(()).unwrap();
        assert_eq!(reused.index(), e.index());

        assert_eq!(world.get::<Position>(e), Err(EcsError::InvalidEntity(e)));
        assert_eq!(world.destroy(e), Err(EcsError::InvalidEntity(e)));
        assert!(world.entity_mut(e).is_err());
        assert!(world.tag(e, "x").is_err());
    }

    #[test]
    fn insert_and_delete_update_cached_queries() {
        let mut world = world();
        let e = world.spawn((Position { x: 0, y: 0 },)).unwrap();
        assert_eq!(world.query::<(&Position, &Velocity)>([]).unwrap().len(), 0);

        world.insert(e, Velocity { dx: 1, dy: 0 }).unwrap();
        assert_eq!(world.query::<(&Position, &Velocity)>([]).unwrap().len(), 1);

        assert!(world.delete::<Velocity>(e).unwrap());
        assert!(!world.delete::<Velocity>(e).unwrap());
        assert_eq!(world.query::<(&Position, &Velocity)>([]).unwrap().len(), 0);
        assert_eq!(world.query_count(), 1);
    }

    #[test]
    fn filters_and_optional_items() {
        let mut world = world();
        let a = world.spawn((Position { x: 1, y: 0 }, Marker)).unwrap();
        let b = world.spawn((Position { x: 2, y: 0 },)).unwrap();
        world.tag(b, "enemy").unwrap();

        assert_eq!(
            world.query::<(Entity,)>([with::<Marker>()]).unwrap().entities(),
            vec![a]
        );
        assert_eq!(
            world.query::<(Entity,)>([without::<Marker>()]).unwrap().entities(),
            vec![b]
        );
        assert_eq!(
            world.query::<(Entity,)>([tagged("enemy")]).unwrap().entities(),
            vec![b]
        );

        let mut q = world.query::<(Entity, Option<&Velocity>)>([]).unwrap();
        assert!(q.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn tag_changes_revalidate() {
        let mut world = world();
        let e = world.spawn(()).unwrap();
        assert!(world.query::<(Entity,)>([tagged("boss")]).unwrap().is_empty());
        world.tag(e, "boss").unwrap();
        assert_eq!(world.query::<(Entity,)>([tagged("boss")]).unwrap().len(), 1);
        assert!(world.untag(e, "boss").unwrap());
        assert!(world.query::<(Entity,)>([tagged("boss")]).unwrap().is_empty());
    }

    #[test]
    fn destroy_orphans_children_and_revalidates_them() {
        let mut world = world();
        let parent = world.spawn((Marker,)).unwrap();
        let child = world.spawn_child(parent, (Position { x: 0, y: 0 },)).unwrap();

        assert_eq!(
            world.query::<(Entity,)>([has_no_parent()]).unwrap().entities(),
            vec![parent]
        );
        assert_eq!(
            world.query::<(Entity,)>([child_with::<Position>()]).unwrap().entities(),
            vec![parent]
        );

        world.destroy(parent).unwrap();
        assert!(world.is_alive(child));
        assert_eq!(world.parent(child).unwrap(), None);
        assert_eq!(
            world.query::<(Entity,)>([has_no_parent()]).unwrap().entities(),
            vec![child]
        );
        assert!(world.query::<(Entity,)>([child_with::<Position>()]).unwrap().is_empty());
    }

    #[test]
    fn child_component_changes_reach_parent_filters() {
        let mut world = world();
        let parent = world.spawn(()).unwrap();
        let child = world.spawn_child(parent, ()).unwrap();
        assert!(world.query::<(Entity,)>([child_with::<Marker>()]).unwrap().is_empty());

        world.insert(child, Marker).unwrap();
        assert_eq!(
            world.query::<(Entity,)>([child_with::<Marker>()]).unwrap().entities(),
            vec![parent]
        );
    }

    #[test]
    fn reparenting() {
        let mut world = world();
        let a = world.spawn(()).unwrap();
        let b = world.spawn(()).unwrap();
        let c = world.spawn_child(a, ()).unwrap();

        world.set_parent(c, b).unwrap();
        assert!(world.children(a).unwrap().is_empty());
        assert_eq!(world.children(b).unwrap(), vec![c]);

        assert_eq!(
            world.set_parent(b, c),
            Err(EcsError::HierarchyCycle { child: b, parent: c })
        );
        assert_eq!(
            world.set_parent(b, b),
            Err(EcsError::HierarchyCycle { child: b, parent: b })
        );

        assert_eq!(world.remove_parent(c).unwrap(), Some(b));
        assert_eq!(world.root_of(c).unwrap(), c);
    }

    #[test]
    fn parent_preprocessor() {
        let mut world = world();
        let p = world.spawn(()).unwrap();
        let c = world.spawn_child(p, ()).unwrap();
        let mut q = world.query::<(Entity, Processed<ParentOf>)>([]).unwrap();
        assert_eq!(q.iter().collect::<Vec<_>>(), vec![(c, p)]);
    }

    struct Speed;

    impl Preprocess for Speed {
        type Output<'w> = i32;

        fn reads() -> Vec<ComponentKey> {
            vec![ComponentKey::of::<Velocity>()]
        }

        fn validate(eid: Eid, view: &QueryView<'_>) -> bool {
            view.get::<Velocity>(eid).is_some()
        }

        fn process<'w>(eid: Eid, view: &QueryView<'w>) -> i32 {
            view.get::<Velocity>(eid).map_or(0, |v| v.dx.abs() + v.dy.abs())
        }
    }

    #[test]
    fn preprocessor_reads_cannot_overlap_fetched_columns() {
        let mut world = world();
        let moving = world
            .spawn((Position { x: 0, y: 0 }, Velocity { dx: 3, dy: -4 }))
            .unwrap();
        world.spawn((Position { x: 1, y: 1 },)).unwrap();

        assert_eq!(
            world.query::<(&Velocity, Processed<Speed>)>([]).err(),
            Some(EcsError::ConflictingQueryAccess(
                std::any::type_name::<Velocity>()
            ))
        );

        let mut q = world.query::<(Entity, &mut Position, Processed<Speed>)>([]).unwrap();
        let rows: Vec<(Entity, i32)> = q.iter().map(|(e, _, speed)| (e, speed)).collect();
        assert_eq!(rows, vec![(moving, 7)]);
    }

    #[test]
    fn children_filtered_by_query_filters() {
        let mut world = world();
        let root = world.spawn(()).unwrap();
        let mut handle = world.entity_mut(root).unwrap();
        let a = handle.spawn((Marker,)).unwrap();
        let _b = handle.spawn(()).unwrap();
        assert_eq!(handle.children(&[with::<Marker>()]).unwrap(), vec![a]);
        assert_eq!(handle.children(&[]).unwrap().len(), 2);
    }

    #[test]
    fn access_many_is_all_or_nothing() {
        let mut world = world();
        let e = world.spawn((Position { x: 1, y: 1 },)).unwrap();
        assert!(world.get_many::<(Position, Velocity)>(e).unwrap().is_none());

        world.insert(e, Velocity { dx: 0, dy: 3 }).unwrap();
        let (p, v) = world.get_many::<(Position, Velocity)>(e).unwrap().unwrap();
        assert_eq!((p.x, v.dy), (1, 3));
    }

    #[test]
    fn hooks_run_on_create_and_destroy() {
        let mut world = world();
        let before_insert = INSERTS.load(Ordering::SeqCst);
        let before_destroy = DESTROYS.load(Ordering::SeqCst);

        let e = world.spawn((Hooked,)).unwrap();
        assert_eq!(INSERTS.load(Ordering::SeqCst), before_insert + 1);
        // The insert hook added a marker.
        assert!(world.has::<Marker>(e).unwrap());

        world.destroy(e).unwrap();
        assert_eq!(DESTROYS.load(Ordering::SeqCst), before_destroy + 1);
        assert!(!world.is_alive(e));
    }

    #[test]
    fn despawn_recursive_takes_the_subtree() {
        let mut world = world();
        let root = world.spawn(()).unwrap();
        let mid = world.spawn_child(root, ()).unwrap();
        let _leaf = world.spawn_child(mid, ()).unwrap();
        let other = world.spawn(()).unwrap();

        world.despawn_recursive(root).unwrap();
        assert_eq!(world.entity_count(), 1);
        assert!(world.is_alive(other));
    }

    #[test]
    fn conflicting_access_is_rejected() {
        let mut world = world();
        assert!(matches!(
            world.query::<(&Position, &mut Position)>([]),
            Err(EcsError::ConflictingQueryAccess(_))
        ));
        // Nothing stays lent after the failure.
        assert!(world.query::<(&mut Position,)>([]).is_ok());
    }

    #[test]
    fn single_and_expect_single() {
        let mut world = world();
        assert_eq!(
            world.query::<(&Position,)>([]).unwrap().expect_single().err(),
            Some(EcsError::NoResultsInQuery)
        );
        world.spawn((Position { x: 7, y: 0 },)).unwrap();
        {
            let mut q = world.query::<(&Position,)>([]).unwrap();
            assert_eq!(q.single().map(|(p,)| p.x), Some(7));
        }
        world.spawn((Position { x: 8, y: 0 },)).unwrap();
        let mut q = world.query::<(&Position,)>([]).unwrap();
        assert!(q.single().is_none());
        assert_eq!(
            q.expect_single().err(),
            Some(EcsError::MultipleResultsInQuery(2))
        );
    }
}
