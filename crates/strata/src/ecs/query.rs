//! # Query — Descriptors, Filters and the Incremental Result Cache
//!
//! A query is described by an ordered list of [`QueryItem`]s (what each result
//! yields) and an ordered list of [`Filter`]s (extra boolean conditions):
//!
//! ```text
//! world.query::<(Entity, &mut Position)>([with::<Player>(), has_no_parent()])
//!
//! items:   [Entity, Component(Position)]
//! filters: [has_all(Player), is_root()]
//! ```
//!
//! ## Caching
//!
//! Each distinct descriptor owns one [`BTreeSet`] of matching entity ids. The
//! set is seeded by a full scan the first time the descriptor is seen and from
//! then on kept current by the world: every create, destroy, tag or component
//! mutation re-checks the touched ids against every cache. Iterating a query
//! never scans.
//!
//! Descriptors are compared structurally. Two call sites asking for the same
//! items with the same filters (same predicate function, equal arguments)
//! resolve to the same [`QueryId`] and share the cache entry.
//!
//! ## Filters
//!
//! A [`Filter`] is a plain function pointer plus bound [`QueryArg`]s. It may
//! look at the entity itself, its parent and its direct children; the world
//! re-checks exactly those neighbours after a mutation.

use std::any::TypeId;
use std::collections::BTreeSet;
use std::fmt;

use super::allocator::Eid;
use super::component::{Component, ComponentKey, ComponentStore};
use super::entity::{Entity, EntityTable, Tag};
use super::fetch::Preprocess;
use super::hierarchy::Hierarchy;
use crate::error::{EcsError, Result};

/// Read-only view of everything a filter or preprocessor may inspect.
#[derive(Clone, Copy)]
pub struct QueryView<'w> {
    pub(crate) components: &'w ComponentStore,
    pub(crate) entities: &'w EntityTable,
    pub(crate) hierarchy: &'w Hierarchy,
}

impl<'w> QueryView<'w> {
    pub(crate) fn new(
        components: &'w ComponentStore,
        entities: &'w EntityTable,
        hierarchy: &'w Hierarchy,
    ) -> Self {
        Self {
            components,
            entities,
            hierarchy,
        }
    }

    /// Whether `eid` holds a component of type `key`. Unregistered types and
    /// columns currently lent to a query read as absent.
    pub fn has(&self, key: ComponentKey, eid: Eid) -> bool {
        self.components.contains(key, eid).unwrap_or(false)
    }

    pub fn get<T: Component>(&self, eid: Eid) -> Option<&'w T> {
        let components: &'w ComponentStore = self.components;
        components.get::<T>(eid).ok().flatten()
    }

    pub fn has_tag(&self, eid: Eid, tag: &Tag) -> bool {
        self.entities.has_tag(eid, tag)
    }

    pub fn parent(&self, eid: Eid) -> Option<Eid> {
        self.hierarchy.parent(eid)
    }

    pub fn children(&self, eid: Eid) -> &'w [Eid] {
        let hierarchy: &'w Hierarchy = self.hierarchy;
        hierarchy.children(eid)
    }

    pub fn entity(&self, eid: Eid) -> Option<Entity> {
        self.entities.entity_of(eid)
    }
}

// ── Descriptor parts ─────────────────────────────────────────────────────

/// An argument bound into a [`Filter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryArg {
    Component(ComponentKey),
    Tag(Tag),
    Int(i64),
    Text(String),
}

impl From<ComponentKey> for QueryArg {
    fn from(key: ComponentKey) -> Self {
        QueryArg::Component(key)
    }
}

impl From<Tag> for QueryArg {
    fn from(tag: Tag) -> Self {
        QueryArg::Tag(tag)
    }
}

impl From<i64> for QueryArg {
    fn from(value: i64) -> Self {
        QueryArg::Int(value)
    }
}

impl From<&str> for QueryArg {
    fn from(value: &str) -> Self {
        QueryArg::Text(value.to_string())
    }
}

/// Filter predicate signature.
pub type Predicate = for<'a, 'w> fn(Eid, &'a QueryView<'w>, &'a [QueryArg]) -> bool;

/// A boolean condition over one entity.
///
/// Identity is the predicate's address plus argument equality, so filters
/// built by the same constructor with the same arguments are interchangeable.
#[derive(Clone)]
pub struct Filter {
    predicate: Predicate,
    args: Vec<QueryArg>,
}

impl Filter {
    pub fn new(predicate: Predicate, args: Vec<QueryArg>) -> Self {
        Self { predicate, args }
    }

    pub fn args(&self) -> &[QueryArg] {
        &self.args
    }

    pub fn test(&self, eid: Eid, view: &QueryView<'_>) -> bool {
        (self.predicate)(eid, view, &self.args)
    }

    /// Every component argument must be registered.
    pub(crate) fn check(&self, store: &ComponentStore) -> Result<()> {
        for arg in &self.args {
            if let QueryArg::Component(key) = arg {
                if !store.is_registered(key.id) {
                    return Err(EcsError::UnknownComponentType(key.name));
                }
            }
        }
        Ok(())
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.predicate as usize == other.predicate as usize && self.args == other.args
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("predicate", &(self.predicate as usize as *const ()))
            .field("args", &self.args)
            .finish()
    }
}

/// Identity of a [`Preprocess`] implementation inside a descriptor.
#[derive(Clone, Copy)]
pub struct PreprocessorKey {
    id: TypeId,
    name: &'static str,
    validate: for<'a, 'w> fn(Eid, &'a QueryView<'w>) -> bool,
    reads: fn() -> Vec<ComponentKey>,
}

impl PreprocessorKey {
    pub fn of<P: Preprocess>() -> Self {
        Self {
            id: TypeId::of::<P>(),
            name: std::any::type_name::<P>(),
            validate: P::validate,
            reads: P::reads,
        }
    }
}

impl PartialEq for PreprocessorKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PreprocessorKey {}

impl fmt::Debug for PreprocessorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preprocessor({})", self.name)
    }
}

/// One slot of a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryItem {
    /// The entity handle itself. Always matches.
    Entity,
    /// A required component.
    Component(ComponentKey),
    /// A component that may be absent. Always matches.
    Optional(ComponentKey),
    /// A predicate-guarded transform.
    Processed(PreprocessorKey),
}

impl QueryItem {
    fn matches(&self, eid: Eid, view: &QueryView<'_>) -> bool {
        match self {
            QueryItem::Entity | QueryItem::Optional(_) => true,
            QueryItem::Component(key) => view.has(*key, eid),
            QueryItem::Processed(p) => (p.validate)(eid, view),
        }
    }

    /// The column this item borrows from the store, if any.
    pub(crate) fn column(&self) -> Option<ComponentKey> {
        match self {
            QueryItem::Component(key) | QueryItem::Optional(key) => Some(*key),
            QueryItem::Entity | QueryItem::Processed(_) => None,
        }
    }
}

/// Structural description of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub items: Vec<QueryItem>,
    pub filters: Vec<Filter>,
}

impl QueryDescriptor {
    pub fn new(items: Vec<QueryItem>, filters: Vec<Filter>) -> Self {
        Self { items, filters }
    }

    pub fn matches(&self, eid: Eid, view: &QueryView<'_>) -> bool {
        self.items.iter().all(|item| item.matches(eid, view))
            && self.filters.iter().all(|filter| filter.test(eid, view))
    }

    /// Reject unregistered types, columns fetched twice and preprocessors
    /// reading a column the query itself holds.
    pub(crate) fn check(&self, store: &ComponentStore) -> Result<()> {
        let mut seen: Vec<ComponentKey> = Vec::new();
        for key in self.items.iter().filter_map(QueryItem::column) {
            if !store.is_registered(key.id) {
                return Err(EcsError::UnknownComponentType(key.name));
            }
            if seen.contains(&key) {
                return Err(EcsError::ConflictingQueryAccess(key.name));
            }
            seen.push(key);
        }
        let processed = self.items.iter().filter_map(|item| match item {
            QueryItem::Processed(p) => Some(p),
            _ => None,
        });
        for preprocessor in processed {
            for key in (preprocessor.reads)() {
                if !store.is_registered(key.id) {
                    return Err(EcsError::UnknownComponentType(key.name));
                }
                if seen.contains(&key) {
                    return Err(EcsError::ConflictingQueryAccess(key.name));
                }
            }
        }
        self.filters.iter().try_for_each(|f| f.check(store))
    }
}

// ── Built-in filters ─────────────────────────────────────────────────────

fn has_all(eid: Eid, view: &QueryView<'_>, args: &[QueryArg]) -> bool {
    args.iter().all(|arg| match arg {
        QueryArg::Component(key) => view.has(*key, eid),
        _ => true,
    })
}

fn has_none(eid: Eid, view: &QueryView<'_>, args: &[QueryArg]) -> bool {
    !args
        .iter()
        .any(|arg| matches!(arg, QueryArg::Component(key) if view.has(*key, eid)))
}

fn has_tags(eid: Eid, view: &QueryView<'_>, args: &[QueryArg]) -> bool {
    args.iter().all(|arg| match arg {
        QueryArg::Tag(tag) => view.has_tag(eid, tag),
        _ => true,
    })
}

fn lacks_tags(eid: Eid, view: &QueryView<'_>, args: &[QueryArg]) -> bool {
    !args
        .iter()
        .any(|arg| matches!(arg, QueryArg::Tag(tag) if view.has_tag(eid, tag)))
}

fn any_child_has(eid: Eid, view: &QueryView<'_>, args: &[QueryArg]) -> bool {
    view.children(eid)
        .iter()
        .any(|&child| has_all(child, view, args))
}

fn is_root(eid: Eid, view: &QueryView<'_>, _args: &[QueryArg]) -> bool {
    view.parent(eid).is_none()
}

/// Entity holds a `T`.
pub fn with<T: Component>() -> Filter {
    Filter::new(has_all, vec![ComponentKey::of::<T>().into()])
}

/// Entity holds every listed component.
pub fn with_all(keys: &[ComponentKey]) -> Filter {
    Filter::new(has_all, keys.iter().map(|&k| k.into()).collect())
}

/// Entity holds no `T`.
pub fn without<T: Component>() -> Filter {
    Filter::new(has_none, vec![ComponentKey::of::<T>().into()])
}

pub fn tagged(tag: impl Into<Tag>) -> Filter {
    Filter::new(has_tags, vec![QueryArg::Tag(tag.into())])
}

pub fn not_tagged(tag: impl Into<Tag>) -> Filter {
    Filter::new(lacks_tags, vec![QueryArg::Tag(tag.into())])
}

/// At least one direct child holds a `T`.
pub fn child_with<T: Component>() -> Filter {
    Filter::new(any_child_has, vec![ComponentKey::of::<T>().into()])
}

/// Entity is a hierarchy root.
pub fn has_no_parent() -> Filter {
    Filter::new(is_root, Vec::new())
}

// ── Cache ────────────────────────────────────────────────────────────────

/// Handle to a cache entry. Equal descriptors yield equal ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(usize);

impl QueryId {
    /// Position of the entry in the cache, in creation order.
    pub fn index(self) -> usize {
        self.0
    }
}

struct CacheEntry {
    descriptor: QueryDescriptor,
    matches: BTreeSet<Eid>,
}

/// Every descriptor seen so far, each with its current result set.
#[derive(Default)]
pub struct QueryCache {
    entries: Vec<CacheEntry>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the entry for `descriptor`, creating and seeding it on first use.
    pub fn resolve(&mut self, descriptor: QueryDescriptor, view: &QueryView<'_>) -> QueryId {
        if let Some(i) = self.entries.iter().position(|e| e.descriptor == descriptor) {
            return QueryId(i);
        }

        let matches: BTreeSet<Eid> = view
            .entities
            .live()
            .filter(|&eid| descriptor.matches(eid, view))
            .collect();
        log::debug!(
            "new query cache #{} ({} items, {} filters, {} initial matches)",
            self.entries.len(),
            descriptor.items.len(),
            descriptor.filters.len(),
            matches.len()
        );
        self.entries.push(CacheEntry {
            descriptor,
            matches,
        });
        QueryId(self.entries.len() - 1)
    }

    /// Re-check one live entity against every cache.
    pub fn validate(&mut self, eid: Eid, view: &QueryView<'_>) {
        for entry in &mut self.entries {
            if entry.descriptor.matches(eid, view) {
                entry.matches.insert(eid);
            } else {
                entry.matches.remove(&eid);
            }
        }
    }

    /// Drop `eid` from every cache.
    pub fn evict(&mut self, eid: Eid) {
        for entry in &mut self.entries {
            entry.matches.remove(&eid);
        }
    }

    pub fn matches(&self, id: QueryId) -> &BTreeSet<Eid> {
        &self.entries[id.0].matches
    }

    pub fn descriptor(&self, id: QueryId) -> &QueryDescriptor {
        &self.entries[id.0].descriptor
    }

    pub fn ids(&self) -> impl Iterator<Item = QueryId> + '_ {
        (0..self.entries.len()).map(QueryId)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    impl Component for Position {}

    struct Frozen;
    impl Component for Frozen {}

    struct Parts {
        components: ComponentStore,
        entities: EntityTable,
        hierarchy: Hierarchy,
    }

    impl Parts {
        fn new() -> Self {
            let mut components = ComponentStore::new(16);
            components.register::<Position>();
            components.register::<Frozen>();
            Self {
                components,
                entities: EntityTable::new(0, 100),
                hierarchy: Hierarchy::new(),
            }
        }

        fn spawn(&mut self) -> Eid {
            let e = self.entities.allocate().unwrap().index();
            self.hierarchy.insert(e);
            e
        }

        fn view(&self) -> QueryView<'_> {
            QueryView::new(&self.components, &self.entities, &self.hierarchy)
        }
    }

    fn position_query(filters: Vec<Filter>) -> QueryDescriptor {
        QueryDescriptor::new(
            vec![QueryItem::Component(ComponentKey::of::<Position>())],
            filters,
        )
    }

    #[test]
    fn equal_descriptors_share_an_entry() {
        let parts = Parts::new();
        let mut cache = QueryCache::new();
        let a = cache.resolve(position_query(vec![without::<Frozen>()]), &parts.view());
        let b = cache.resolve(position_query(vec![without::<Frozen>()]), &parts.view());
        let c = cache.resolve(position_query(vec![with::<Frozen>()]), &parts.view());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn with_and_with_all_are_the_same_filter() {
        assert_eq!(
            with::<Frozen>(),
            with_all(&[ComponentKey::of::<Frozen>()])
        );
        assert_ne!(with::<Frozen>(), without::<Frozen>());
        assert_ne!(tagged("a"), tagged("b"));
    }

    #[test]
    fn seeded_by_full_scan_then_validated() {
        let mut parts = Parts::new();
        let a = parts.spawn();
        let b = parts.spawn();
        parts.components.set(a, Position).unwrap();

        let mut cache = QueryCache::new();
        let id = cache.resolve(position_query(vec![]), &parts.view());
        assert_eq!(cache.matches(id).iter().copied().collect::<Vec<_>>(), vec![a]);

        parts.components.set(b, Position).unwrap();
        cache.validate(b, &parts.view());
        parts.components.delete::<Position>(a).unwrap();
        cache.validate(a, &parts.view());
        assert_eq!(cache.matches(id).iter().copied().collect::<Vec<_>>(), vec![b]);

        cache.evict(b);
        assert!(cache.matches(id).is_empty());
    }

    #[test]
    fn hierarchy_filters() {
        let mut parts = Parts::new();
        let parent = parts.spawn();
        let child = parts.spawn();
        parts.hierarchy.attach(child, parent);
        parts.components.set(child, Frozen).unwrap();

        let view = parts.view();
        assert!(has_no_parent().test(parent, &view));
        assert!(!has_no_parent().test(child, &view));
        assert!(child_with::<Frozen>().test(parent, &view));
        assert!(!child_with::<Frozen>().test(child, &view));
    }

    #[test]
    fn check_rejects_duplicate_columns() {
        let parts = Parts::new();
        let key = ComponentKey::of::<Position>();
        let desc = QueryDescriptor::new(
            vec![QueryItem::Component(key), QueryItem::Optional(key)],
            vec![],
        );
        assert_eq!(
            desc.check(&parts.components),
            Err(EcsError::ConflictingQueryAccess(key.name))
        );
    }
}
