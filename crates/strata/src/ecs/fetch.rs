//! # Fetch — Typed Access to Cached Query Results
//!
//! [`QueryData`] turns a Rust type such as `(Entity, &mut Position, Option<&Velocity>)`
//! into a list of [`QueryItem`]s for the cache, and knows how to pull one
//! result out of storage for a given entity id.
//!
//! ## Lending columns
//!
//! The extract/restore trick: when a [`Query`] is built, every column it names
//! is moved out of the [`ComponentStore`] (see [`ComponentStore::lend`]) and
//! held by the query. Holding the columns by value lets `&mut` results from
//! different columns coexist without unsafe code, while the rest of the store
//! stays readable for filters and preprocessors. Dropping the query puts the
//! columns back.
//!
//! Cached ids are iterated in ascending order, so each column is walked with a
//! forward-only cursor (`slice::Iter::nth`).

use std::collections::BTreeSet;
use std::collections::btree_set;
use std::marker::PhantomData;

use super::allocator::Eid;
use super::component::{Component, ComponentKey, ComponentStore, Slot};
use super::entity::{Entity, EntityTable};
use super::hierarchy::Hierarchy;
use super::query::{PreprocessorKey, QueryId, QueryItem, QueryView};
use crate::error::{EcsError, Result};

/// A predicate-guarded transform usable as a query item via [`Processed`].
///
/// `validate` decides whether an entity matches at all; `process` produces the
/// value yielded for matching entities.
///
/// ```ignore
/// struct Speed;
///
/// impl Preprocess for Speed {
///     type Output<'w> = f32;
///
///     fn reads() -> Vec<ComponentKey> {
///         vec![ComponentKey::of::<Velocity>()]
///     }
///
///     fn validate(eid: Eid, view: &QueryView<'_>) -> bool {
///         view.get::<Velocity>(eid).is_some()
///     }
///
///     fn process<'w>(eid: Eid, view: &QueryView<'w>) -> f32 {
///         view.get::<Velocity>(eid).map_or(0.0, |v| v.0.length())
///     }
/// }
///
/// world.query::<(Entity, Processed<Speed>)>([])?;
/// ```
///
/// Columns lent to the same query are not visible to `validate`/`process`
/// while the query is alive, so every column listed in `reads` must not also
/// be fetched by that query (`ConflictingQueryAccess`).
pub trait Preprocess: 'static {
    type Output<'w>;

    /// Component columns `validate`/`process` look at.
    fn reads() -> Vec<ComponentKey> {
        Vec::new()
    }

    fn validate(eid: Eid, view: &QueryView<'_>) -> bool {
        let _ = (eid, view);
        true
    }

    fn process<'w>(eid: Eid, view: &QueryView<'w>) -> Self::Output<'w>;
}

/// Query item yielding `P::process` for every entity `P::validate` accepts.
pub struct Processed<P: Preprocess>(PhantomData<P>);

/// Yields the parent of entities that have one.
pub struct ParentOf;

impl Preprocess for ParentOf {
    type Output<'w> = Entity;

    fn validate(eid: Eid, view: &QueryView<'_>) -> bool {
        view.parent(eid).is_some()
    }

    fn process<'w>(eid: Eid, view: &QueryView<'w>) -> Entity {
        view.parent(eid)
            .and_then(|p| view.entity(p))
            .unwrap_or_else(|| panic!("query cache out of sync: entity id {eid} has no parent"))
    }
}

/// Something that can be fetched from the world per cached entity id.
pub trait QueryData {
    /// The value yielded per entity.
    type Item<'a>;

    /// Columns held while the query is alive.
    type State;

    /// Per-iteration cursor over `State`.
    type Fetch<'a>;

    /// Append this type's items to the descriptor.
    fn describe(items: &mut Vec<QueryItem>);

    /// Take the needed columns out of the store. The descriptor has already
    /// been checked, so no column is lent twice.
    fn lend(store: &mut ComponentStore) -> Result<Self::State>;

    /// Return the columns taken by [`lend`](Self::lend).
    fn give_back(state: Self::State, store: &mut ComponentStore);

    fn init_fetch<'a>(state: &'a mut Self::State, view: QueryView<'a>) -> Self::Fetch<'a>;

    /// Fetch the item for `eid`. Ids must be strictly increasing per cursor.
    fn fetch<'a>(fetch: &mut Self::Fetch<'a>, eid: Eid) -> Self::Item<'a>;
}

/// Forward-only reader over a lent column.
pub struct Cursor<'a> {
    slots: std::slice::Iter<'a, Slot>,
    next: Eid,
}

impl<'a> Cursor<'a> {
    fn new(slots: &'a [Slot]) -> Self {
        Self {
            slots: slots.iter(),
            next: 0,
        }
    }

    fn seek(&mut self, eid: Eid) -> Option<&'a Slot> {
        let skip = (eid - self.next) as usize;
        self.next = eid + 1;
        self.slots.nth(skip)
    }
}

/// Forward-only writer over a lent column.
pub struct CursorMut<'a> {
    slots: std::slice::IterMut<'a, Slot>,
    next: Eid,
}

impl<'a> CursorMut<'a> {
    fn new(slots: &'a mut [Slot]) -> Self {
        Self {
            slots: slots.iter_mut(),
            next: 0,
        }
    }

    fn seek(&mut self, eid: Eid) -> Option<&'a mut Slot> {
        let skip = (eid - self.next) as usize;
        self.next = eid + 1;
        self.slots.nth(skip)
    }
}

fn out_of_sync<T>(eid: Eid) -> ! {
    panic!(
        "query cache out of sync: entity id {eid} has no `{}`",
        std::any::type_name::<T>()
    )
}

impl<T: Component> QueryData for &T {
    type Item<'a> = &'a T;
    type State = Vec<Slot>;
    type Fetch<'a> = Cursor<'a>;

    fn describe(items: &mut Vec<QueryItem>) {
        items.push(QueryItem::Component(ComponentKey::of::<T>()));
    }

    fn lend(store: &mut ComponentStore) -> Result<Self::State> {
        store.lend(ComponentKey::of::<T>())
    }

    fn give_back(state: Self::State, store: &mut ComponentStore) {
        store.give_back(ComponentKey::of::<T>(), state);
    }

    fn init_fetch<'a>(state: &'a mut Self::State, _view: QueryView<'a>) -> Cursor<'a> {
        Cursor::new(state)
    }

    fn fetch<'a>(fetch: &mut Self::Fetch<'a>, eid: Eid) -> Self::Item<'a> {
        fetch
            .seek(eid)
            .and_then(|slot| slot.as_ref())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .unwrap_or_else(|| out_of_sync::<T>(eid))
    }
}

impl<T: Component> QueryData for &mut T {
    type Item<'a> = &'a mut T;
    type State = Vec<Slot>;
    type Fetch<'a> = CursorMut<'a>;

    fn describe(items: &mut Vec<QueryItem>) {
        items.push(QueryItem::Component(ComponentKey::of::<T>()));
    }

    fn lend(store: &mut ComponentStore) -> Result<Self::State> {
        store.lend(ComponentKey::of::<T>())
    }

    fn give_back(state: Self::State, store: &mut ComponentStore) {
        store.give_back(ComponentKey::of::<T>(), state);
    }

    fn init_fetch<'a>(state: &'a mut Self::State, _view: QueryView<'a>) -> CursorMut<'a> {
        CursorMut::new(state)
    }

    fn fetch<'a>(fetch: &mut Self::Fetch<'a>, eid: Eid) -> Self::Item<'a> {
        fetch
            .seek(eid)
            .and_then(|slot| slot.as_mut())
            .and_then(|boxed| boxed.downcast_mut::<T>())
            .unwrap_or_else(|| out_of_sync::<T>(eid))
    }
}

impl<T: Component> QueryData for Option<&T> {
    type Item<'a> = Option<&'a T>;
    type State = Vec<Slot>;
    type Fetch<'a> = Cursor<'a>;

    fn describe(items: &mut Vec<QueryItem>) {
        items.push(QueryItem::Optional(ComponentKey::of::<T>()));
    }

    fn lend(store: &mut ComponentStore) -> Result<Self::State> {
        store.lend(ComponentKey::of::<T>())
    }

    fn give_back(state: Self::State, store: &mut ComponentStore) {
        store.give_back(ComponentKey::of::<T>(), state);
    }

    fn init_fetch<'a>(state: &'a mut Self::State, _view: QueryView<'a>) -> Cursor<'a> {
        Cursor::new(state)
    }

    fn fetch<'a>(fetch: &mut Self::Fetch<'a>, eid: Eid) -> Self::Item<'a> {
        fetch
            .seek(eid)
            .and_then(|slot| slot.as_ref())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }
}

impl<T: Component> QueryData for Option<&mut T> {
    type Item<'a> = Option<&'a mut T>;
    type State = Vec<Slot>;
    type Fetch<'a> = CursorMut<'a>;

    fn describe(items: &mut Vec<QueryItem>) {
        items.push(QueryItem::Optional(ComponentKey::of::<T>()));
    }

    fn lend(store: &mut ComponentStore) -> Result<Self::State> {
        store.lend(ComponentKey::of::<T>())
    }

    fn give_back(state: Self::State, store: &mut ComponentStore) {
        store.give_back(ComponentKey::of::<T>(), state);
    }

    fn init_fetch<'a>(state: &'a mut Self::State, _view: QueryView<'a>) -> CursorMut<'a> {
        CursorMut::new(state)
    }

    fn fetch<'a>(fetch: &mut Self::Fetch<'a>, eid: Eid) -> Self::Item<'a> {
        fetch
            .seek(eid)
            .and_then(|slot| slot.as_mut())
            .and_then(|boxed| boxed.downcast_mut::<T>())
    }
}

impl QueryData for Entity {
    type Item<'a> = Entity;
    type State = ();
    type Fetch<'a> = &'a EntityTable;

    fn describe(items: &mut Vec<QueryItem>) {
        items.push(QueryItem::Entity);
    }

    fn lend(_store: &mut ComponentStore) -> Result<()> {
        Ok(())
    }

    fn give_back(_state: (), _store: &mut ComponentStore) {}

    fn init_fetch<'a>(_state: &'a mut (), view: QueryView<'a>) -> &'a EntityTable {
        view.entities
    }

    fn fetch<'a>(fetch: &mut Self::Fetch<'a>, eid: Eid) -> Self::Item<'a> {
        fetch
            .entity_of(eid)
            .unwrap_or_else(|| panic!("query cache out of sync: entity id {eid} is not alive"))
    }
}

impl<P: Preprocess> QueryData for Processed<P> {
    type Item<'a> = P::Output<'a>;
    type State = ();
    type Fetch<'a> = QueryView<'a>;

    fn describe(items: &mut Vec<QueryItem>) {
        items.push(QueryItem::Processed(PreprocessorKey::of::<P>()));
    }

    fn lend(_store: &mut ComponentStore) -> Result<()> {
        Ok(())
    }

    fn give_back(_state: (), _store: &mut ComponentStore) {}

    fn init_fetch<'a>(_state: &'a mut (), view: QueryView<'a>) -> QueryView<'a> {
        view
    }

    fn fetch<'a>(fetch: &mut Self::Fetch<'a>, eid: Eid) -> Self::Item<'a> {
        P::process(eid, fetch)
    }
}

macro_rules! impl_query_data_tuple {
    ($($Q:ident),+) => {
        impl<$($Q: QueryData),+> QueryData for ($($Q,)+) {
            type Item<'a> = ($($Q::Item<'a>,)+);
            type State = ($($Q::State,)+);
            type Fetch<'a> = ($($Q::Fetch<'a>,)+);

            fn describe(items: &mut Vec<QueryItem>) {
                $($Q::describe(items);)+
            }

            fn lend(store: &mut ComponentStore) -> Result<Self::State> {
                Ok(($($Q::lend(store)?,)+))
            }

            #[allow(non_snake_case)]
            fn give_back(state: Self::State, store: &mut ComponentStore) {
                let ($($Q,)+) = state;
                $($Q::give_back($Q, store);)+
            }

            #[allow(non_snake_case)]
            fn init_fetch<'a>(state: &'a mut Self::State, view: QueryView<'a>) -> Self::Fetch<'a> {
                let ($($Q,)+) = state;
                ($($Q::init_fetch($Q, view),)+)
            }

            #[allow(non_snake_case)]
            fn fetch<'a>(fetch: &mut Self::Fetch<'a>, eid: Eid) -> Self::Item<'a> {
                let ($($Q,)+) = fetch;
                ($($Q::fetch($Q, eid),)+)
            }
        }
    };
}

impl_query_data_tuple!(A);
impl_query_data_tuple!(A, B);
impl_query_data_tuple!(A, B, C);
impl_query_data_tuple!(A, B, C, D);
impl_query_data_tuple!(A, B, C, D, E);
impl_query_data_tuple!(A, B, C, D, E, F);
impl_query_data_tuple!(A, B, C, D, E, F, G);
impl_query_data_tuple!(A, B, C, D, E, F, G, H);

/// A live view over one cached query.
///
/// Obtained from [`World::query`](super::world::World::query). Borrows the
/// world mutably for as long as it lives; the cached result set is read as
/// is, never rescanned.
pub struct Query<'w, Q: QueryData> {
    id: QueryId,
    matches: &'w BTreeSet<Eid>,
    store: &'w mut ComponentStore,
    entities: &'w EntityTable,
    hierarchy: &'w Hierarchy,
    state: Option<Q::State>,
}

impl<'w, Q: QueryData> Query<'w, Q> {
    pub(crate) fn new(
        id: QueryId,
        matches: &'w BTreeSet<Eid>,
        store: &'w mut ComponentStore,
        entities: &'w EntityTable,
        hierarchy: &'w Hierarchy,
    ) -> Result<Self> {
        let state = Q::lend(store)?;
        Ok(Self {
            id,
            matches,
            store,
            entities,
            hierarchy,
            state: Some(state),
        })
    }

    /// Cache entry backing this view.
    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity) && self.matches.contains(&entity.index())
    }

    /// Matching entities in id order.
    pub fn entities(&self) -> Vec<Entity> {
        self.matches
            .iter()
            .filter_map(|&eid| self.entities.entity_of(eid))
            .collect()
    }

    pub fn iter(&mut self) -> QueryIter<'_, Q> {
        let view = QueryView::new(&*self.store, self.entities, self.hierarchy);
        let state = self
            .state
            .as_mut()
            .expect("query columns are held until drop");
        QueryIter {
            eids: self.matches.iter(),
            fetch: Q::init_fetch(state, view),
        }
    }

    pub fn for_each(&mut self, mut f: impl FnMut(Q::Item<'_>)) {
        for item in self.iter() {
            f(item);
        }
    }

    /// The only match, or `None` unless there is exactly one.
    pub fn single(&mut self) -> Option<Q::Item<'_>> {
        if self.len() == 1 {
            self.iter().next()
        } else {
            None
        }
    }

    /// The only match; zero or several matches are errors.
    pub fn expect_single(&mut self) -> Result<Q::Item<'_>> {
        match self.len() {
            0 => Err(EcsError::NoResultsInQuery),
            1 => self.iter().next().ok_or(EcsError::NoResultsInQuery),
            n => Err(EcsError::MultipleResultsInQuery(n)),
        }
    }
}

impl<Q: QueryData> Drop for Query<'_, Q> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            Q::give_back(state, self.store);
        }
    }
}

/// Iterator over a [`Query`]'s results.
pub struct QueryIter<'a, Q: QueryData> {
    eids: btree_set::Iter<'a, Eid>,
    fetch: Q::Fetch<'a>,
}

impl<'a, Q: QueryData> Iterator for QueryIter<'a, Q> {
    type Item = Q::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let &eid = self.eids.next()?;
        Some(Q::fetch(&mut self.fetch, eid))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.eids.size_hint()
    }
}

impl<Q: QueryData> ExactSizeIterator for QueryIter<'_, Q> {}
