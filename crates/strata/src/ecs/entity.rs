//! # Entity — Handles, Liveness and Tags
//!
//! An [`Entity`] is just a number plus a generation. The [`World`] maps it to
//! components; the entity itself owns nothing.
//!
//! ## Generations
//!
//! Entity ids are recycled (see [`IdAllocator`]). A handle saved before its
//! entity was destroyed must not silently start referring to whatever entity
//! gets the id next, so every id slot carries a generation that is bumped on
//! destroy:
//!
//! ```text
//! Entity { index: 5, generation: 0 }  ← original
//! Entity { index: 5, generation: 1 }  ← after recycle
//! ```
//!
//! The stale handle still says `generation: 0`, so every operation on it fails
//! with [`EcsError::InvalidEntity`].
//!
//! ## Tags
//!
//! A [`Tag`] is either a free-form label (any number of entities may share it)
//! or a [`UniqueTag`], a symbolic marker that at most one live entity may hold.
//!
//! [`World`]: super::world::World
//! [`IdAllocator`]: super::allocator::IdAllocator

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::allocator::{Eid, IdAllocator};
use crate::error::{EcsError, Result};

/// A lightweight handle to an entity in the [`World`](super::world::World).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    pub(crate) index: Eid,
    pub(crate) generation: u32,
}

impl Entity {
    /// The raw id. Indexes component storage.
    pub fn index(self) -> Eid {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// A symbolic tag that at most one live entity may hold at a time.
///
/// Every call to [`UniqueTag::new`] yields a distinct marker, even for equal
/// names. Keep the value around (e.g. in a `LazyLock`) and reuse it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniqueTag {
    id: u64,
    name: &'static str,
}

impl UniqueTag {
    pub fn new(name: &'static str) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for UniqueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueTag({}#{})", self.name, self.id)
    }
}

impl fmt::Display for UniqueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.name)
    }
}

/// A label attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Shared label, any number of holders.
    Label(String),
    /// Exclusive marker, at most one live holder.
    Unique(UniqueTag),
}

impl From<&str> for Tag {
    fn from(label: &str) -> Self {
        Tag::Label(label.to_string())
    }
}

impl From<String> for Tag {
    fn from(label: String) -> Self {
        Tag::Label(label)
    }
}

impl From<UniqueTag> for Tag {
    fn from(tag: UniqueTag) -> Self {
        Tag::Unique(tag)
    }
}

/// Liveness, generations and tags for every entity id.
pub struct EntityTable {
    allocator: IdAllocator,
    /// Current generation per id slot, grown on demand.
    generations: Vec<u32>,
    /// Live ids, ordered so full scans are deterministic.
    alive: BTreeSet<Eid>,
    tags: HashMap<Eid, HashSet<Tag>>,
    unique_holders: HashMap<UniqueTag, Eid>,
}

impl EntityTable {
    pub fn new(min: Eid, max: Eid) -> Self {
        Self {
            allocator: IdAllocator::new(min, max),
            generations: Vec::new(),
            alive: BTreeSet::new(),
            tags: HashMap::new(),
            unique_holders: HashMap::new(),
        }
    }

    /// Hand out a fresh live entity.
    pub fn allocate(&mut self) -> Result<Entity> {
        let index = self.allocator.acquire()?;
        let slot = index as usize;
        if slot >= self.generations.len() {
            self.generations.resize(slot + 1, 0);
        }
        self.alive.insert(index);
        Ok(Entity {
            index,
            generation: self.generations[slot],
        })
    }

    /// Retire `entity`: drop its tags, bump the slot generation, release the id.
    ///
    /// Returns `false` if the handle was already stale.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.clear_tags(entity.index);
        self.alive.remove(&entity.index);
        self.generations[entity.index as usize] += 1;
        self.allocator.release(entity.index)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.contains(&entity.index)
            && self.generations.get(entity.index as usize) == Some(&entity.generation)
    }

    /// `Ok(())` if the handle is live, `InvalidEntity` otherwise.
    pub fn check(&self, entity: Entity) -> Result<()> {
        if self.is_alive(entity) {
            Ok(())
        } else {
            Err(EcsError::InvalidEntity(entity))
        }
    }

    /// The live handle currently owning `eid`.
    pub fn entity_of(&self, eid: Eid) -> Option<Entity> {
        if !self.alive.contains(&eid) {
            return None;
        }
        Some(Entity {
            index: eid,
            generation: self.generations[eid as usize],
        })
    }

    /// Live ids in ascending order.
    pub fn live(&self) -> impl Iterator<Item = Eid> + '_ {
        self.alive.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    // ── Tags ──────────────────────────────────────────────────────────

    pub fn has_tag(&self, eid: Eid, tag: &Tag) -> bool {
        self.tags.get(&eid).is_some_and(|set| set.contains(tag))
    }

    pub fn tags_of(&self, eid: Eid) -> impl Iterator<Item = &Tag> + '_ {
        self.tags.get(&eid).into_iter().flatten()
    }

    /// Attach every tag in `tags`, or none of them.
    ///
    /// Fails with `DuplicateUniqueTag` if a unique tag is already held by any
    /// live entity, `entity` included, or appears twice in `tags`.
    /// Re-applying a label is a no-op.
    pub fn add_tags(&mut self, entity: Entity, tags: &[Tag]) -> Result<()> {
        self.check(entity)?;
        let mut claimed: Vec<UniqueTag> = Vec::new();
        for tag in tags {
            if let Tag::Unique(unique) = tag {
                if let Some(&holder) = self.unique_holders.get(unique) {
                    let holder = self
                        .entity_of(holder)
                        .unwrap_or(Entity { index: holder, generation: 0 });
                    return Err(EcsError::DuplicateUniqueTag(*unique, holder));
                }
                if claimed.contains(unique) {
                    return Err(EcsError::DuplicateUniqueTag(*unique, entity));
                }
                claimed.push(*unique);
            }
        }

        let set = self.tags.entry(entity.index).or_default();
        for tag in tags {
            if let Tag::Unique(unique) = tag {
                self.unique_holders.insert(*unique, entity.index);
            }
            set.insert(tag.clone());
        }
        Ok(())
    }

    /// Detach `tag`. Returns whether the entity held it.
    pub fn remove_tag(&mut self, entity: Entity, tag: &Tag) -> Result<bool> {
        self.check(entity)?;
        let removed = self
            .tags
            .get_mut(&entity.index)
            .is_some_and(|set| set.remove(tag));
        if removed {
            if let Tag::Unique(unique) = tag {
                self.unique_holders.remove(unique);
            }
        }
        Ok(removed)
    }

    fn clear_tags(&mut self, eid: Eid) {
        if let Some(set) = self.tags.remove(&eid) {
            for tag in set {
                if let Tag::Unique(unique) = tag {
                    self.unique_holders.remove(&unique);
                }
            }
        }
    }

    /// The live entity holding `tag`, if any.
    pub fn unique_holder(&self, tag: UniqueTag) -> Option<Entity> {
        self.unique_holders
            .get(&tag)
            .and_then(|&eid| self.entity_of(eid))
    }

    /// Every live entity carrying `tag`, in id order.
    pub fn tagged(&self, tag: &Tag) -> Vec<Entity> {
        self.alive
            .iter()
            .filter(|eid| self.has_tag(**eid, tag))
            .filter_map(|&eid| self.entity_of(eid))
            .collect()
    }
}
