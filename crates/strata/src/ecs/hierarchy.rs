//! # Hierarchy — Parent/Child Forest Over Entity Ids
//!
//! Nodes live in an arena indexed by [`Eid`]; links are ids, never references.
//! Each node stores an optional parent id and an ordered list of child ids,
//! and every link change updates both sides.
//!
//! ```text
//! nodes[3] = { parent: None,    children: [5, 7] }
//! nodes[5] = { parent: Some(3), children: [] }
//! nodes[7] = { parent: Some(3), children: [9] }
//! nodes[9] = { parent: Some(7), children: [] }
//! ```
//!
//! Invariants: a node has at most one parent, attaching detaches from the old
//! parent first, and no node is its own ancestor. Removing a node detaches it
//! from its parent and turns its children into roots.

use std::collections::VecDeque;

use super::allocator::Eid;

#[derive(Debug, Default, Clone)]
struct Node {
    parent: Option<Eid>,
    children: Vec<Eid>,
}

/// Parent/child links for live entities.
#[derive(Debug, Default)]
pub struct Hierarchy {
    nodes: Vec<Option<Node>>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, eid: Eid) -> Option<&Node> {
        self.nodes.get(eid as usize).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, eid: Eid) -> Option<&mut Node> {
        self.nodes.get_mut(eid as usize).and_then(|n| n.as_mut())
    }

    /// Add a root node for `eid`.
    pub fn insert(&mut self, eid: Eid) {
        let slot = eid as usize;
        if slot >= self.nodes.len() {
            self.nodes.resize_with(slot + 1, || None);
        }
        self.nodes[slot] = Some(Node::default());
    }

    pub fn contains(&self, eid: Eid) -> bool {
        self.node(eid).is_some()
    }

    /// Drop `eid`'s node. Returns its former parent and the children that
    /// became roots.
    pub fn remove(&mut self, eid: Eid) -> (Option<Eid>, Vec<Eid>) {
        let parent = self.detach(eid);
        let Some(node) = self.nodes.get_mut(eid as usize).and_then(|n| n.take()) else {
            return (parent, Vec::new());
        };
        for &child in &node.children {
            if let Some(c) = self.node_mut(child) {
                c.parent = None;
            }
        }
        (parent, node.children)
    }

    /// Make `child` a child of `parent`, detaching it from any previous parent.
    ///
    /// Returns the previous parent. The caller rules out cycles with
    /// [`is_ancestor`](Self::is_ancestor).
    pub fn attach(&mut self, child: Eid, parent: Eid) -> Option<Eid> {
        debug_assert!(!self.is_ancestor(child, parent), "hierarchy cycle");
        let old = self.detach(child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
        old
    }

    /// Detach `child` from its parent, making it a root. Returns the old parent.
    pub fn detach(&mut self, child: Eid) -> Option<Eid> {
        let parent = self.node_mut(child)?.parent.take()?;
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|&c| c != child);
        }
        Some(parent)
    }

    pub fn parent(&self, eid: Eid) -> Option<Eid> {
        self.node(eid).and_then(|n| n.parent)
    }

    pub fn children(&self, eid: Eid) -> &[Eid] {
        self.node(eid).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn is_root(&self, eid: Eid) -> bool {
        self.node(eid).is_some_and(|n| n.parent.is_none())
    }

    /// Whether `ancestor` is `eid` itself or lies on its path to the root.
    pub fn is_ancestor(&self, ancestor: Eid, eid: Eid) -> bool {
        let mut current = Some(eid);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    pub fn root_of(&self, eid: Eid) -> Eid {
        let mut current = eid;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    /// All descendants of `eid`, breadth first, excluding `eid` itself.
    pub fn descendants(&self, eid: Eid) -> Vec<Eid> {
        let mut out = Vec::new();
        let mut queue: VecDeque<Eid> = self.children(eid).iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            out.push(id);
            queue.extend(self.children(id).iter().copied());
        }
        out
    }
}
