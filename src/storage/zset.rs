//! Sorted Set
//!
//! A sorted set maps member names to scores and keeps the members ordered
//! by `(score, name)`. It is built from two indexes over one node arena:
//!
//! ```text
//!          ┌──────────────── Slab<ZNode> ────────────────┐
//!          │  ZNode { name, score, hlink, tlink }        │
//!          └─────────────────────────────────────────────┘
//!                 ▲                           ▲
//!     HashIndex (by name)           AVL tree (by score, name)
//!     O(1) lookup / score           O(log n) seek / offset / range
//! ```
//!
//! A member is in the tree exactly when it is in the hash index. Scores are
//! never changed while a node is attached to the tree: `add` with a new
//! score detaches the node, updates it and inserts it again.

use std::cmp::Ordering;

use bytes::Bytes;
use slab::Slab;

use super::avl::{self, TreeLink, TreeLinked};
use super::hash::{str_hash, HashIndex, HashLink, Hashed};

/// One member of a sorted set.
#[derive(Debug)]
pub struct ZNode {
    name: Bytes,
    score: f64,
    hlink: HashLink,
    tlink: TreeLink,
}

impl ZNode {
    fn new(name: Bytes, score: f64) -> Self {
        let hlink = HashLink::new(str_hash(&name));
        Self {
            name,
            score,
            hlink,
            tlink: TreeLink::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &Bytes {
        &self.name
    }

    #[inline]
    pub fn score(&self) -> f64 {
        self.score
    }
}

impl Hashed for ZNode {
    fn hash_link(&self) -> &HashLink {
        &self.hlink
    }
    fn hash_link_mut(&mut self) -> &mut HashLink {
        &mut self.hlink
    }
}

impl TreeLinked for ZNode {
    fn tree_link(&self) -> &TreeLink {
        &self.tlink
    }
    fn tree_link_mut(&mut self) -> &mut TreeLink {
        &mut self.tlink
    }
}

/// Tree order: score first, then name bytes (a shorter prefix sorts first).
fn zless(score: f64, name: &[u8], other_score: f64, other_name: &[u8]) -> bool {
    match score.partial_cmp(&other_score) {
        Some(Ordering::Less) => true,
        Some(Ordering::Greater) => false,
        _ => name < other_name,
    }
}

fn node_less(a: &ZNode, b: &ZNode) -> bool {
    zless(a.score, &a.name, b.score, &b.name)
}

/// Result of [`SortedSet::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Updated,
}

/// A set of `(name, score)` members ordered by score, then name.
#[derive(Debug, Default)]
pub struct SortedSet {
    nodes: Slab<ZNode>,
    index: HashIndex,
    root: Option<usize>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds `name` with `score`, or moves an existing member to its new
    /// position.
    pub fn add(&mut self, name: Bytes, score: f64) -> AddOutcome {
        if let Some(id) = self.lookup(&name) {
            if self.nodes[id].score != score {
                self.root = avl::delete(&mut self.nodes, id);
                self.nodes[id].score = score;
                self.root = Some(avl::insert(&mut self.nodes, self.root, id, node_less));
            }
            return AddOutcome::Updated;
        }

        let id = self.nodes.insert(ZNode::new(name, score));
        self.index.insert(&mut self.nodes, id);
        self.root = Some(avl::insert(&mut self.nodes, self.root, id, node_less));
        AddOutcome::Inserted
    }

    /// Finds a member by name.
    pub fn lookup(&mut self, name: &[u8]) -> Option<usize> {
        let hcode = str_hash(name);
        self.index
            .find(&mut self.nodes, hcode, |node| node.name.as_ref() == name)
    }

    /// Score of `name`, if it is a member.
    pub fn score(&mut self, name: &[u8]) -> Option<f64> {
        self.lookup(name).map(|id| self.nodes[id].score)
    }

    /// Removes `name` from both indexes and hands the node back.
    pub fn pop(&mut self, name: &[u8]) -> Option<ZNode> {
        let hcode = str_hash(name);
        let id = self
            .index
            .remove(&mut self.nodes, hcode, |node| node.name.as_ref() == name)?;
        self.root = avl::delete(&mut self.nodes, id);
        Some(self.nodes.remove(id))
    }

    /// First member ordered at or after `(score, name)`.
    pub fn query(&self, score: f64, name: &[u8]) -> Option<usize> {
        let mut found = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            let link = node.tree_link();
            if zless(node.score, &node.name, score, name) {
                cur = link.right();
            } else {
                found = Some(id);
                cur = link.left();
            }
        }
        found
    }

    /// The member `k` positions after (or before, if negative) `id`.
    pub fn offset(&self, id: usize, k: i64) -> Option<usize> {
        avl::offset(&self.nodes, id, k)
    }

    /// Returns the node behind an id from `lookup`, `query` or `offset`.
    pub fn node(&self, id: usize) -> &ZNode {
        &self.nodes[id]
    }

    /// Members starting at the first one `>= (score, name)`, shifted by
    /// `offset` positions, at most `limit` of them.
    pub fn range(&self, score: f64, name: &[u8], offset: i64, limit: usize) -> Range<'_> {
        let start = self
            .query(score, name)
            .and_then(|id| self.offset(id, offset));
        Range {
            set: self,
            next: start,
            remaining: limit,
        }
    }

    /// Frees every node in post-order and returns how many were released.
    pub fn dispose(mut self) -> usize {
        let mut order = Vec::with_capacity(self.nodes.len());
        avl::for_each_post_order(&self.nodes, self.root, |id| order.push(id));
        for &id in &order {
            self.nodes.remove(id);
        }
        debug_assert!(self.nodes.is_empty());
        order.len()
    }
}

/// Iterator returned by [`SortedSet::range`].
pub struct Range<'a> {
    set: &'a SortedSet,
    next: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for Range<'a> {
    type Item = &'a ZNode;

    fn next(&mut self) -> Option<&'a ZNode> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.next?;
        self.remaining -= 1;
        self.next = self.set.offset(id, 1);
        Some(self.set.node(id))
    }
}
