//! Order-statistics AVL tree over a slab.
//!
//! Every node embeds a [`TreeLink`] with parent/child keys, its subtree
//! depth and its subtree element count. The count is what turns a plain
//! balanced tree into one that can answer "the node k positions after this
//! one" in O(log n), which sorted-set range queries with an offset need.
//!
//! The functions here never compare keys on their own: insertion takes a
//! `less` predicate, and everything else only rearranges links. Each
//! structural operation returns the (possibly new) root.
//!
//! ## Invariants
//!
//! For every node `n`:
//! - `|depth(n.left) - depth(n.right)| <= 1`
//! - `count(n) = 1 + count(n.left) + count(n.right)`

use slab::Slab;

/// Tree links embedded in every node.
#[derive(Debug, Clone, Copy)]
pub struct TreeLink {
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    depth: u32,
    count: u32,
}

impl Default for TreeLink {
    fn default() -> Self {
        Self {
            parent: None,
            left: None,
            right: None,
            depth: 1,
            count: 1,
        }
    }
}

impl TreeLink {
    #[inline]
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    #[inline]
    pub fn left(&self) -> Option<usize> {
        self.left
    }

    #[inline]
    pub fn right(&self) -> Option<usize> {
        self.right
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of nodes in the subtree rooted here, including this one.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Types that can be nodes of the tree.
pub trait TreeLinked {
    fn tree_link(&self) -> &TreeLink;
    fn tree_link_mut(&mut self) -> &mut TreeLink;
}

#[inline]
fn link<T: TreeLinked>(nodes: &Slab<T>, id: usize) -> &TreeLink {
    nodes[id].tree_link()
}

#[inline]
fn link_mut<T: TreeLinked>(nodes: &mut Slab<T>, id: usize) -> &mut TreeLink {
    nodes[id].tree_link_mut()
}

#[inline]
fn depth<T: TreeLinked>(nodes: &Slab<T>, id: Option<usize>) -> u32 {
    id.map_or(0, |id| link(nodes, id).depth)
}

#[inline]
fn count<T: TreeLinked>(nodes: &Slab<T>, id: Option<usize>) -> i64 {
    id.map_or(0, |id| link(nodes, id).count as i64)
}

fn update<T: TreeLinked>(nodes: &mut Slab<T>, id: usize) {
    let (left, right) = (link(nodes, id).left, link(nodes, id).right);
    let new_depth = depth(nodes, left).max(depth(nodes, right)) + 1;
    let new_count = 1 + count(nodes, left) + count(nodes, right);
    let l = link_mut(nodes, id);
    l.depth = new_depth;
    l.count = new_count as u32;
}

/// Points `parent`'s child slot that held `old` at `new`.
fn replace_child<T: TreeLinked>(nodes: &mut Slab<T>, parent: usize, old: usize, new: Option<usize>) {
    let p = link_mut(nodes, parent);
    if p.left == Some(old) {
        p.left = new;
    } else {
        p.right = new;
    }
}

fn rotate_left<T: TreeLinked>(nodes: &mut Slab<T>, id: usize) -> usize {
    let Some(right) = link(nodes, id).right else {
        return id;
    };
    let right_left = link(nodes, right).left;
    if let Some(rl) = right_left {
        link_mut(nodes, rl).parent = Some(id);
    }
    let parent = link(nodes, id).parent;
    link_mut(nodes, right).left = Some(id);
    link_mut(nodes, right).parent = parent;
    link_mut(nodes, id).right = right_left;
    link_mut(nodes, id).parent = Some(right);
    update(nodes, id);
    update(nodes, right);
    right
}

fn rotate_right<T: TreeLinked>(nodes: &mut Slab<T>, id: usize) -> usize {
    let Some(left) = link(nodes, id).left else {
        return id;
    };
    let left_right = link(nodes, left).right;
    if let Some(lr) = left_right {
        link_mut(nodes, lr).parent = Some(id);
    }
    let parent = link(nodes, id).parent;
    link_mut(nodes, left).right = Some(id);
    link_mut(nodes, left).parent = parent;
    link_mut(nodes, id).left = left_right;
    link_mut(nodes, id).parent = Some(left);
    update(nodes, id);
    update(nodes, left);
    left
}

/// Left subtree is two levels deeper than the right.
fn fix_left<T: TreeLinked>(nodes: &mut Slab<T>, root: usize) -> usize {
    if let Some(left) = link(nodes, root).left {
        let (ll, lr) = (link(nodes, left).left, link(nodes, left).right);
        if depth(nodes, ll) < depth(nodes, lr) {
            let rotated = rotate_left(nodes, left);
            link_mut(nodes, root).left = Some(rotated);
        }
    }
    rotate_right(nodes, root)
}

/// Right subtree is two levels deeper than the left.
fn fix_right<T: TreeLinked>(nodes: &mut Slab<T>, root: usize) -> usize {
    if let Some(right) = link(nodes, root).right {
        let (rl, rr) = (link(nodes, right).left, link(nodes, right).right);
        if depth(nodes, rr) < depth(nodes, rl) {
            let rotated = rotate_right(nodes, right);
            link_mut(nodes, root).right = Some(rotated);
        }
    }
    rotate_left(nodes, root)
}

/// Walks from `id` up to the root, refreshing depth/count and rebalancing
/// on the way. Returns the root.
pub fn fix<T: TreeLinked>(nodes: &mut Slab<T>, mut id: usize) -> usize {
    loop {
        update(nodes, id);
        let l = depth(nodes, link(nodes, id).left);
        let r = depth(nodes, link(nodes, id).right);
        let parent = link(nodes, id).parent;

        let subtree = if l == r + 2 {
            fix_left(nodes, id)
        } else if l + 2 == r {
            fix_right(nodes, id)
        } else {
            id
        };

        match parent {
            None => return subtree,
            Some(p) => {
                replace_child(nodes, p, id, Some(subtree));
                id = p;
            }
        }
    }
}

/// Attaches the detached node `id` below `root` at the position chosen by
/// `less`, rebalances, and returns the new root.
pub fn insert<T, F>(nodes: &mut Slab<T>, root: Option<usize>, id: usize, less: F) -> usize
where
    T: TreeLinked,
    F: Fn(&T, &T) -> bool,
{
    *link_mut(nodes, id) = TreeLink::default();

    let mut parent = None;
    let mut go_left = false;
    let mut cur = root;
    while let Some(c) = cur {
        parent = Some(c);
        go_left = less(&nodes[id], &nodes[c]);
        cur = if go_left {
            link(nodes, c).left
        } else {
            link(nodes, c).right
        };
    }

    link_mut(nodes, id).parent = parent;
    if let Some(p) = parent {
        if go_left {
            link_mut(nodes, p).left = Some(id);
        } else {
            link_mut(nodes, p).right = Some(id);
        }
    }
    fix(nodes, id)
}

/// Detaches `id` from its tree and returns the new root (`None` once the
/// tree is empty). The node's links are reset so it can be reinserted.
pub fn delete<T: TreeLinked>(nodes: &mut Slab<T>, id: usize) -> Option<usize> {
    let TreeLink { left, right, .. } = *link(nodes, id);
    let (Some(_), Some(right)) = (left, right) else {
        return delete_easy(nodes, id);
    };

    // Detach the in-order successor, then move it into our slot.
    let mut successor = right;
    while let Some(l) = link(nodes, successor).left {
        successor = l;
    }
    let root = delete_easy(nodes, successor);

    // Rebalancing above may have moved us, so read our links only now.
    let moved = *link(nodes, id);
    *link_mut(nodes, successor) = moved;
    if let Some(l) = moved.left {
        link_mut(nodes, l).parent = Some(successor);
    }
    if let Some(r) = moved.right {
        link_mut(nodes, r).parent = Some(successor);
    }
    *link_mut(nodes, id) = TreeLink::default();

    match moved.parent {
        Some(p) => {
            replace_child(nodes, p, id, Some(successor));
            root
        }
        None => Some(successor),
    }
}

/// Removes a node with at most one child by splicing that child into its
/// slot.
fn delete_easy<T: TreeLinked>(nodes: &mut Slab<T>, id: usize) -> Option<usize> {
    let TreeLink {
        parent,
        left,
        right,
        ..
    } = *link(nodes, id);
    let child = left.or(right);
    if let Some(c) = child {
        link_mut(nodes, c).parent = parent;
    }
    *link_mut(nodes, id) = TreeLink::default();
    match parent {
        Some(p) => {
            replace_child(nodes, p, id, child);
            Some(fix(nodes, p))
        }
        None => child,
    }
}

/// Returns the node `offset` positions away from `id` in sorted order
/// (negative walks backwards), or `None` if that falls outside the tree.
pub fn offset<T: TreeLinked>(nodes: &Slab<T>, mut id: usize, offset: i64) -> Option<usize> {
    // position of `id` relative to the starting node
    let mut pos: i64 = 0;
    while pos != offset {
        let l = *link(nodes, id);
        if pos < offset && pos + count(nodes, l.right) >= offset {
            // target is inside the right subtree
            let right = l.right?;
            id = right;
            pos += count(nodes, link(nodes, id).left) + 1;
        } else if pos > offset && pos - count(nodes, l.left) <= offset {
            // target is inside the left subtree
            let left = l.left?;
            id = left;
            pos -= count(nodes, link(nodes, id).right) + 1;
        } else {
            let parent = l.parent?;
            if link(nodes, parent).right == Some(id) {
                pos -= count(nodes, l.left) + 1;
            } else {
                pos += count(nodes, l.right) + 1;
            }
            id = parent;
        }
    }
    Some(id)
}

/// The leftmost (smallest) node under `root`.
pub fn first<T: TreeLinked>(nodes: &Slab<T>, root: Option<usize>) -> Option<usize> {
    let mut cur = root?;
    while let Some(l) = link(nodes, cur).left {
        cur = l;
    }
    Some(cur)
}

/// Post-order walk from `root`; children are visited before their parent,
/// so `visit` may free each node as it goes.
pub fn for_each_post_order<T: TreeLinked>(
    nodes: &Slab<T>,
    root: Option<usize>,
    mut visit: impl FnMut(usize),
) {
    let mut stack = Vec::new();
    let mut last: Option<usize> = None;
    let mut cur = root;

    while cur.is_some() || !stack.is_empty() {
        if let Some(c) = cur {
            stack.push(c);
            cur = link(nodes, c).left;
            continue;
        }
        let Some(&top) = stack.last() else {
            break;
        };
        let right = link(nodes, top).right;
        if right.is_some() && right != last {
            cur = right;
        } else {
            visit(top);
            last = Some(top);
            stack.pop();
        }
    }
}
