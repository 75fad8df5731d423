//! Intrusive doubly-linked list over a slab.
//!
//! Nodes live in a `Slab<T>` owned by someone else and embed their own
//! `ListLink`. The list only records head, tail and length, so a node can be
//! detached in O(1) given nothing but its slab key.
//!
//! The reactor uses one of these as the idle-connection list: every bit of
//! activity detaches the connection and appends it at the tail, which keeps
//! the list sorted by last activity with the stalest connection at the head.

use slab::Slab;

/// Links embedded in every list member.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListLink {
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
}

impl ListLink {
    /// Returns true if the owner is currently a list member.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Types that can be members of an [`IntrusiveList`].
pub trait ListLinked {
    fn list_link(&self) -> &ListLink;
    fn list_link_mut(&mut self) -> &mut ListLink;
}

/// A doubly-linked list whose nodes live in external storage.
#[derive(Debug, Default)]
pub struct IntrusiveList {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl IntrusiveList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// The oldest member.
    #[inline]
    pub fn front(&self) -> Option<usize> {
        self.head
    }

    /// Appends `id` at the tail. A node that is already linked is moved.
    pub fn push_back<T: ListLinked>(&mut self, nodes: &mut Slab<T>, id: usize) {
        if nodes[id].list_link().is_linked() {
            self.detach(nodes, id);
        }

        let old_tail = self.tail;
        {
            let link = nodes[id].list_link_mut();
            link.prev = old_tail;
            link.next = None;
            link.linked = true;
        }

        match old_tail {
            Some(tail) => nodes[tail].list_link_mut().next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Unlinks `id`. Returns false if it was not a member.
    pub fn detach<T: ListLinked>(&mut self, nodes: &mut Slab<T>, id: usize) -> bool {
        let link = *nodes[id].list_link();
        if !link.linked {
            return false;
        }

        match link.prev {
            Some(prev) => nodes[prev].list_link_mut().next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => nodes[next].list_link_mut().prev = link.prev,
            None => self.tail = link.prev,
        }

        *nodes[id].list_link_mut() = ListLink::default();
        self.len -= 1;
        true
    }

    /// Removes and returns the head.
    pub fn pop_front<T: ListLinked>(&mut self, nodes: &mut Slab<T>) -> Option<usize> {
        let head = self.head?;
        self.detach(nodes, head);
        Some(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Node {
        link: ListLink,
    }

    impl ListLinked for Node {
        fn list_link(&self) -> &ListLink {
            &self.link
        }
        fn list_link_mut(&mut self) -> &mut ListLink {
            &mut self.link
        }
    }

    fn setup(n: usize) -> (Slab<Node>, IntrusiveList, Vec<usize>) {
        let mut nodes = Slab::new();
        let mut list = IntrusiveList::new();
        let mut ids = Vec::new();
        for _ in 0..n {
            let id = nodes.insert(Node::default());
            list.push_back(&mut nodes, id);
            ids.push(id);
        }
        (nodes, list, ids)
    }

    /// Empties the list, returning members head to tail.
    fn drain(nodes: &mut Slab<Node>, list: &mut IntrusiveList) -> Vec<usize> {
        std::iter::from_fn(|| list.pop_front(nodes)).collect()
    }

    #[test]
    fn test_push_back_order() {
        let (mut nodes, mut list, ids) = setup(4);
        assert_eq!(list.len(), 4);
        assert_eq!(list.front(), Some(ids[0]));
        assert_eq!(drain(&mut nodes, &mut list), ids);
        assert!(list.is_empty());
    }

    #[test]
    fn test_detach_middle_head_tail() {
        let (mut nodes, mut list, ids) = setup(4);

        assert!(list.detach(&mut nodes, ids[1]));
        assert!(list.detach(&mut nodes, ids[0]));
        assert!(list.detach(&mut nodes, ids[3]));
        assert_eq!(list.len(), 1);
        assert_eq!(list.front(), Some(ids[2]));

        // Already detached
        assert!(!list.detach(&mut nodes, ids[1]));

        assert!(list.detach(&mut nodes, ids[2]));
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
    }

    #[test]
    fn test_touch_moves_to_tail() {
        let (mut nodes, mut list, ids) = setup(3);

        // Activity on the oldest member re-appends it.
        list.push_back(&mut nodes, ids[0]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.front(), Some(ids[1]));
        assert_eq!(drain(&mut nodes, &mut list), vec![ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn test_pop_front() {
        let (mut nodes, mut list, ids) = setup(2);
        assert_eq!(list.pop_front(&mut nodes), Some(ids[0]));
        assert!(!nodes[ids[0]].link.is_linked());
        assert_eq!(list.pop_front(&mut nodes), Some(ids[1]));
        assert_eq!(list.pop_front(&mut nodes), None);
    }
}
