//! Expiration Heap
//!
//! Keys with a TTL are tracked in a binary min-heap ordered by absolute
//! deadline (microseconds on the monotonic clock in [`crate::time`]).
//!
//! ## Back-references
//!
//! Every heap item names its owner (a slab key), and every owner stores the
//! index of the heap slot that currently refers to it:
//!
//! ```text
//!   heap:   [ (t=10, owner 7) | (t=25, owner 2) | (t=40, owner 9) ]
//!                  ▲                 ▲                 ▲
//!   owners:   7.heap_slot = 0   2.heap_slot = 1   9.heap_slot = 2
//! ```
//!
//! That makes "change or drop the TTL of this key" O(log n): no search is
//! needed to find the item. Whenever an item moves, its owner's slot is
//! rewritten, so the two sides never disagree.
//!
//! ## Sweeping
//!
//! The reactor calls [`ExpirationHeap::pop_due`] repeatedly, up to a fixed
//! amount of work per tick, so that a burst of simultaneous expirations
//! cannot starve connection I/O. Whatever remains due is handled next tick.

use slab::Slab;

/// Owners of heap items record where their item currently sits.
pub trait HeapSlot {
    fn heap_slot(&self) -> Option<usize>;
    fn set_heap_slot(&mut self, slot: Option<usize>);
}

/// One pending expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapItem {
    pub deadline_us: u64,
    pub owner: usize,
}

/// Min-heap of deadlines with owner back-references.
#[derive(Debug, Default)]
pub struct ExpirationHeap {
    items: Vec<HeapItem>,
}

impl ExpirationHeap {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The earliest deadline, if any key has one.
    #[inline]
    pub fn peek_deadline(&self) -> Option<u64> {
        self.items.first().map(|item| item.deadline_us)
    }

    /// Deadline of the item in `slot`, as recorded by its owner.
    #[inline]
    pub fn deadline_at(&self, slot: usize) -> u64 {
        self.items[slot].deadline_us
    }

    /// Sets, moves or clears (`None`) the deadline of `owner`.
    pub fn set_deadline<T: HeapSlot>(
        &mut self,
        owners: &mut Slab<T>,
        owner: usize,
        deadline_us: Option<u64>,
    ) {
        match (owners[owner].heap_slot(), deadline_us) {
            (Some(pos), Some(deadline_us)) => {
                self.items[pos].deadline_us = deadline_us;
                self.fix(owners, pos);
            }
            (None, Some(deadline_us)) => {
                let pos = self.items.len();
                self.items.push(HeapItem { deadline_us, owner });
                owners[owner].set_heap_slot(Some(pos));
                self.sift_up(owners, pos);
            }
            (Some(pos), None) => self.remove(owners, pos),
            (None, None) => {}
        }
    }

    /// Pops the earliest item if its deadline is at or before `now_us` and
    /// returns its owner. The owner's slot is already cleared.
    pub fn pop_due<T: HeapSlot>(&mut self, owners: &mut Slab<T>, now_us: u64) -> Option<usize> {
        let top = *self.items.first()?;
        if top.deadline_us > now_us {
            return None;
        }
        self.remove(owners, 0);
        Some(top.owner)
    }

    fn remove<T: HeapSlot>(&mut self, owners: &mut Slab<T>, pos: usize) {
        let removed = self.items.swap_remove(pos);
        owners[removed.owner].set_heap_slot(None);
        // The former last item now sits at `pos`, unless it was the one removed.
        if pos < self.items.len() {
            owners[self.items[pos].owner].set_heap_slot(Some(pos));
            self.fix(owners, pos);
        }
    }

    fn fix<T: HeapSlot>(&mut self, owners: &mut Slab<T>, pos: usize) {
        if pos > 0 && self.items[pos].deadline_us < self.items[(pos - 1) / 2].deadline_us {
            self.sift_up(owners, pos);
        } else {
            self.sift_down(owners, pos);
        }
    }

    fn swap<T: HeapSlot>(&mut self, owners: &mut Slab<T>, a: usize, b: usize) {
        self.items.swap(a, b);
        owners[self.items[a].owner].set_heap_slot(Some(a));
        owners[self.items[b].owner].set_heap_slot(Some(b));
    }

    fn sift_up<T: HeapSlot>(&mut self, owners: &mut Slab<T>, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.items[parent].deadline_us <= self.items[pos].deadline_us {
                break;
            }
            self.swap(owners, parent, pos);
            pos = parent;
        }
    }

    fn sift_down<T: HeapSlot>(&mut self, owners: &mut Slab<T>, mut pos: usize) {
        let len = self.items.len();
        loop {
            let left = pos * 2 + 1;
            let right = left + 1;
            let mut min = pos;
            if left < len && self.items[left].deadline_us < self.items[min].deadline_us {
                min = left;
            }
            if right < len && self.items[right].deadline_us < self.items[min].deadline_us {
                min = right;
            }
            if min == pos {
                break;
            }
            self.swap(owners, pos, min);
            pos = min;
        }
    }

    #[cfg(test)]
    fn items(&self) -> &[HeapItem] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Owner {
        slot: Option<usize>,
    }

    impl HeapSlot for Owner {
        fn heap_slot(&self) -> Option<usize> {
            self.slot
        }
        fn set_heap_slot(&mut self, slot: Option<usize>) {
            self.slot = slot;
        }
    }

    fn check(heap: &ExpirationHeap, owners: &Slab<Owner>) {
        let items = heap.items();
        for (i, item) in items.iter().enumerate() {
            assert_eq!(owners[item.owner].slot, Some(i), "back-reference of slot {i}");
            for child in [2 * i + 1, 2 * i + 2] {
                if child < items.len() {
                    assert!(item.deadline_us <= items[child].deadline_us);
                }
            }
        }
        let tracked = owners.iter().filter(|(_, o)| o.slot.is_some()).count();
        assert_eq!(tracked, items.len());
    }

    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }
    }

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut owners: Slab<Owner> = Slab::new();
        let mut heap = ExpirationHeap::new();
        let ids: Vec<usize> = (0..5).map(|_| owners.insert(Owner::default())).collect();

        for (id, deadline) in ids.iter().zip([50, 10, 40, 20, 30]) {
            heap.set_deadline(&mut owners, *id, Some(deadline));
        }
        check(&heap, &owners);
        assert_eq!(heap.peek_deadline(), Some(10));

        assert_eq!(heap.pop_due(&mut owners, 5), None);
        assert_eq!(heap.pop_due(&mut owners, 25), Some(ids[1]));
        assert_eq!(heap.pop_due(&mut owners, 25), Some(ids[3]));
        assert_eq!(heap.pop_due(&mut owners, 25), None);
        assert_eq!(owners[ids[1]].slot, None);
        check(&heap, &owners);
        assert_eq!(heap.len(), 3);
    }

    #[test]
    fn test_clear_removes_exactly_one() {
        let mut owners: Slab<Owner> = Slab::new();
        let mut heap = ExpirationHeap::new();
        let ids: Vec<usize> = (0..8).map(|_| owners.insert(Owner::default())).collect();
        for (i, id) in ids.iter().enumerate() {
            heap.set_deadline(&mut owners, *id, Some(100 - i as u64));
        }

        heap.set_deadline(&mut owners, ids[3], None);
        assert_eq!(heap.len(), 7);
        assert_eq!(owners[ids[3]].slot, None);
        check(&heap, &owners);

        // Clearing an owner without a deadline is a no-op
        heap.set_deadline(&mut owners, ids[3], None);
        assert_eq!(heap.len(), 7);

        // Removing the last slot skips the sift
        let last = heap.items().last().unwrap().owner;
        heap.set_deadline(&mut owners, last, None);
        check(&heap, &owners);
    }

    #[test]
    fn test_update_deadline_moves_item() {
        let mut owners: Slab<Owner> = Slab::new();
        let mut heap = ExpirationHeap::new();
        let a = owners.insert(Owner::default());
        let b = owners.insert(Owner::default());
        heap.set_deadline(&mut owners, a, Some(10));
        heap.set_deadline(&mut owners, b, Some(20));

        heap.set_deadline(&mut owners, a, Some(30));
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.peek_deadline(), Some(20));
        check(&heap, &owners);

        heap.set_deadline(&mut owners, a, Some(1));
        assert_eq!(heap.peek_deadline(), Some(1));
        check(&heap, &owners);
    }

    #[test]
    fn test_random_operations_keep_invariants() {
        let mut owners: Slab<Owner> = Slab::new();
        let mut heap = ExpirationHeap::new();
        let ids: Vec<usize> = (0..64).map(|_| owners.insert(Owner::default())).collect();
        let mut rng = XorShift(7);

        for step in 0..5000 {
            let id = ids[(rng.next() % ids.len() as u64) as usize];
            match rng.next() % 4 {
                0 => heap.set_deadline(&mut owners, id, None),
                1 => {
                    let now = rng.next() % 1000;
                    while let Some(owner) = heap.pop_due(&mut owners, now) {
                        assert_eq!(owners[owner].slot, None);
                    }
                    if let Some(min) = heap.peek_deadline() {
                        assert!(min > now);
                    }
                }
                _ => heap.set_deadline(&mut owners, id, Some(rng.next() % 1000)),
            }
            if step % 100 == 0 {
                check(&heap, &owners);
            }
        }
        check(&heap, &owners);
    }
}
