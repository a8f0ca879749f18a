//! A circular doubly-linked ring backed by a slot arena.
//!
//! See the [`Ring`] type for details.
use crate::util::FmtOption;
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
};

/// A circular doubly-linked list stored in a slot arena.
///
/// Elements live in a `Vec` of slots and are linked to their neighbors by
/// slot *index* rather than by pointer, so the structure is plain safe Rust:
/// no intrusive links, no `unsafe`, and no self-referential ownership.
/// Pushing an element returns a [`Key`], a small `Copy` token that names
/// that element's slot, which can later be used for O(1) random-access
/// [`remove`](Ring::remove), much like the address-based removal of an
/// intrusive list.
///
/// The ring is singly-anchored: it tracks only a `head` slot, and the last
/// element links back around to the head. [`push`](Ring::push) inserts
/// immediately *before* the head, which makes it a tail append and means
/// iteration from the head always observes insertion order.
///
/// # Keys, generations, and foreign rings
///
/// A freed slot may be reused by a later `push`. To keep a stale [`Key`]
/// from resolving to the new occupant, every slot carries a generation
/// counter that is bumped when the slot is freed; a `Key` stamped with an
/// old generation fails every lookup. Each `Ring` also has a process-unique
/// id baked into the keys it mints, so a key presented to some *other* ring
/// is rejected rather than misinterpreted. In both cases the failed
/// operation leaves the ring untouched.
///
/// # Examples
///
/// ```
/// use fairy_ring::ring::Ring;
///
/// let mut ring = Ring::new();
/// let a = ring.push("a");
/// let b = ring.push("b");
/// let c = ring.push("c");
///
/// // Insertion order is preserved.
/// assert_eq!(ring.iter().copied().collect::<Vec<_>>(), ["a", "b", "c"]);
///
/// // Random-access removal by key.
/// assert_eq!(ring.remove(b), Some("b"));
/// assert_eq!(ring.iter().copied().collect::<Vec<_>>(), ["a", "c"]);
///
/// // A key only works once.
/// assert_eq!(ring.remove(b), None);
///
/// // The ring is circular: the last element links back to the head.
/// assert_eq!(ring.next_key(c), Some(a));
/// ```
pub struct Ring<T> {
    /// Process-unique id, stamped into every [`Key`] this ring mints.
    id: u64,
    slots: Vec<Slot<T>>,
    /// Indices of vacated slots, reused before the arena grows.
    free: Vec<u32>,
    head: Option<u32>,
    /// Number of linked slots.
    len: usize,
}

/// A token naming one element of a [`Ring`].
///
/// Returned by [`Ring::push`]; used for random-access [`Ring::remove`] and
/// for walking the ring with [`Ring::next_key`]/[`Ring::prev_key`]. A `Key`
/// is invalidated when its element is removed, and is never honored by a
/// ring other than the one that minted it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    ring: u64,
    index: u32,
    generation: u32,
}

/// An iterator over the elements of a [`Ring`], in insertion order.
pub struct Iter<'ring, T> {
    ring: &'ring Ring<T>,
    next: Option<u32>,
    remaining: usize,
}

struct Slot<T> {
    /// Bumped when the slot is freed, invalidating outstanding keys.
    generation: u32,
    entry: Option<Entry<T>>,
}

struct Entry<T> {
    value: T,
    next: u32,
    prev: u32,
}

static NEXT_RING_ID: AtomicU64 = AtomicU64::new(1);

// === impl Ring ===

impl<T> Ring<T> {
    /// Returns a new empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_RING_ID.fetch_add(1, Relaxed),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            len: 0,
        }
    }

    /// Returns the number of elements in the ring.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if this ring is empty.
    pub fn is_empty(&self) -> bool {
        if self.head.is_none() {
            debug_assert_eq!(self.len, 0, "a ring with no head must be empty");
            return true;
        }

        false
    }

    /// Appends `value` at the tail of the ring (immediately before the
    /// head), returning a [`Key`] for the new element.
    pub fn push(&mut self, value: T) -> Key {
        let index = self.allocate(value);
        match self.head {
            // The sole element links to itself; `allocate` already did so.
            None => self.head = Some(index),
            Some(head) => {
                let tail = self.entry(head).prev;
                {
                    let entry = self.entry_mut(index);
                    entry.next = head;
                    entry.prev = tail;
                }
                self.entry_mut(tail).next = index;
                self.entry_mut(head).prev = index;
            }
        }

        self.len += 1;
        test_trace!(index, len = self.len, "ring::push");
        self.key_at(index)
    }

    /// Removes the element named by `key`, returning its value.
    ///
    /// Returns `None` (without modifying the ring) if `key` is stale (its
    /// element was already removed), or was minted by a different ring.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let index = self.resolve(key)?;
        let Entry { value, next, prev } = self.slots[index as usize]
            .entry
            .take()
            .expect("a resolved key always names a linked slot");

        self.len -= 1;
        if next == index {
            // Sole element: the ring becomes empty.
            debug_assert_eq!(prev, index, "a self-linked node links to itself both ways");
            debug_assert_eq!(self.head, Some(index), "the sole element must be the head");
            self.head = None;
        } else {
            self.entry_mut(prev).next = next;
            self.entry_mut(next).prev = prev;
            if self.head == Some(index) {
                self.head = Some(next);
            }
        }

        self.release(index);
        test_trace!(index, len = self.len, "ring::remove");
        Some(value)
    }

    /// Removes every element from the ring.
    ///
    /// All outstanding keys are invalidated; the arena's storage is retained
    /// for reuse.
    pub fn clear(&mut self) {
        while let Some(head) = self.head_key() {
            let _ = self.remove(head);
        }
    }

    /// Returns `true` if `key` currently names an element of this ring.
    pub fn contains(&self, key: Key) -> bool {
        self.resolve(key).is_some()
    }

    /// Borrows the element named by `key`, if it is still in the ring.
    pub fn get(&self, key: Key) -> Option<&T> {
        let index = self.resolve(key)?;
        Some(&self.entry(index).value)
    }

    /// Mutably borrows the element named by `key`, if it is still in the ring.
    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let index = self.resolve(key)?;
        Some(&mut self.entry_mut(index).value)
    }

    /// Returns the key of the head element, or `None` if the ring is empty.
    pub fn head_key(&self) -> Option<Key> {
        self.head.map(|index| self.key_at(index))
    }

    /// Returns the key of the element after `key`, wrapping from the tail
    /// back around to the head.
    ///
    /// Returns `None` if `key` no longer names an element of this ring.
    pub fn next_key(&self, key: Key) -> Option<Key> {
        let index = self.resolve(key)?;
        Some(self.key_at(self.entry(index).next))
    }

    /// Returns the key of the element before `key`, wrapping from the head
    /// back around to the tail.
    ///
    /// Returns `None` if `key` no longer names an element of this ring.
    pub fn prev_key(&self, key: Key) -> Option<Key> {
        let index = self.resolve(key)?;
        Some(self.key_at(self.entry(index).prev))
    }

    /// Returns an iterator over the ring's elements, from the head in
    /// insertion order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            ring: self,
            next: self.head,
            remaining: self.len,
        }
    }

    /// Asserts as many of the ring's invariants as possible.
    pub fn assert_valid(&self) {
        let head = match self.head {
            Some(head) => head,
            None => {
                assert_eq!(self.len, 0, "a ring with no head must have no elements");
                return;
            }
        };

        let mut seen = 0;
        let mut curr = head;
        loop {
            let entry = self.entry(curr);
            assert_eq!(
                self.entry(entry.next).prev,
                curr,
                "the next element's prev link must point back; index={curr}"
            );
            assert_eq!(
                self.entry(entry.prev).next,
                curr,
                "the prev element's next link must point forward; index={curr}"
            );
            seen += 1;
            assert!(
                seen <= self.len,
                "following next links must return to the head in exactly len={} steps",
                self.len
            );

            curr = entry.next;
            if curr == head {
                break;
            }
        }

        assert_eq!(seen, self.len, "every linked slot must be reachable from the head");
        assert_eq!(
            self.free.len() + self.len,
            self.slots.len(),
            "every slot must be either linked or on the free list"
        );
    }

    /// Validates `key` against this ring, returning the slot index it names.
    fn resolve(&self, key: Key) -> Option<u32> {
        if key.ring != self.id {
            return None;
        }

        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation || slot.entry.is_none() {
            return None;
        }

        Some(key.index)
    }

    fn key_at(&self, index: u32) -> Key {
        Key {
            ring: self.id,
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn entry(&self, index: u32) -> &Entry<T> {
        self.slots[index as usize]
            .entry
            .as_ref()
            .expect("a linked index always names an occupied slot")
    }

    fn entry_mut(&mut self, index: u32) -> &mut Entry<T> {
        self.slots[index as usize]
            .entry
            .as_mut()
            .expect("a linked index always names an occupied slot")
    }

    /// Places `value` in a slot (reusing a freed one if available),
    /// self-linked, and returns the slot index.
    fn allocate(&mut self, value: T) -> u32 {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.entry.is_none(), "a free-listed slot must be vacant");
                slot.entry = Some(Entry {
                    value,
                    next: index,
                    prev: index,
                });
                index
            }
            None => {
                assert!(
                    self.slots.len() < u32::MAX as usize,
                    "ring arena capacity exhausted"
                );
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(Entry {
                        value,
                        next: index,
                        prev: index,
                    }),
                });
                index
            }
        }
    }

    /// Marks a slot vacant, bumping its generation so outstanding keys for
    /// the old occupant no longer resolve.
    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.entry.is_none(), "only an unlinked slot may be released");
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("id", &self.id)
            .field("head", &FmtOption::new(&self.head))
            .field("len", &self.len)
            .finish()
    }
}

// === impl Iter ===

impl<'ring, T> Iterator for Iter<'ring, T> {
    type Item = &'ring T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let entry = self.ring.entry(self.next?);
        self.next = Some(entry.next);
        self.remaining -= 1;
        Some(&entry.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
