//! Neighbor cache storage
//!
//! Entries live in a slab arena. Recency is tracked by a doubly linked list
//! threaded through the slots by index, head = most recently touched, so
//! move-to-head and unlink are O(1) without any self-referential pointers.

use crate::nd::neighbor::{EntryId, NeighborEntry};
use crate::protocol::IfIndex;
use slab::Slab;
use std::collections::HashMap;
use std::net::Ipv6Addr;

#[derive(Debug)]
struct Slot {
    entry: NeighborEntry,
    generation: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Arena of neighbor entries with an approximate-LRU ordering.
#[derive(Debug, Default)]
pub struct NeighborCache {
    slots: Slab<Slot>,
    by_addr: HashMap<(IfIndex, Ipv6Addr), usize>,
    head: Option<usize>,
    tail: Option<usize>,
    generation: u64,
}

impl NeighborCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `entry` at the most-recent end.
    ///
    /// The caller guarantees no entry exists yet for the same
    /// (interface, address).
    pub fn insert(&mut self, entry: NeighborEntry) -> EntryId {
        self.generation += 1;
        let key = (entry.ifindex, entry.addr);
        let index = self.slots.insert(Slot {
            entry,
            generation: self.generation,
            prev: None,
            next: None,
        });
        self.by_addr.insert(key, index);
        self.link_head(index);
        EntryId {
            index,
            generation: self.generation,
        }
    }

    /// Unlinks and drops the entry, returning it.
    pub fn remove(&mut self, id: EntryId) -> Option<NeighborEntry> {
        self.slot(id)?;
        self.unlink(id.index);
        let slot = self.slots.remove(id.index);
        self.by_addr.remove(&(slot.entry.ifindex, slot.entry.addr));
        Some(slot.entry)
    }

    pub fn get(&self, id: EntryId) -> Option<&NeighborEntry> {
        self.slot(id).map(|s| &s.entry)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut NeighborEntry> {
        match self.slots.get_mut(id.index) {
            Some(slot) if slot.generation == id.generation => Some(&mut slot.entry),
            _ => None,
        }
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.slot(id).is_some()
    }

    /// Finds the entry for `addr` on `ifindex`.
    pub fn find(&self, ifindex: IfIndex, addr: &Ipv6Addr) -> Option<EntryId> {
        let index = *self.by_addr.get(&(ifindex, *addr))?;
        self.slots.get(index).map(|slot| EntryId {
            index,
            generation: slot.generation,
        })
    }

    /// Marks the entry as most recently used.
    pub fn touch(&mut self, id: EntryId) {
        if self.slot(id).is_none() || self.head == Some(id.index) {
            return;
        }
        self.unlink(id.index);
        self.link_head(id.index);
    }

    /// Least recently used entry.
    pub fn oldest(&self) -> Option<EntryId> {
        self.tail.map(|index| self.id_at(index))
    }

    /// Entry ids from least to most recently used.
    pub fn ids_oldest_first(&self) -> Vec<EntryId> {
        let mut ids = Vec::with_capacity(self.slots.len());
        let mut cursor = self.tail;
        while let Some(index) = cursor {
            ids.push(self.id_at(index));
            cursor = self.slots[index].prev;
        }
        ids
    }

    /// Entries from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &NeighborEntry)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let index = cursor?;
            let slot = &self.slots[index];
            cursor = slot.next;
            Some((self.id_at(index), &slot.entry))
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: EntryId) -> Option<&Slot> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
    }

    fn id_at(&self, index: usize) -> EntryId {
        EntryId {
            index,
            generation: self.slots[index].generation,
        }
    }

    fn link_head(&mut self, index: usize) {
        let old_head = self.head;
        {
            let slot = &mut self.slots[index];
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => self.slots[h].prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let slot = &mut self.slots[index];
            (slot.prev.take(), slot.next.take())
        };
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
    }
}
