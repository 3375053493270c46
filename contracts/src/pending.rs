//! Ordered index of undelivered requests.
//!
//! An arena-backed doubly-linked list: nodes live in a `Vec` and link to
//! each other by index, freed slots are reused. Insertion at the tail and
//! removal anywhere are O(1); pagination walks forward from the head in
//! insertion order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::request_id::RequestId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    id: RequestId,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequests {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    index: BTreeMap<RequestId, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.index.contains_key(id)
    }

    /// Appends `id`. Returns `false` if it was already pending.
    pub fn insert(&mut self, id: RequestId) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }
        let node = Node {
            id,
            prev: self.tail,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        match self.tail {
            Some(tail) => {
                if let Some(t) = self.slots[tail].as_mut() {
                    t.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.index.insert(id, slot);
        true
    }

    /// Unlinks `id`. Returns `false` if it was not pending.
    pub fn remove(&mut self, id: &RequestId) -> bool {
        let Some(slot) = self.index.remove(id) else {
            return false;
        };
        let Some(node) = self.slots[slot].take() else {
            return false;
        };

        match node.prev {
            Some(prev) => {
                if let Some(p) = self.slots[prev].as_mut() {
                    p.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(n) = self.slots[next].as_mut() {
                    n.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        self.free.push(slot);
        true
    }

    /// Up to `limit` ids starting at position `offset`, oldest first.
    pub fn page(&self, offset: usize, limit: usize) -> Vec<RequestId> {
        self.iter().skip(offset).take(limit).collect()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }
}

pub struct Iter<'a> {
    list: &'a PendingRequests,
    cursor: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = RequestId;

    fn next(&mut self) -> Option<RequestId> {
        let node = self.list.slots.get(self.cursor?)?.as_ref()?;
        self.cursor = node.next;
        Some(node.id)
    }
}
