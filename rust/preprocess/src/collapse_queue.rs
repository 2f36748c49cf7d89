// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary max-heap over record ids with in-place priority updates
//!
//! Records live outside the heap; the heap stores their ids and tracks the
//! slot each id occupies so that a changed priority can be re-sifted in
//! `O(log n)`.

const NOT_QUEUED: usize = usize::MAX;

/// Indexed binary max-heap
#[derive(Debug, Clone, Default)]
pub struct CollapseQueue {
    /// Record ids in heap order
    heap: Vec<u32>,
    /// Heap slot of each record id, `NOT_QUEUED` once removed
    slots: Vec<usize>,
    priorities: Vec<f32>,
}

impl CollapseQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            priorities: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// True while `id` is still in the heap
    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.slots
            .get(id as usize)
            .is_some_and(|&slot| slot != NOT_QUEUED)
    }

    /// Current heap slot of `id`
    #[inline]
    pub fn slot(&self, id: u32) -> Option<usize> {
        self.contains(id).then(|| self.slots[id as usize])
    }

    #[inline]
    pub fn priority(&self, id: u32) -> f32 {
        self.priorities[id as usize]
    }

    /// Insert a record. Each id may be pushed once.
    pub fn push(&mut self, id: u32, priority: f32) {
        let index = id as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, NOT_QUEUED);
            self.priorities.resize(index + 1, f32::NEG_INFINITY);
        }
        debug_assert!(self.slots[index] == NOT_QUEUED, "record {id} pushed twice");

        self.priorities[index] = priority;
        self.slots[index] = self.heap.len();
        self.heap.push(id);
        self.sift_up(self.heap.len() - 1);
    }

    /// Id with the highest priority
    #[inline]
    pub fn peek(&self) -> Option<u32> {
        self.heap.first().copied()
    }

    /// Remove and return the root
    pub fn pop(&mut self) -> Option<u32> {
        let root = *self.heap.first()?;
        let last = self.heap.len() - 1;
        self.swap(0, last);
        self.heap.pop();
        self.slots[root as usize] = NOT_QUEUED;
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(root)
    }

    /// Change the priority of a queued record and restore heap order.
    ///
    /// Records that were already popped are ignored.
    pub fn update(&mut self, id: u32, priority: f32) {
        let Some(slot) = self.slot(id) else {
            return;
        };
        self.priorities[id as usize] = priority;
        if slot > 0 && self.beats(slot, (slot - 1) / 2) {
            self.sift_up(slot);
        } else {
            self.sift_down(slot);
        }
    }

    /// True if the record at slot `a` belongs above the one at slot `b`
    #[inline]
    fn beats(&self, a: usize, b: usize) -> bool {
        self.priorities[self.heap[a] as usize] > self.priorities[self.heap[b] as usize]
    }

    #[inline]
    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.slots[self.heap[a] as usize] = a;
        self.slots[self.heap[b] as usize] = b;
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if !self.beats(slot, parent) {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let mut best = slot;
            if left < len && self.beats(left, best) {
                best = left;
            }
            if right < len && self.beats(right, best) {
                best = right;
            }
            if best == slot {
                break;
            }
            self.swap(slot, best);
            slot = best;
        }
    }
}
