// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Discrete-event queue.
//!
//! Events are ordered by `(time, sequence)`. The sequence number doubles as the
//! event id, so events scheduled for the same tick come out in scheduling order.
//! Cancellation is lazy: a withdrawn event stays in the heap until it reaches the
//! head and is then dropped without delivery.

use crate::{DeviceId, Scheduler, Tick};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct EventId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum EventKind {
    /// NPU compute interval has elapsed.
    ComputeDone,
    /// DMA engine moves its next burst.
    Burst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ScheduledEvent {
    pub id: EventId,
    pub time: Tick,
    pub owner: DeviceId,
    pub kind: EventKind,
}

#[derive(Debug, PartialEq, Eq)]
struct QueueEntry(ScheduledEvent);

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap behavior
        (other.0.time, other.0.id).cmp(&(self.0.time, self.0.id))
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    now: Tick,
    next_id: u64,
    heap: BinaryHeap<QueueEntry>,
    live: HashMap<EventId, DeviceId>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    /// Number of scheduled, not yet delivered and not cancelled events.
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    pub fn is_pending(&self, id: EventId) -> bool {
        self.live.contains_key(&id)
    }

    /// Time of the next live event.
    pub fn peek_time(&mut self) -> Option<Tick> {
        self.purge_cancelled();
        self.heap.peek().map(|e| e.0.time)
    }

    /// Pop the next live event if it is due at or before `limit`, moving the
    /// clock to its time.
    pub fn pop_due(&mut self, limit: Tick) -> Option<ScheduledEvent> {
        self.purge_cancelled();
        if self.heap.peek()?.0.time > limit {
            return None;
        }
        let QueueEntry(event) = self.heap.pop()?;
        self.live.remove(&event.id);
        self.now = self.now.max(event.time);
        Some(event)
    }

    /// Move the clock forward. Time never runs backwards.
    pub fn advance(&mut self, to: Tick) {
        self.now = self.now.max(to);
    }

    fn purge_cancelled(&mut self) {
        while let Some(head) = self.heap.peek() {
            if self.live.contains_key(&head.0.id) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl Scheduler for EventQueue {
    fn now(&self) -> Tick {
        self.now
    }

    fn schedule(&mut self, owner: DeviceId, delay: Tick, kind: EventKind) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        let time = self.now.saturating_add(delay);
        debug!("Schedule {:?} for device {} at tick {}", kind, owner.0, time);
        self.heap.push(QueueEntry(ScheduledEvent {
            id,
            time,
            owner,
            kind,
        }));
        self.live.insert(id, owner);
        id
    }

    fn cancel(&mut self, owner: DeviceId, id: EventId) -> bool {
        match self.live.get(&id) {
            Some(o) if *o == owner => {
                self.live.remove(&id);
                debug!("Cancel event {:?} of device {}", id, owner.0);
                true
            }
            Some(o) => {
                warn!(
                    "Device {} tried to cancel event {:?} owned by device {}",
                    owner.0, id, o.0
                );
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: DeviceId = DeviceId(0);
    const B: DeviceId = DeviceId(1);

    #[test]
    fn test_orders_by_time() {
        let mut q = EventQueue::new();
        q.schedule(A, 30, EventKind::Burst);
        q.schedule(A, 10, EventKind::ComputeDone);
        q.schedule(B, 20, EventKind::Burst);

        let times: Vec<Tick> = std::iter::from_fn(|| q.pop_due(Tick::MAX))
            .map(|e| e.time)
            .collect();
        assert_eq!(times, vec![10, 20, 30]);
        assert_eq!(q.now(), 30);
    }

    #[test]
    fn test_same_tick_is_fifo() {
        let mut q = EventQueue::new();
        let first = q.schedule(B, 5, EventKind::Burst);
        let second = q.schedule(A, 5, EventKind::ComputeDone);
        let third = q.schedule(B, 5, EventKind::ComputeDone);

        assert_eq!(q.pop_due(5).unwrap().id, first);
        assert_eq!(q.pop_due(5).unwrap().id, second);
        assert_eq!(q.pop_due(5).unwrap().id, third);
        assert!(q.pop_due(5).is_none());
    }

    #[test]
    fn test_pop_respects_limit() {
        let mut q = EventQueue::new();
        q.schedule(A, 100, EventKind::Burst);
        assert!(q.pop_due(99).is_none());
        assert_eq!(q.now(), 0);
        assert_eq!(q.peek_time(), Some(100));
        assert!(q.pop_due(100).is_some());
    }

    #[test]
    fn test_cancel_only_by_owner() {
        let mut q = EventQueue::new();
        let id = q.schedule(A, 10, EventKind::Burst);

        assert!(!q.cancel(B, id));
        assert!(q.is_pending(id));

        assert!(q.cancel(A, id));
        assert!(!q.is_pending(id));
        assert_eq!(q.pending(), 0);
        assert!(q.pop_due(Tick::MAX).is_none());
        assert_eq!(q.peek_time(), None);

        // Second cancel is a no-op.
        assert!(!q.cancel(A, id));
    }

    #[test]
    fn test_delay_is_relative_to_now() {
        let mut q = EventQueue::new();
        q.advance(500);
        q.schedule(A, 1000, EventKind::ComputeDone);
        assert_eq!(q.peek_time(), Some(1500));

        // Clock does not run backwards.
        q.advance(100);
        assert_eq!(q.now(), 500);
    }
}
