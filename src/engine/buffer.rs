use std::collections::VecDeque;

use crate::engine::types::{EventInput, LearningEvent};

/// Bounded, time-ordered ring of interaction events for one session.
///
/// Once `capacity` is reached every `record` evicts the oldest event. Events are
/// never mutated after they are stored.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: VecDeque<LearningEvent>,
    capacity: usize,
    evicted: u64,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Stamps `input` with `now_ms` and appends it. Timestamps never go backwards:
    /// a clock that steps back is pinned to the newest stored timestamp.
    pub fn record(&mut self, input: EventInput, now_ms: i64) -> &LearningEvent {
        let ts = self
            .events
            .back()
            .map(|last| last.timestamp.max(now_ms))
            .unwrap_or(now_ms);
        self.push(LearningEvent::from_input(input, ts))
    }

    /// Appends an already-stamped event (replay). Out-of-order timestamps are pinned
    /// to the newest stored one so `recent` stays a suffix scan.
    pub fn push(&mut self, mut event: LearningEvent) -> &LearningEvent {
        if let Some(last) = self.events.back() {
            if event.timestamp < last.timestamp {
                event.timestamp = last.timestamp;
            }
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.evicted += 1;
        }
        self.events.push_back(event);
        // push_back above guarantees a last element
        &self.events[self.events.len() - 1]
    }

    /// Events with `timestamp >= now_ms - window_ms`, in arrival order.
    pub fn recent(&self, now_ms: i64, window_ms: i64) -> Vec<LearningEvent> {
        let cutoff = now_ms.saturating_sub(window_ms);
        let start = self.events.partition_point(|e| e.timestamp < cutoff);
        self.events.range(start..).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &LearningEvent> {
        self.events.iter()
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.events.front().map(|e| e.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.events.back().map(|e| e.timestamp)
    }
}
