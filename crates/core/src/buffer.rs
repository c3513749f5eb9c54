// In-memory event buffer
//
// Plain data structure with no locking of its own; the tracker wraps it in a
// mutex and never holds that lock across an await.

use std::mem;

use crate::event::Event;

/// Ordered collection of events not yet written to the column store
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<Event>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event at the tail, returning the new length
    pub fn push(&mut self, event: Event) -> usize {
        self.events.push(event);
        self.events.len()
    }

    /// Take every buffered event, leaving an empty buffer behind
    pub fn detach(&mut self) -> Vec<Event> {
        mem::take(&mut self.events)
    }

    /// Put a batch that failed to write back at the head of the buffer.
    ///
    /// Events appended while the batch was in flight stay behind it. If the
    /// result is longer than twice `batch_size`, the buffer is cut to
    /// exactly `batch_size` and the tail is discarded. Returns the number of
    /// dropped events.
    pub fn restore_failed(&mut self, mut batch: Vec<Event>, batch_size: usize) -> usize {
        batch.append(&mut self.events);
        self.events = batch;

        let cap = batch_size.saturating_mul(2);
        if self.events.len() > cap {
            let dropped = self.events.len() - batch_size;
            self.events.truncate(batch_size);
            dropped
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.clone()
    }
}
