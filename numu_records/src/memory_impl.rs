//! In-memory implementation of EventSource.

use crate::error::RecordError;
use crate::source::EventSource;
use crate::types::EventRecords;
use std::collections::VecDeque;

/// Source backed by a queue of already-built events.
#[derive(Debug, Default)]
pub struct MemorySource {
    events: VecDeque<EventRecords>,
    read: usize,
}

impl MemorySource {
    /// Creates a source that yields the given events in order.
    pub fn new(events: impl IntoIterator<Item = EventRecords>) -> Self {
        Self {
            events: events.into_iter().collect(),
            read: 0,
        }
    }
}

impl EventSource for MemorySource {
    fn next_event(&mut self) -> Option<Result<EventRecords, RecordError>> {
        let event = self.events.pop_front()?;
        self.read += 1;
        Some(Ok(event))
    }

    fn events_read(&self) -> usize {
        self.read
    }
}
