//! Event source abstraction.

use crate::error::RecordError;
use crate::types::EventRecords;

/// Abstraction for anything that hands the core one event at a time.
///
/// # Implementations
///
/// - **Memory**: `MemorySource` - a pre-built queue of events (tests, simulation)
/// - **File**: `JsonLinesSource` - one JSON-encoded event per line
///
/// The core never sees how records are retrieved; a source that is missing a
/// product simply returns an empty collection for it.
pub trait EventSource {
    /// Returns the next event.
    ///
    /// # Returns
    /// * `Some(Ok(event))` - An event was read
    /// * `Some(Err(_))` - The next event could not be decoded
    /// * `None` - The source is exhausted
    fn next_event(&mut self) -> Option<Result<EventRecords, RecordError>>;

    /// Number of events handed out so far.
    fn events_read(&self) -> usize;
}
