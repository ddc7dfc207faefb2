//! JSON-lines implementation of EventSource.

use crate::error::RecordError;
use crate::source::EventSource;
use crate::types::EventRecords;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Source reading one JSON-encoded [`EventRecords`] per line.
///
/// Blank lines are skipped. A malformed line yields an error for that event
/// only; reading continues with the next line.
pub struct JsonLinesSource<R: BufRead> {
    reader: R,
    line: usize,
    read: usize,
}

impl JsonLinesSource<BufReader<File>> {
    /// Opens a JSON-lines file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    /// Wraps a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            read: 0,
        }
    }
}

impl<R: BufRead> EventSource for JsonLinesSource<R> {
    fn next_event(&mut self) -> Option<Result<EventRecords, RecordError>> {
        let mut buf = String::new();
        loop {
            buf.clear();
            match self.reader.read_line(&mut buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line += 1;
                    if buf.trim().is_empty() {
                        continue;
                    }
                    self.read += 1;
                    let parsed = serde_json::from_str::<EventRecords>(&buf)
                        .map_err(|e| RecordError::malformed(self.line, e));
                    if let Err(e) = &parsed {
                        tracing::warn!("Skipping event: {}", e);
                    }
                    return Some(parsed);
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    fn events_read(&self) -> usize {
        self.read
    }
}
