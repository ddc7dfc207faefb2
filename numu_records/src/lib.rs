//! numu Event Record Layer
//!
//! This crate holds the typed, already-deserialized per-event collections
//! that the reconstruction core consumes, and the `EventSource` seam through
//! which they are handed over.
//!
//! # Core Concept: Retrieval Is Somebody Else's Problem
//!
//! The core never opens files or talks to a data store. Whatever produces
//! events (a file reader, a simulation oracle, a test) implements
//! [`EventSource`]; a missing product is an empty collection, never a fault.
//!
//! # Example
//!
//! ```ignore
//! use numu_records::{EventSource, JsonLinesSource};
//!
//! let mut source = JsonLinesSource::open("events.jsonl")?;
//! while let Some(event) = source.next_event() {
//!     let event = event?;
//!     println!("run {} event {}: {} tracks", event.run, event.event, event.tracks.len());
//! }
//! ```

mod error;
mod json_impl;
mod memory_impl;
mod source;
mod types;

pub use error::RecordError;
pub use json_impl::JsonLinesSource;
pub use memory_impl::MemorySource;
pub use source::EventSource;
pub use types::{
    CaloPoint, CrtHitRecord, CrtTrackRecord, Current, EventRecords, FlashRecord, HitRecord,
    HitTruthShare, McParticleRecord, NeutrinoRecord, Origin, PfParticleRecord, Point,
    TrackRecord, TruthRecord,
};
