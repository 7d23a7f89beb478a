//! The Dynamic Record aggregate.
//!
//! Composes a `RecordStore`, a `SearchIndex`, and the live `FormRegistry`
//! into the create/update/destroy state machine. Index notification is
//! best-effort: a save that reached the store never fails because the
//! search backend is down.

mod clock;
mod engine;

pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::engine::{attachment_key, format_timestamp, EngineError, RecordEngine};
