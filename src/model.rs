//! Core data model.
//!
//! An event is an immutable record of something that happened in the ledger
//! application. The catalog names the events the application emits.

pub mod catalog;
pub mod event;

pub use event::{Event, EventId};
