//! # ledger-events
//!
//! Asynchronous domain-event logging for the expense ledger.
//!
//! Request handlers build an [`Event`](model::Event) and hand it to an
//! [`EventLogger`](worker::EventLogger); a single background task persists
//! events through an [`EventSink`](sink::EventSink) (Postgres via
//! [`Db`](db::Db)). Logging never blocks: when the queue is full the event
//! is dropped and reported. Shutdown drains whatever was accepted.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod sink;
pub mod telemetry;
pub mod worker;

pub use error::{Error, Result};
pub use model::{Event, EventId};
pub use sink::EventSink;
pub use worker::{EventLogger, EventSender, EventWorker, WorkerConfig, WorkerState, WorkerStats};
