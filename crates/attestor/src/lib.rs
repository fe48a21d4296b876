//! Mycelia Attestor
//!
//! Scheduled Schnorr attestation events: hourly event identifiers, nonce
//! commitments pre-published over a 24-hour horizon, on-maturity digit
//! attestation through the aggregation engine, and boot-time recovery of
//! anything the process slept through.

pub mod event;
pub mod scheduler;
pub mod store;

pub use event::{event_id, hour_floor, Announcement, Attestation, MATURITY_FORMAT};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError};
pub use store::{EventStore, StoreError};
