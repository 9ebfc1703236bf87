//! Client contract for the shared record store, plus the critical section
//! built on top of it.
//!
//! The record store is the only durable state in the pipeline. This crate
//! exposes the typed CRUD contract ([`RecordStore`] and the serde layer in
//! [`RecordStoreExt`]), the eventual-consistency index wait, the in-memory
//! backend used by tests and dev mode, and [`perform_critical`], the sole
//! mutation path every other component uses.

pub mod cri;
pub mod memory;

mod client;
mod error;
mod index;

pub use client::{RecordStore, RecordStoreExt, Versioned, VersionedValue};
pub use cri::{perform_critical, CriticalError, CriticalResult};
pub use error::StoreError;
pub use index::wait_for_indexed;

#[cfg(feature = "test-utils")]
pub use client::MockRecordStore;
