#![forbid(unsafe_code)]

//! Core domain model and business logic for the Bloodline donation system.
//!
//! This crate provides:
//! - Domain types (donors, scheduled donations, inventory, blood requests)
//! - Donor registry, scheduling engine, inventory ledger, request lifecycle
//! - The `BloodBank` coordinator that callers drive
//! - Ledger implementations (in-memory and JSONL write-ahead log)
//! - Domain event observers
//! - Configuration, logging and CSV export

pub mod types;
pub mod error;
pub mod policy;
pub mod ledger;
pub mod state;
pub mod memory;
pub mod wal;
pub mod events;
pub mod locks;
pub mod registry;
pub mod inventory;
pub mod scheduling;
pub mod requests;
pub mod coordinator;
pub mod export;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use error::{Error, ErrorKind, Result};
pub use types::*;
pub use config::Config;
pub use coordinator::BloodBank;
pub use events::{DomainEvent, EventBus, EventObserver, LoggingObserver, RecordingObserver};
pub use ledger::{Ledger, LedgerEntry, LedgerError, Receipt};
pub use memory::InMemoryLedger;
pub use policy::{Clock, FixedClock, FulfillmentPolicy, Policy, RewardTier, SystemClock};
pub use registry::DonorStatus;
pub use wal::JsonlLedger;
