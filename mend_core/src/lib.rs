#![forbid(unsafe_code)]

//! Core domain model and engine for the Mend health-records system.
//!
//! This crate provides:
//! - Domain types (injury records, recovery updates, reminders, photos)
//! - Persistence (record store, id ledger)
//! - The record repository and its timeline index
//! - Recovery tracking and reminder scheduling
//! - Statistics and export

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod ledger;
pub mod store;
pub mod index;
pub mod tracker;
pub mod scheduler;
pub mod stats;
pub mod export;
pub mod repository;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use store::{FileStore, MemoryStore, RecordStore};
pub use index::{Filter, Page, SortOrder, TimelineIndex};
pub use tracker::UpdateRequest;
pub use scheduler::{due_reminders, DueReminder};
pub use stats::{Granularity, Statistics};
pub use export::{ExportFormat, ExportOptions};
pub use repository::{Clock, Mutation, Repository, SystemClock};
