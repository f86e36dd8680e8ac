//! # Watchdog
//!
//! This crate watches directory trees and mirrors their changes to remote
//! destinations by running user-supplied sync scripts (`bulk_sync`, `copy`,
//! `delete`).
//!
//! ## Features
//!
//! - **Recursive Watching**: Every directory is watched, including new ones
//! - **Exclusion Patterns**: Regular expressions filter out unwanted paths
//! - **Agglomeration**: Bursts of changes collapse into one script call
//! - **Graceful Shutdown**: Running scripts get SIGTERM, then SIGKILL
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Pipeline (one per tree)                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  notify ──► EventWatcher ──► WorkMarshaller ──► Worker ──► sh  │
//! │                  │                 │               │            │
//! │                  ▼                 ▼               ▼            │
//! │             ExcludeSet           Batch        wait_or_stop      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod marshaller;
pub mod pipeline;
pub mod process;
pub mod watcher;
pub mod worker;

pub use config::{Configuration, TreeConfig};
pub use error::{Result, WatchdogError};
pub use event::{EventType, NodeType, WorkItem, WorkPackage};
pub use filter::ExcludeSet;
pub use marshaller::{Batch, WorkMarshaller};
pub use pipeline::Watchdog;
pub use watcher::EventWatcher;
pub use worker::{Script, ScriptSet, SyncCommand, Worker, longest_prefix};
