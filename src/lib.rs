//! syncore: the event-consolidation and sync-reconciliation core of a
//! desktop file-sync agent. Five components cooperate through a shared
//! `Snapshot`: the local watcher and remote poller each turn raw change
//! notifications into canonical `IntentEnvelope`s, the operations queue
//! applies them against whichever side didn't originate them, and the
//! background worker supervises the whole thing on a dedicated thread.
//!
//! This crate is the core only -- installer/packaging, UI, and
//! authentication are external collaborators (spec.md §1) wired in by
//! whatever binary embeds it; see `main.rs` for the CLI that does so here.

pub mod callbacks;
pub mod config;
pub mod consolidator;
pub mod error;
pub mod model;
pub mod poller;
pub mod queue;
pub mod remote;
pub mod resolver;
pub mod snapshot;
pub mod watcher;
pub mod worker;
