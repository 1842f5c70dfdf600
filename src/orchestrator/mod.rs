//! # Visit Orchestration Module
//!
//! The orchestrator is the single component every external caller talks to.
//! It loads the branch from the registry, validates location/ownership
//! invariants, mutates the visit and the branch collections, appends event
//! log entries, and publishes bus events once the branch lock is released —
//! scheduling a delayed refresh notification whenever an operation starts a
//! cooldown window.
//!
//! ## Module Organization
//!
//! - [`core`]: the [`VisitOrchestrator`] itself, its construction, listing
//!   queries and service-point session management
//! - [`intake`]: visit creation (entry-point and service-point originated)
//! - [`dispatch`]: call, confirm and auto-call flows
//! - [`completion`]: ending, no-show, return-to-queue and deletion
//! - [`transfers`]: queue ⇄ service-point-pool ⇄ user-pool moves
//!
//! ## Operation shape
//!
//! Every operation follows the same data flow: lock the branch → validate →
//! mutate visit + collections → append to the event log → collect outgoing
//! events in an outbox → unlock → flush the outbox and schedule delayed
//! notifications. External collaborators (identity, printer, event sink)
//! are never called while the lock is held.

pub mod completion;
pub mod core;
pub mod dispatch;
pub mod intake;
pub mod transfers;

pub use core::VisitOrchestrator;
