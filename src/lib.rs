//! # Visit Engine
//!
//! This crate provides the admission-control and dispatch engine for
//! physical/virtual service appointments ("visits") flowing through a
//! branch: customers enter a queue, are matched to a free service point,
//! are served through one or more sub-services, and may be rerouted to
//! other queues or held in personal/service-point pools before being
//! served or discarded.
//!
//! ## Features
//!
//! - **Visit Orchestration**: a strict lifecycle state machine with an
//!   append-only per-visit event log
//! - **Dispatch Strategies**: oldest-waiting-first and SLA-deadline-first
//!   call rules, plus data-driven queue segmentation
//! - **Location Transfers**: queue ⇄ service-point-pool ⇄ user-pool moves
//!   with cooldown windows and delayed refresh notifications
//! - **Auto-Call**: branch-wide policy that proactively pulls the next
//!   eligible visit onto armed idle service points
//! - **Per-Branch Locking**: branches form an arena of independent lock
//!   domains; operations on different branches run fully in parallel
//!
//! ## Architecture
//!
//! The engine is organized into several key modules:
//!
//! - [`orchestrator`]: the single entry point every external caller talks to
//! - [`model`]: the Branch aggregate and its sub-resources
//! - [`lifecycle`]: visit event kinds and the transition state machine
//! - [`routing`]: call rules and the segmentation rule
//! - [`events`]: bus event payloads, the sink seam and delayed notification
//! - [`registry`]: the per-branch lock arena
//! - [`external`]: identity and printer collaborator interfaces
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use visit_engine::prelude::*;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Register a branch
//!     let branches = Arc::new(BranchRegistry::new());
//!     let mut branch = Branch::new("branch-1", "Main Branch");
//!     branch.queues.insert(
//!         "q-1".to_string(),
//!         Queue::new("q-1", "General", "A", 900),
//!     );
//!     branch.services.insert(
//!         "svc-1".to_string(),
//!         Service::new("svc-1", "Deposits", 600, "q-1"),
//!     );
//!     branch.entry_points.insert(
//!         "ep-1".to_string(),
//!         EntryPoint::new("ep-1", "Front door"),
//!     );
//!     branches.add(branch);
//!
//!     // Create the orchestrator and take a visit through intake
//!     let orchestrator = VisitOrchestrator::new(
//!         EngineConfig::default(),
//!         branches,
//!         Arc::new(TracingEventSink),
//!     );
//!     let visit = orchestrator
//!         .create_visit(
//!             "branch-1",
//!             "ep-1",
//!             &["svc-1".to_string()],
//!             HashMap::new(),
//!             false,
//!             None,
//!         )
//!         .await?;
//!     println!("Created visit with ticket {}", visit.ticket);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod config;
pub mod error;

// Domain modules
pub mod lifecycle;
pub mod model;
pub mod registry;
pub mod routing;

// Orchestration
pub mod orchestrator;

// External interfaces
pub mod events;
pub mod external;

// Re-exports for convenience
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use orchestrator::VisitOrchestrator;
pub use registry::BranchRegistry;

/// Commonly used types, in one import
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::{EngineError, Result};
    pub use crate::events::delayed::DelayedNotifier;
    pub use crate::events::{Event, EventSink, TracingEventSink};
    pub use crate::external::{
        IdentityResolver, StaffIdentity, TicketPrinter,
    };
    pub use crate::lifecycle::{VisitEventEntry, VisitEventKind};
    pub use crate::model::{
        Branch, DeliveredService, EntryPoint, Outcome, Queue, QueuePosition,
        SegmentationRuleData, Service, ServicePoint, User, Visit, VisitStatus, WorkProfile,
    };
    pub use crate::orchestrator::VisitOrchestrator;
    pub use crate::registry::BranchRegistry;
    pub use crate::routing::{
        CallRule, MaxLifeTimeCallRule, MaxWaitingTimeCallRule, RoutingRule, SimpleRoutingRule,
    };
}
