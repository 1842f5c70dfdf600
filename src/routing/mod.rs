//! # Dispatch Strategies
//!
//! Two pluggable strategy seams drive dispatch:
//!
//! - [`CallRule`] — picks which waiting visit a service point should pull
//!   next. Two variants ship: oldest-waiting-first
//!   ([`MaxWaitingTimeCallRule`]) and SLA-deadline-first
//!   ([`MaxLifeTimeCallRule`]).
//! - [`RoutingRule`] — maps a visit's requested service onto the queue that
//!   should serve it (segmentation), optionally by named rule.
//!
//! Both are plain trait objects so deployments can swap implementations
//! without touching the orchestrator.

pub mod call_rules;
pub mod segmentation;

use crate::error::Result;
use crate::model::{Branch, ServicePoint, Visit};

pub use call_rules::{MaxLifeTimeCallRule, MaxWaitingTimeCallRule};
pub use segmentation::SimpleRoutingRule;

/// Strategy picking the next visit for a service point
pub trait CallRule: Send + Sync {
    /// Select the best waiting visit reachable by the service point's work
    /// profile, optionally narrowed to `queue_ids`. Visits inside an active
    /// return/transfer cooldown are not eligible. `Ok(None)` when nothing
    /// qualifies; `Forbidden` when no operator is logged in.
    fn select(
        &self,
        branch: &Branch,
        service_point: &ServicePoint,
        queue_ids: Option<&[String]>,
    ) -> Result<Option<Visit>>;

    /// Inverse query: idle, auto-call-armed service points whose operator's
    /// work profile could pull the given (newly queued) visit.
    fn available_service_points(&self, branch: &Branch, visit: &Visit) -> Vec<String>;
}

/// Strategy mapping a visit's requested service onto a target queue
pub trait RoutingRule: Send + Sync {
    /// Resolve the queue id that should serve the visit's current service.
    /// `Ok(None)` is a business condition (no queue), not a system error.
    fn target_queue(
        &self,
        visit: &Visit,
        branch: &Branch,
        rule_id: Option<&str>,
    ) -> Result<Option<String>>;
}
