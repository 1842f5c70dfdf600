//! External collaborator interfaces.
//!
//! Identity lookup and ticket printing live outside the engine. Both
//! degrade gracefully: a failed identity resolution yields an empty
//! identity, a failed print is logged and swallowed. Neither is ever
//! called while a branch lock is held.

use async_trait::async_trait;

use crate::model::Visit;

/// Staff identity resolved from an external session id
#[derive(Debug, Clone, Default)]
pub struct StaffIdentity {
    pub id: String,
    pub name: String,
}

/// Resolves an external actor's display identity from a session id
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_by_session_id(&self, session_id: &str) -> Option<StaffIdentity>;
}

/// Resolver that knows nobody
pub struct NoopIdentityResolver;

#[async_trait]
impl IdentityResolver for NoopIdentityResolver {
    async fn resolve_by_session_id(&self, _session_id: &str) -> Option<StaffIdentity> {
        None
    }
}

/// Ticket printer collaborator
#[async_trait]
pub trait TicketPrinter: Send + Sync {
    async fn print(&self, printer_id: &str, visit: &Visit) -> anyhow::Result<()>;
}

/// Printer that prints nothing and never fails
pub struct NoopTicketPrinter;

#[async_trait]
impl TicketPrinter for NoopTicketPrinter {
    async fn print(&self, _printer_id: &str, _visit: &Visit) -> anyhow::Result<()> {
        Ok(())
    }
}
