use thiserror::Error;

use crate::lifecycle::VisitEventKind;

/// Visit engine errors
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Branch, queue, service point, service, visit or work profile absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Service point occupied, cooldown not elapsed, or missing breadcrumb
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No operator logged into the target service point
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Routing produced no queue or the request itself is malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No candidate available right now; the service point's auto-call mode
    /// was armed instead. Control-flow signal, not a failure.
    #[error("Auto-call mode engaged: {0}")]
    AutoCallArmed(String),

    /// Illegal visit lifecycle transition
    #[error("Event {next:?} can't follow {last:?}")]
    Transition {
        last: Option<VisitEventKind>,
        next: VisitEventKind,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create a new NotFound error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Conflict error
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a new Forbidden error
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a new InvalidInput error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status the error maps to at the API edge
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::Transition { .. } => 409,
            Self::Forbidden(_) => 403,
            Self::InvalidInput(_) => 400,
            Self::AutoCallArmed(_) => 207,
            Self::Internal(_) => 500,
        }
    }

    /// True for the 207 "auto-call armed" control-flow signal
    pub fn is_auto_call_armed(&self) -> bool {
        matches!(self, Self::AutoCallArmed(_))
    }
}

/// Result type for visit engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
