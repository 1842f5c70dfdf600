//! # Visit Lifecycle Event Log
//!
//! Append-only per-visit record of lifecycle transitions, together with the
//! state machine that decides which transition may come next.
//!
//! Every mutation of a visit goes through [`append_event`]: it validates the
//! candidate event against the adjacency table, pushes a timestamped
//! [`VisitEventEntry`] carrying its own parameter snapshot, and keeps the
//! visit's `status` tag in sync. Legality is data (a static table), not
//! hard-coded per call site, so the full transition graph lives in one place.
//!
//! Each log entry owns its parameter map. Parameters are never shared
//! between entries or between visits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::model::visit::{Visit, VisitStatus};

/// Visit lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitEventKind {
    Created,
    PlacedInQueue,
    Called,
    Recalled,
    StartServing,
    StopServing,
    NoShow,
    End,
    BackToQueue,
    TransferToQueue,
    TransferToServicePointPool,
    TransferToUserPool,
    BackToServicePointPool,
    BackToUserPool,
    AddService,
    Deleted,
}

impl VisitEventKind {
    /// Wire name of the event kind, used in `VISIT_<KIND>` bus events
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::PlacedInQueue => "PLACED_IN_QUEUE",
            Self::Called => "CALLED",
            Self::Recalled => "RECALLED",
            Self::StartServing => "START_SERVING",
            Self::StopServing => "STOP_SERVING",
            Self::NoShow => "NO_SHOW",
            Self::End => "END",
            Self::BackToQueue => "BACK_TO_QUEUE",
            Self::TransferToQueue => "TRANSFER_TO_QUEUE",
            Self::TransferToServicePointPool => "TRANSFER_TO_SERVICE_POINT_POOL",
            Self::TransferToUserPool => "TRANSFER_TO_USER_POOL",
            Self::BackToServicePointPool => "BACK_TO_SERVICE_POINT_POOL",
            Self::BackToUserPool => "BACK_TO_USER_POOL",
            Self::AddService => "ADD_SERVICE",
            Self::Deleted => "DELETED",
        }
    }

    /// Legal successors of this event kind
    pub fn successors(&self) -> &'static [VisitEventKind] {
        use VisitEventKind::*;
        match self {
            Created => &[PlacedInQueue, Called],
            PlacedInQueue => &[
                Called,
                Recalled,
                TransferToQueue,
                TransferToServicePointPool,
                TransferToUserPool,
                Deleted,
            ],
            Called | Recalled => &[
                Called,
                Recalled,
                StartServing,
                NoShow,
                BackToQueue,
                PlacedInQueue,
            ],
            StartServing | AddService => &[
                StopServing,
                End,
                NoShow,
                BackToQueue,
                TransferToQueue,
                TransferToServicePointPool,
                TransferToUserPool,
                AddService,
            ],
            StopServing => &[
                End,
                BackToQueue,
                TransferToQueue,
                TransferToServicePointPool,
                TransferToUserPool,
                BackToServicePointPool,
                BackToUserPool,
            ],
            BackToQueue
            | TransferToQueue
            | TransferToServicePointPool
            | TransferToUserPool
            | BackToServicePointPool
            | BackToUserPool => &[
                Called,
                Recalled,
                TransferToQueue,
                TransferToServicePointPool,
                TransferToUserPool,
                Deleted,
            ],
            NoShow | End => &[Deleted],
            Deleted => &[],
        }
    }

    /// Whether `next` is a legal successor of this event kind
    pub fn can_be_next(&self, next: VisitEventKind) -> bool {
        self.successors().contains(&next)
    }

    /// Visit status the event kind maps onto, if it changes the status
    pub fn status(&self) -> Option<VisitStatus> {
        use VisitEventKind::*;
        match self {
            Created | PlacedInQueue | BackToQueue | TransferToQueue
            | TransferToServicePointPool | TransferToUserPool | BackToServicePointPool
            | BackToUserPool | StopServing => Some(VisitStatus::Waiting),
            Called | Recalled => Some(VisitStatus::Called),
            StartServing | AddService => Some(VisitStatus::StartServing),
            NoShow => Some(VisitStatus::NoShow),
            End => Some(VisitStatus::Served),
            Deleted => None,
        }
    }

    /// Whether the event is forwarded to the analytics topic
    pub fn is_stat_event(&self) -> bool {
        !matches!(self, Self::Recalled)
    }

    /// Whether the event is forwarded to the UI topic
    pub fn is_frontend_event(&self) -> bool {
        !matches!(self, Self::AddService)
    }
}

/// One entry of a visit's audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitEventEntry {
    /// Event kind
    pub kind: VisitEventKind,
    /// When the event was recorded
    pub date_time: DateTime<Utc>,
    /// Parameter snapshot local to this entry
    pub parameters: HashMap<String, String>,
}

/// Append a lifecycle event to the visit's log.
///
/// Fails with a transition error when the log is empty and `kind` is not
/// `Created`, or when `kind` is not a legal successor of the last recorded
/// kind. On success the entry and its kind are pushed and the visit status
/// is updated.
pub fn append_event(
    visit: &mut Visit,
    kind: VisitEventKind,
    parameters: HashMap<String, String>,
    now: DateTime<Utc>,
) -> Result<()> {
    match visit.visit_events.last() {
        None => {
            if kind != VisitEventKind::Created {
                return Err(EngineError::Transition { last: None, next: kind });
            }
        }
        Some(last) => {
            if !last.can_be_next(kind) {
                return Err(EngineError::Transition {
                    last: Some(*last),
                    next: kind,
                });
            }
        }
    }

    visit.events.push(VisitEventEntry {
        kind,
        date_time: now,
        parameters,
    });
    visit.visit_events.push(kind);
    if let Some(status) = kind.status() {
        visit.status = status;
    }
    Ok(())
}
