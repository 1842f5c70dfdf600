//! Location transfers: queue ⇄ service-point-pool ⇄ user-pool.
//!
//! Every transfer follows one shape: leaving an active service point first
//! appends `StopServing`; the target-entry event carries the vacated and
//! destination location ids plus, for externally-initiated moves, the
//! resolved actor identity and any caller-supplied metadata. Each transfer
//! starts a transfer cooldown and schedules exactly one delayed refresh
//! notification for the destination.

use std::collections::HashMap;

use chrono::Utc;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::events::{
    Outbox, REASON_RETURN_DELAY_FINISHED, REASON_TRANSFER_DELAY_FINISHED, TOPIC_FRONTEND,
};
use crate::external::StaffIdentity;
use crate::lifecycle::VisitEventKind;
use crate::model::visit::{
    IS_TRANSFERRED_TO_START, LAST_POOL_SERVICE_POINT_ID, LAST_POOL_USER_ID, LAST_QUEUE_ID,
    LAST_USER_ID,
};
use crate::model::{Branch, QueuePosition, Visit};

use super::core::VisitOrchestrator;

/// Destination of a transfer
#[derive(Debug, Clone)]
enum TransferTarget {
    Queue(String),
    ServicePointPool(String),
    UserPool(String),
}

impl TransferTarget {
    fn id(&self) -> &str {
        match self {
            Self::Queue(id) | Self::ServicePointPool(id) | Self::UserPool(id) => id,
        }
    }

    fn event_kind(&self, returning: bool) -> VisitEventKind {
        match (self, returning) {
            (Self::Queue(_), _) => VisitEventKind::TransferToQueue,
            (Self::ServicePointPool(_), false) => VisitEventKind::TransferToServicePointPool,
            (Self::ServicePointPool(_), true) => VisitEventKind::BackToServicePointPool,
            (Self::UserPool(_), false) => VisitEventKind::TransferToUserPool,
            (Self::UserPool(_), true) => VisitEventKind::BackToUserPool,
        }
    }

    fn refresh_event(&self) -> &'static str {
        match self {
            Self::Queue(_) => "QUEUE_REFRESHED",
            Self::ServicePointPool(_) => "SERVICEPOINT_POOL_REFRESHED",
            Self::UserPool(_) => "USER_POOL_REFRESHED",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Queue(_) => "queue",
            Self::ServicePointPool(_) => "service point pool",
            Self::UserPool(_) => "user pool",
        }
    }

    fn validate(&self, branch: &Branch) -> Result<()> {
        match self {
            Self::Queue(id) if !branch.queues.contains_key(id) => {
                Err(EngineError::not_found("Queue not found in branch configuration"))
            }
            Self::ServicePointPool(id) if !branch.service_points.contains_key(id) => Err(
                EngineError::not_found("ServicePoint not found in branch configuration"),
            ),
            Self::UserPool(id) if !branch.users.contains_key(id) => {
                Err(EngineError::not_found(format!("User {} not found", id)))
            }
            _ => Ok(()),
        }
    }
}

impl VisitOrchestrator {
    /// Transfer the visit being served on a service point into a queue
    pub async fn visit_transfer_to_queue(
        &self,
        branch_id: &str,
        service_point_id: &str,
        queue_id: &str,
        is_to_start: bool,
        delay_seconds: i64,
    ) -> Result<Visit> {
        let position = if is_to_start {
            QueuePosition::Start
        } else {
            QueuePosition::End
        };
        self.transfer_from_service_point(
            branch_id,
            service_point_id,
            TransferTarget::Queue(queue_id.to_string()),
            position,
            delay_seconds,
            false,
        )
        .await
    }

    /// Transfer the visit being served into another service point's pool
    pub async fn visit_transfer_to_service_point_pool(
        &self,
        branch_id: &str,
        service_point_id: &str,
        pool_service_point_id: &str,
        delay_seconds: i64,
    ) -> Result<Visit> {
        self.transfer_from_service_point(
            branch_id,
            service_point_id,
            TransferTarget::ServicePointPool(pool_service_point_id.to_string()),
            QueuePosition::End,
            delay_seconds,
            false,
        )
        .await
    }

    /// Transfer the visit being served into an operator's personal pool
    pub async fn visit_transfer_to_user_pool(
        &self,
        branch_id: &str,
        service_point_id: &str,
        user_id: &str,
        delay_seconds: i64,
    ) -> Result<Visit> {
        self.transfer_from_service_point(
            branch_id,
            service_point_id,
            TransferTarget::UserPool(user_id.to_string()),
            QueuePosition::End,
            delay_seconds,
            false,
        )
        .await
    }

    /// Undo path: return the visit being served to the service-point pool
    /// it last sat in, per its own breadcrumb.
    pub async fn visit_back_to_service_point_pool(
        &self,
        branch_id: &str,
        service_point_id: &str,
        delay_seconds: i64,
    ) -> Result<Visit> {
        self.back_from_service_point(
            branch_id,
            service_point_id,
            delay_seconds,
            |visit| {
                visit
                    .parameters
                    .get(LAST_POOL_SERVICE_POINT_ID)
                    .cloned()
                    .map(TransferTarget::ServicePointPool)
                    .ok_or_else(|| {
                        EngineError::conflict("Visit has no service point pool to return to")
                    })
            },
        )
        .await
    }

    /// Undo path: return the visit being served to the user pool it last
    /// sat in (falling back to the last serving operator's pool).
    pub async fn visit_back_to_user_pool(
        &self,
        branch_id: &str,
        service_point_id: &str,
        delay_seconds: i64,
    ) -> Result<Visit> {
        self.back_from_service_point(
            branch_id,
            service_point_id,
            delay_seconds,
            |visit| {
                visit
                    .parameters
                    .get(LAST_POOL_USER_ID)
                    .or_else(|| visit.parameters.get(LAST_USER_ID))
                    .cloned()
                    .map(TransferTarget::UserPool)
                    .ok_or_else(|| EngineError::conflict("Visit has no user pool to return to"))
            },
        )
        .await
    }

    /// External-actor variant: move a waiting visit into another queue
    pub async fn visit_transfer_from_queue(
        &self,
        branch_id: &str,
        visit_id: &str,
        target_queue_id: &str,
        position: QueuePosition,
        delay_seconds: i64,
        session_id: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> Result<Visit> {
        self.transfer_waiting_visit(
            branch_id,
            visit_id,
            TransferTarget::Queue(target_queue_id.to_string()),
            position,
            delay_seconds,
            session_id,
            metadata,
        )
        .await
    }

    /// External-actor variant: move a waiting visit into a service-point pool
    pub async fn visit_transfer_from_queue_to_service_point_pool(
        &self,
        branch_id: &str,
        visit_id: &str,
        pool_service_point_id: &str,
        position: QueuePosition,
        delay_seconds: i64,
        session_id: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> Result<Visit> {
        self.transfer_waiting_visit(
            branch_id,
            visit_id,
            TransferTarget::ServicePointPool(pool_service_point_id.to_string()),
            position,
            delay_seconds,
            session_id,
            metadata,
        )
        .await
    }

    /// External-actor variant: move a waiting visit into a user pool
    pub async fn visit_transfer_from_queue_to_user_pool(
        &self,
        branch_id: &str,
        visit_id: &str,
        user_id: &str,
        position: QueuePosition,
        delay_seconds: i64,
        session_id: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> Result<Visit> {
        self.transfer_waiting_visit(
            branch_id,
            visit_id,
            TransferTarget::UserPool(user_id.to_string()),
            position,
            delay_seconds,
            session_id,
            metadata,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Shared shape
    // ------------------------------------------------------------------

    async fn transfer_from_service_point(
        &self,
        branch_id: &str,
        service_point_id: &str,
        target: TransferTarget,
        position: QueuePosition,
        delay_seconds: i64,
        returning: bool,
    ) -> Result<Visit> {
        self.leave_service_point(
            branch_id,
            service_point_id,
            position,
            delay_seconds,
            returning,
            |_| Ok(target),
        )
        .await
    }

    async fn back_from_service_point(
        &self,
        branch_id: &str,
        service_point_id: &str,
        delay_seconds: i64,
        resolve_target: impl FnOnce(&Visit) -> Result<TransferTarget>,
    ) -> Result<Visit> {
        self.leave_service_point(
            branch_id,
            service_point_id,
            QueuePosition::End,
            delay_seconds,
            true,
            resolve_target,
        )
        .await
    }

    /// Shared shape for every transfer leaving an active service point
    async fn leave_service_point(
        &self,
        branch_id: &str,
        service_point_id: &str,
        position: QueuePosition,
        delay_seconds: i64,
        returning: bool,
        resolve_target: impl FnOnce(&Visit) -> Result<TransferTarget>,
    ) -> Result<Visit> {
        let mut outbox = Outbox::new();
        let result = self.branch_handle(branch_id).and_then(|handle| {
            let mut branch = handle.lock();
            let service_point = branch
                .service_points
                .get(service_point_id)
                .ok_or_else(|| {
                    EngineError::not_found("ServicePoint not found in branch configuration")
                })?
                .clone();
            let mut visit = service_point.current_visit.clone().ok_or_else(|| {
                EngineError::not_found(format!("Visit not found in ServicePoint {}", service_point_id))
            })?;
            let target = resolve_target(&visit)?;
            target.validate(&branch)?;
            let (staff_id, staff_name, _) = Self::staff_params(&branch, &service_point);

            let mut stop_params = HashMap::new();
            stop_params.insert("servicePointId".to_string(), service_point_id.to_string());
            stop_params.insert("branchId".to_string(), branch.id.clone());
            stop_params.insert("staffId".to_string(), staff_id.clone());
            stop_params.insert("staffName".to_string(), staff_name.clone());
            stop_params.insert("isForced".to_string(), "false".to_string());
            visit.leave_location();
            self.commit_event(
                &mut branch,
                &mut visit,
                VisitEventKind::StopServing,
                stop_params,
                QueuePosition::End,
                &mut outbox,
            )?;

            let mut entry_params = HashMap::new();
            entry_params.insert("oldServicePointId".to_string(), service_point_id.to_string());
            entry_params.insert("staffId".to_string(), staff_id);
            entry_params.insert("staffName".to_string(), staff_name);
            self.place_at_target(
                &mut branch,
                &mut visit,
                &target,
                position,
                delay_seconds,
                returning,
                entry_params,
                &mut outbox,
            )?;
            Ok(visit)
        });
        let visit = self.finish(outbox, result).await?;
        if visit.queue_id.is_some() {
            self.try_auto_call(&visit).await;
        }
        Ok(visit)
    }

    async fn transfer_waiting_visit(
        &self,
        branch_id: &str,
        visit_id: &str,
        target: TransferTarget,
        position: QueuePosition,
        delay_seconds: i64,
        session_id: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> Result<Visit> {
        // Resolve the external actor before taking the branch lock
        let external = match session_id {
            Some(session_id) => self.identity.resolve_by_session_id(session_id).await,
            None => None,
        };

        let mut outbox = Outbox::new();
        let result = self.branch_handle(branch_id).and_then(|handle| {
            let mut branch = handle.lock();
            let mut visit = branch
                .find_visit(visit_id)
                .ok_or_else(|| EngineError::not_found(format!("Visit {} not found", visit_id)))?;
            if visit.service_point_id.is_some() {
                return Err(EngineError::conflict("Visit is being served, not waiting"));
            }
            target.validate(&branch)?;

            let mut entry_params = metadata;
            if let Some(StaffIdentity { id, name }) = &external {
                entry_params.insert("externalStaffId".to_string(), id.clone());
                entry_params.insert("externalStaffName".to_string(), name.clone());
            }
            visit.leave_location();
            self.place_at_target(
                &mut branch,
                &mut visit,
                &target,
                position,
                delay_seconds,
                false,
                entry_params,
                &mut outbox,
            )?;
            Ok(visit)
        });
        let visit = self.finish(outbox, result).await?;
        if visit.queue_id.is_some() {
            self.try_auto_call(&visit).await;
        }
        Ok(visit)
    }

    /// Land the visit at the transfer destination: entry event, cooldown,
    /// breadcrumb-driven old-location tags and the delayed refresh.
    fn place_at_target(
        &self,
        branch: &mut Branch,
        visit: &mut Visit,
        target: &TransferTarget,
        position: QueuePosition,
        delay_seconds: i64,
        returning: bool,
        mut entry_params: HashMap<String, String>,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let now = Utc::now();
        visit.transfer_date_time = Some(now);
        visit.transfer_time_delay = Some(delay_seconds);
        if matches!(position, QueuePosition::Start) {
            visit
                .parameters
                .insert(IS_TRANSFERRED_TO_START.to_string(), "true".to_string());
        }

        // Old-location tag comes from the breadcrumb just written; a visit
        // with no queue history simply omits the parameter.
        if let Some(last_queue) = visit.parameters.get(LAST_QUEUE_ID) {
            entry_params.insert("oldQueueId".to_string(), last_queue.clone());
        }
        entry_params.insert("branchId".to_string(), branch.id.clone());
        entry_params.insert("newLocationId".to_string(), target.id().to_string());

        match target {
            TransferTarget::Queue(queue_id) => {
                visit.queue_id = Some(queue_id.clone());
                entry_params.insert("queueId".to_string(), queue_id.clone());
            }
            TransferTarget::ServicePointPool(pool_id) => {
                visit.pool_service_point_id = Some(pool_id.clone());
                entry_params.insert("poolServicePointId".to_string(), pool_id.clone());
            }
            TransferTarget::UserPool(user_id) => {
                visit.pool_user_id = Some(user_id.clone());
                entry_params.insert("poolUserId".to_string(), user_id.clone());
            }
        }

        let kind = target.event_kind(returning);
        self.commit_event(branch, visit, kind, entry_params, position, outbox)?;

        let reason = if returning {
            REASON_RETURN_DELAY_FINISHED
        } else {
            REASON_TRANSFER_DELAY_FINISHED
        };
        let mut refresh_params = HashMap::new();
        refresh_params.insert("branchId".to_string(), branch.id.clone());
        refresh_params.insert("locationId".to_string(), target.id().to_string());
        outbox.push_delayed(
            TOPIC_FRONTEND,
            target.refresh_event(),
            reason,
            refresh_params,
            delay_seconds,
        );
        info!(
            "🔀 Visit {} transferred to {} {}",
            visit.id,
            target.describe(),
            target.id()
        );
        Ok(())
    }
}
