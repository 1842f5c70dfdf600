//! Core orchestrator: construction, shared helpers, listing queries and
//! service-point session management.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::delayed::DelayedNotifier;
use crate::events::{Event, EventPublisher, EventSink, Outbox, TOPIC_ALL, TOPIC_FRONTEND, TOPIC_STAT};
use crate::external::{IdentityResolver, NoopIdentityResolver, NoopTicketPrinter, TicketPrinter};
use crate::lifecycle::{self, VisitEventKind};
use crate::model::{Branch, QueuePosition, ServicePoint, User, Visit, VisitStatus};
use crate::registry::BranchRegistry;
use crate::routing::{
    CallRule, MaxLifeTimeCallRule, MaxWaitingTimeCallRule, RoutingRule, SimpleRoutingRule,
};

/// The visit lifecycle orchestrator.
///
/// Owns the strategy seams (call rules, routing rule), the event publisher,
/// the delayed notifier and the external collaborators. Cheap to clone via
/// `Arc` in embedding services.
pub struct VisitOrchestrator {
    config: EngineConfig,
    branches: Arc<BranchRegistry>,
    publisher: EventPublisher,
    notifier: DelayedNotifier,
    pub(crate) waiting_time_rule: Arc<dyn CallRule>,
    pub(crate) life_time_rule: Arc<dyn CallRule>,
    pub(crate) routing_rule: Arc<dyn RoutingRule>,
    pub(crate) identity: Arc<dyn IdentityResolver>,
    pub(crate) printer: Arc<dyn TicketPrinter>,
}

impl VisitOrchestrator {
    /// Create an orchestrator with the default strategies and noop
    /// collaborators. Swap pieces in with the `with_*` builder methods.
    pub fn new(
        config: EngineConfig,
        branches: Arc<BranchRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        info!("🎛️ Initializing visit orchestrator");
        let publisher = EventPublisher::new(Arc::clone(&sink), &config.general.application_name);
        let notifier = DelayedNotifier::new(sink);
        Self {
            config,
            branches,
            publisher,
            notifier,
            waiting_time_rule: Arc::new(MaxWaitingTimeCallRule),
            life_time_rule: Arc::new(MaxLifeTimeCallRule),
            routing_rule: Arc::new(SimpleRoutingRule),
            identity: Arc::new(NoopIdentityResolver),
            printer: Arc::new(NoopTicketPrinter),
        }
    }

    pub fn with_identity_resolver(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_printer(mut self, printer: Arc<dyn TicketPrinter>) -> Self {
        self.printer = printer;
        self
    }

    pub fn with_call_rules(
        mut self,
        waiting_time: Arc<dyn CallRule>,
        life_time: Arc<dyn CallRule>,
    ) -> Self {
        self.waiting_time_rule = waiting_time;
        self.life_time_rule = life_time;
        self
    }

    pub fn with_routing_rule(mut self, routing: Arc<dyn RoutingRule>) -> Self {
        self.routing_rule = routing;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn branches(&self) -> &Arc<BranchRegistry> {
        &self.branches
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    pub(crate) fn branch_handle(
        &self,
        branch_id: &str,
    ) -> Result<Arc<Mutex<Branch>>> {
        self.branches.get(branch_id)
    }

    /// Flush the outbox, schedule its delayed notifications, and publish a
    /// business error for failed results (the 207 auto-call signal is
    /// control flow, not a failure).
    pub(crate) async fn finish<T>(&self, mut outbox: Outbox, result: Result<T>) -> Result<T> {
        self.publisher.flush(&mut outbox).await;
        self.notifier.schedule_all(std::mem::take(&mut outbox.delayed));
        if let Err(error) = &result {
            if !error.is_auto_call_armed() {
                warn!("💥 {}", error);
                self.publisher.business_error(error).await;
            }
        }
        result
    }

    /// Append a lifecycle event, reconcile branch collections, and queue the
    /// `VISIT_<KIND>` bus event.
    pub(crate) fn commit_event(
        &self,
        branch: &mut Branch,
        visit: &mut Visit,
        kind: VisitEventKind,
        params: HashMap<String, String>,
        position: QueuePosition,
        outbox: &mut Outbox,
    ) -> Result<()> {
        lifecycle::append_event(visit, kind, params.clone(), Utc::now())?;
        branch.sync_visit(visit, position)?;
        outbox.push_visit_event(kind, params, visit);
        Ok(())
    }

    /// Current index of the visit inside its ordered container, so an
    /// in-place update does not reshuffle the waiting line.
    pub(crate) fn position_of(&self, branch: &Branch, visit: &Visit) -> QueuePosition {
        let list = if let Some(queue_id) = &visit.queue_id {
            branch.queues.get(queue_id).map(|queue| &queue.visits)
        } else if let Some(pool_sp_id) = &visit.pool_service_point_id {
            branch.service_points.get(pool_sp_id).map(|sp| &sp.visits)
        } else if let Some(pool_user_id) = &visit.pool_user_id {
            branch.users.get(pool_user_id).map(|user| &user.visits)
        } else {
            None
        };
        list.and_then(|held| held.iter().position(|other| other.id == visit.id))
            .map(QueuePosition::At)
            .unwrap_or(QueuePosition::End)
    }

    /// Operator identity of a service point as event parameters; blank
    /// strings when unassigned.
    pub(crate) fn staff_params(branch: &Branch, service_point: &ServicePoint) -> (String, String, String) {
        match branch.operator_of(service_point) {
            Some(user) => (
                user.id.clone(),
                user.name.clone(),
                user.current_work_profile_id.clone().unwrap_or_default(),
            ),
            None => (String::new(), String::new(), String::new()),
        }
    }

    /// Attempt an auto-call for a visit that just entered a queue; errors
    /// are logged, never propagated to the triggering operation.
    pub(crate) async fn try_auto_call(&self, visit: &Visit) {
        let armed = self
            .branches
            .get(&visit.branch_id)
            .map(|handle| handle.lock().auto_call_mode())
            .unwrap_or(false);
        if !armed {
            return;
        }
        if let Err(error) = self.visit_auto_call(visit.clone()).await {
            debug!("🔕 Auto-call attempt for visit {} skipped: {}", visit.id, error);
        }
    }

    // ------------------------------------------------------------------
    // Listing & filtering
    // ------------------------------------------------------------------

    /// A visit by id, wherever it currently sits
    pub async fn get_visit(&self, branch_id: &str, visit_id: &str) -> Result<Visit> {
        let result = self.branch_handle(branch_id).and_then(|handle| {
            handle.lock().find_visit(visit_id).ok_or_else(|| {
                EngineError::not_found(format!("Visit {} not found", visit_id))
            })
        });
        self.finish(Outbox::new(), result).await
    }

    /// Visits waiting in a queue, cooldown-hidden entries excluded, ordered
    /// by ascending creation time, optionally truncated.
    pub async fn get_visits(
        &self,
        branch_id: &str,
        queue_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Visit>> {
        let result = self.branch_handle(branch_id).and_then(|handle| {
            let branch = handle.lock();
            let queue = branch.queues.get(queue_id).ok_or_else(|| {
                EngineError::not_found(format!("Queue {} not found in branch configuration", queue_id))
            })?;
            let now = Utc::now();
            let mut visits: Vec<Visit> = queue
                .visits
                .iter()
                .filter(|visit| !visit.in_cooldown(now))
                .cloned()
                .collect();
            visits.sort_by_key(|visit| visit.create_date_time);
            if let Some(limit) = limit {
                visits.truncate(limit);
            }
            Ok(visits)
        });
        self.finish(Outbox::new(), result).await
    }

    /// WAITING visits not inside a return cooldown
    pub async fn get_available_visits(
        &self,
        branch_id: &str,
        queue_id: &str,
    ) -> Result<Vec<Visit>> {
        let visits = self.get_visits(branch_id, queue_id, None).await?;
        let now = Utc::now();
        Ok(visits
            .into_iter()
            .filter(|visit| visit.status == VisitStatus::Waiting && !visit.in_return_cooldown(now))
            .collect())
    }

    /// Every visit currently held anywhere in the branch
    pub async fn get_all_visits(&self, branch_id: &str) -> Result<Vec<Visit>> {
        let result = self
            .branch_handle(branch_id)
            .map(|handle| handle.lock().all_visits());
        self.finish(Outbox::new(), result).await
    }

    /// Visits filtered by status
    pub async fn get_visits_by_status(
        &self,
        branch_id: &str,
        statuses: &[VisitStatus],
    ) -> Result<Vec<Visit>> {
        let result = self
            .branch_handle(branch_id)
            .map(|handle| handle.lock().visits_by_status(statuses));
        self.finish(Outbox::new(), result).await
    }

    // ------------------------------------------------------------------
    // Service point sessions
    // ------------------------------------------------------------------

    /// Log an operator into a service point
    pub async fn open_service_point(
        &self,
        branch_id: &str,
        service_point_id: &str,
        user: User,
    ) -> Result<ServicePoint> {
        let mut outbox = Outbox::new();
        let result = self.branch_handle(branch_id).and_then(|handle| {
            let mut branch = handle.lock();
            let service_point = branch.service_points.get(service_point_id).ok_or_else(|| {
                EngineError::not_found(format!(
                    "ServicePoint {} not found in {}",
                    service_point_id, branch.name
                ))
            })?;
            if let Some(current_user_id) = &service_point.user_id {
                if current_user_id != &user.id {
                    return Err(EngineError::conflict(format!(
                        "In servicePoint {} already {} logged in",
                        service_point_id, current_user_id
                    )));
                }
            }
            let mut user = user;
            user.service_point_id = Some(service_point_id.to_string());
            let user_id = user.id.clone();
            branch.users.insert(user_id.clone(), user);
            let service_point = branch
                .service_points
                .get_mut(service_point_id)
                .ok_or_else(|| {
                    EngineError::not_found(format!("ServicePoint {} not found", service_point_id))
                })?;
            service_point.user_id = Some(user_id);
            let snapshot = service_point.clone();

            let body = serde_json::to_value(&snapshot).unwrap_or(Value::Null);
            for topic in [TOPIC_ALL, TOPIC_STAT, TOPIC_FRONTEND] {
                outbox.push(
                    topic,
                    false,
                    Event::new("SERVICE_POINT_OPENED", HashMap::new(), body.clone()),
                );
            }
            info!("🪟 Service point {} opened", service_point_id);
            Ok(snapshot)
        });
        self.finish(outbox, result).await
    }

    /// Log the operator out of a service point; a visit still being served
    /// there is force-ended afterwards.
    pub async fn close_service_point(&self, branch_id: &str, service_point_id: &str) -> Result<()> {
        let mut outbox = Outbox::new();
        let mut had_visit = false;
        let result = self.branch_handle(branch_id).and_then(|handle| {
            let mut branch = handle.lock();
            let service_point = branch.service_points.get(service_point_id).ok_or_else(|| {
                EngineError::not_found(format!(
                    "ServicePoint {} not found in {}",
                    service_point_id, branch.name
                ))
            })?;
            let Some(user_id) = service_point.user_id.clone() else {
                return Err(EngineError::conflict(format!(
                    "ServicePoint {} already closed",
                    service_point_id
                )));
            };
            had_visit = service_point.current_visit.is_some();
            let body = serde_json::to_value(service_point).unwrap_or(Value::Null);

            if let Some(user) = branch.users.get_mut(&user_id) {
                user.service_point_id = None;
            }
            let service_point = branch
                .service_points
                .get_mut(service_point_id)
                .ok_or_else(|| {
                    EngineError::not_found(format!("ServicePoint {} not found", service_point_id))
                })?;
            service_point.user_id = None;
            for topic in [TOPIC_ALL, TOPIC_STAT, TOPIC_FRONTEND] {
                outbox.push(
                    topic,
                    false,
                    Event::new("SERVICE_POINT_CLOSED", HashMap::new(), body.clone()),
                );
            }
            info!("🪟 Service point {} closed", service_point_id);
            Ok(())
        });
        let result = self.finish(outbox, result).await;
        if result.is_ok() && had_visit {
            if let Err(error) = self
                .visit_end(branch_id, service_point_id, true, Some("SERVICE_POINT_CLOSED"))
                .await
            {
                warn!(
                    "💥 Ending visit on closed service point {} failed: {}",
                    service_point_id, error
                );
            }
        }
        result
    }
}
