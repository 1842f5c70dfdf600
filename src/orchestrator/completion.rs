//! Completion and abandonment: ending a visit, no-shows, cooldown-gated
//! returns and removal, plus mid-serving service bookkeeping.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::events::{Event, Outbox, REASON_RETURN_DELAY_FINISHED, TOPIC_ALL, TOPIC_FRONTEND, TOPIC_STAT};
use crate::lifecycle::VisitEventKind;
use crate::model::visit::LAST_QUEUE_ID;
use crate::model::{QueuePosition, Visit};

use super::core::VisitOrchestrator;

impl VisitOrchestrator {
    /// Finish serving the current service of the visit on a service point.
    ///
    /// With unserved services remaining, the next one becomes current and
    /// the visit returns to that service's own linked queue (front of the
    /// line). With none remaining the visit is fully closed.
    pub async fn visit_end(
        &self,
        branch_id: &str,
        service_point_id: &str,
        is_forced: bool,
        reason: Option<&str>,
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
            let (staff_id, staff_name, _) = Self::staff_params(&branch, &service_point);
            let now = Utc::now();

            visit.served_date_time = Some(now);
            if let Some(current) = visit.current_service.take() {
                visit.served_services.push(current);
            }

            let mut stop_params = HashMap::new();
            stop_params.insert("servicePointId".to_string(), service_point_id.to_string());
            stop_params.insert("branchId".to_string(), branch.id.clone());
            stop_params.insert("staffId".to_string(), staff_id.clone());
            stop_params.insert("staffName".to_string(), staff_name.clone());
            stop_params.insert("isForced".to_string(), is_forced.to_string());
            if let Some(reason) = reason {
                stop_params.insert("reason".to_string(), reason.to_string());
            }

            if let Some(next_service) = visit.unserved_services.pop_front() {
                // The next service's own linked queue, not the routing rule
                let queue_id = next_service.linked_queue_id.clone();
                if !branch.queues.contains_key(&queue_id) {
                    return Err(EngineError::not_found("Queue not found in branch configuration"));
                }
                visit.current_service = Some(next_service);
                visit.leave_location();
                visit.return_date_time = Some(now);
                visit.call_date_time = None;
                visit.start_serving_date_time = None;

                self.commit_event(
                    &mut branch,
                    &mut visit,
                    VisitEventKind::StopServing,
                    stop_params,
                    QueuePosition::End,
                    &mut outbox,
                )?;

                visit.queue_id = Some(queue_id.clone());
                let mut back_params = HashMap::new();
                back_params.insert("queueId".to_string(), queue_id);
                back_params.insert("servicePointId".to_string(), service_point_id.to_string());
                back_params.insert("branchId".to_string(), branch.id.clone());
                back_params.insert("staffId".to_string(), staff_id);
                back_params.insert("staffName".to_string(), staff_name);
                self.commit_event(
                    &mut branch,
                    &mut visit,
                    VisitEventKind::BackToQueue,
                    back_params,
                    QueuePosition::Start,
                    &mut outbox,
                )?;
            } else {
                visit.leave_location();
                visit.end_date_time = Some(now);

                self.commit_event(
                    &mut branch,
                    &mut visit,
                    VisitEventKind::StopServing,
                    stop_params,
                    QueuePosition::End,
                    &mut outbox,
                )?;

                let mut end_params = HashMap::new();
                end_params.insert("servicePointId".to_string(), service_point_id.to_string());
                end_params.insert("branchId".to_string(), branch.id.clone());
                self.commit_event(
                    &mut branch,
                    &mut visit,
                    VisitEventKind::End,
                    end_params,
                    QueuePosition::End,
                    &mut outbox,
                )?;
            }
            info!("🏁 Visit {} ended on service point {}", visit.id, service_point_id);
            Ok(visit)
        });
        let visit = self.finish(outbox, result).await?;
        if visit.queue_id.is_some() {
            self.try_auto_call(&visit).await;
        }
        Ok(visit)
    }

    /// Mark a called visit as a no-show
    pub async fn visit_no_show(
        &self,
        branch_id: &str,
        service_point_id: &str,
        visit_id: &str,
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
            let mut visit = branch
                .find_visit(visit_id)
                .ok_or_else(|| EngineError::not_found(format!("Visit {} not found", visit_id)))?;
            let (staff_id, staff_name, _) = Self::staff_params(&branch, &service_point);

            visit.clear_location();
            visit.call_date_time = None;
            visit.start_serving_date_time = None;

            let mut params = HashMap::new();
            params.insert("servicePointId".to_string(), service_point_id.to_string());
            params.insert("branchId".to_string(), branch.id.clone());
            params.insert("staffId".to_string(), staff_id);
            params.insert("staffName".to_string(), staff_name);
            self.commit_event(
                &mut branch,
                &mut visit,
                VisitEventKind::NoShow,
                params,
                QueuePosition::End,
                &mut outbox,
            )?;
            info!("👻 Visit {} marked as no-show", visit.id);
            Ok(visit)
        });
        self.finish(outbox, result).await
    }

    /// Stop serving and return the visit to the queue it last waited in.
    ///
    /// Conflict — with zero mutation — when the visit carries no
    /// `LastQueueId` breadcrumb. Starts a return cooldown of
    /// `delay_seconds` and schedules the matching `QUEUE_REFRESHED`
    /// notification.
    pub async fn stop_serving_and_back_to_queue(
        &self,
        branch_id: &str,
        service_point_id: &str,
        delay_seconds: i64,
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
            let queue_id = visit
                .parameters
                .get(LAST_QUEUE_ID)
                .cloned()
                .ok_or_else(|| EngineError::conflict("Visit can't be transferred: no last queue"))?;
            if !branch.queues.contains_key(&queue_id) {
                return Err(EngineError::not_found("Queue not found in branch configuration"));
            }
            let (staff_id, staff_name, _) = Self::staff_params(&branch, &service_point);
            let now = Utc::now();

            let mut stop_params = HashMap::new();
            stop_params.insert("servicePointId".to_string(), service_point_id.to_string());
            stop_params.insert("branchId".to_string(), branch.id.clone());
            stop_params.insert("staffId".to_string(), staff_id.clone());
            stop_params.insert("staffName".to_string(), staff_name.clone());
            stop_params.insert("isForced".to_string(), "false".to_string());

            visit.leave_location();
            visit.call_date_time = None;
            visit.start_serving_date_time = None;
            visit.return_date_time = Some(now);
            visit.return_time_delay = Some(delay_seconds);

            self.commit_event(
                &mut branch,
                &mut visit,
                VisitEventKind::StopServing,
                stop_params,
                QueuePosition::End,
                &mut outbox,
            )?;

            visit.queue_id = Some(queue_id.clone());
            let mut back_params = HashMap::new();
            back_params.insert("queueId".to_string(), queue_id.clone());
            back_params.insert("servicePointId".to_string(), service_point_id.to_string());
            back_params.insert("branchId".to_string(), branch.id.clone());
            back_params.insert("staffId".to_string(), staff_id);
            back_params.insert("staffName".to_string(), staff_name);
            self.commit_event(
                &mut branch,
                &mut visit,
                VisitEventKind::BackToQueue,
                back_params,
                QueuePosition::End,
                &mut outbox,
            )?;

            let mut refresh_params = HashMap::new();
            refresh_params.insert("branchId".to_string(), branch.id.clone());
            refresh_params.insert("queueId".to_string(), queue_id);
            outbox.push_delayed(
                TOPIC_FRONTEND,
                "QUEUE_REFRESHED",
                REASON_RETURN_DELAY_FINISHED,
                refresh_params,
                delay_seconds,
            );
            info!("↩️ Visit {} returned to its last queue", visit.id);
            Ok(visit)
        });
        let visit = self.finish(outbox, result).await?;
        self.try_auto_call(&visit).await;
        Ok(visit)
    }

    /// Delete a visit once its cooldown windows have elapsed
    pub async fn delete_visit(&self, branch_id: &str, visit_id: &str) -> Result<Visit> {
        let mut outbox = Outbox::new();
        let result = self.branch_handle(branch_id).and_then(|handle| {
            let mut branch = handle.lock();
            let mut visit = branch
                .find_visit(visit_id)
                .ok_or_else(|| EngineError::not_found(format!("Visit {} not found", visit_id)))?;
            let now = Utc::now();
            if visit.in_return_cooldown(now) {
                return Err(EngineError::conflict("You can't delete a just returned visit"));
            }
            if visit.in_transfer_cooldown(now) {
                return Err(EngineError::conflict("You can't delete a just transferred visit"));
            }

            visit.clear_location();
            let mut params = HashMap::new();
            params.insert("branchId".to_string(), branch.id.clone());
            self.commit_event(
                &mut branch,
                &mut visit,
                VisitEventKind::Deleted,
                params,
                QueuePosition::End,
                &mut outbox,
            )?;
            info!("🗑️ Visit {} deleted", visit.id);
            Ok(visit)
        });
        self.finish(outbox, result).await
    }

    /// Append another catalog service to the visit being served
    pub async fn add_service(
        &self,
        branch_id: &str,
        service_point_id: &str,
        service_id: &str,
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

            let already_attached = visit
                .current_service
                .as_ref()
                .map(|service| service.id == service_id)
                .unwrap_or(false)
                || visit.unserved_services.iter().any(|service| service.id == service_id)
                || visit.served_services.iter().any(|service| service.id == service_id);
            if already_attached {
                return Err(EngineError::conflict("Service already added"));
            }
            let service = branch
                .services
                .get(service_id)
                .cloned()
                .ok_or_else(|| {
                    EngineError::not_found(format!(
                        "Service {} not found in branch configuration",
                        service_id
                    ))
                })?;
            let (staff_id, staff_name, _) = Self::staff_params(&branch, &service_point);

            let mut params = HashMap::new();
            params.insert("servicePointId".to_string(), service_point_id.to_string());
            params.insert("serviceId".to_string(), service.id.clone());
            params.insert("serviceName".to_string(), service.name.clone());
            params.insert("branchId".to_string(), branch.id.clone());
            params.insert("staffId".to_string(), staff_id);
            params.insert("staffName".to_string(), staff_name);

            visit.unserved_services.push_back(service);
            self.commit_event(
                &mut branch,
                &mut visit,
                VisitEventKind::AddService,
                params,
                QueuePosition::End,
                &mut outbox,
            )?;
            debug!("➕ Service {} added to visit {}", service_id, visit.id);
            Ok(visit)
        });
        self.finish(outbox, result).await
    }

    /// Record an outcome on the visit's own copy of its current service
    pub async fn add_outcome(
        &self,
        branch_id: &str,
        service_point_id: &str,
        outcome_id: &str,
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
            let current = visit
                .current_service
                .as_mut()
                .ok_or_else(|| EngineError::not_found("Current service is null"))?;
            let outcome = current
                .possible_outcomes
                .get(outcome_id)
                .cloned()
                .ok_or_else(|| {
                    EngineError::conflict(format!(
                        "Current service can't add outcome with id {}",
                        outcome_id
                    ))
                })?;
            let outcome_name = outcome.name.clone();
            current.outcome = Some(outcome);

            let position = self.position_of(&branch, &visit);
            branch.sync_visit(&visit, position)?;

            let mut params = HashMap::new();
            params.insert("servicePointId".to_string(), service_point_id.to_string());
            params.insert("outcomeId".to_string(), outcome_id.to_string());
            params.insert("outcomeName".to_string(), outcome_name);
            params.insert("branchId".to_string(), branch.id.clone());
            let event = Event::new("SERVICE_OUTCOME_ADDED", params, serde_json::Value::Null);
            outbox.push(TOPIC_ALL, false, event.clone());
            outbox.push(TOPIC_STAT, false, event);
            Ok(visit)
        });
        self.finish(outbox, result).await
    }

    /// Record a delivered sub-service on the visit's own service copy
    pub async fn add_delivered_service(
        &self,
        branch_id: &str,
        service_point_id: &str,
        delivered_service_id: &str,
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
            let delivered = branch
                .delivered_services
                .get(delivered_service_id)
                .cloned()
                .ok_or_else(|| {
                    EngineError::not_found(format!(
                        "Delivered service with id {} not found",
                        delivered_service_id
                    ))
                })?;
            let current = visit
                .current_service
                .as_mut()
                .ok_or_else(|| EngineError::not_found("Current service is null"))?;
            if !delivered.service_ids.contains(&current.id) {
                return Err(EngineError::conflict(format!(
                    "Current service can't add delivered service with id {}",
                    delivered_service_id
                )));
            }
            let delivered_name = delivered.name.clone();
            current.delivered_services.push(delivered);

            let position = self.position_of(&branch, &visit);
            branch.sync_visit(&visit, position)?;

            let mut params = HashMap::new();
            params.insert("servicePointId".to_string(), service_point_id.to_string());
            params.insert("deliveredServiceId".to_string(), delivered_service_id.to_string());
            params.insert("deliveredServiceName".to_string(), delivered_name);
            params.insert("branchId".to_string(), branch.id.clone());
            let event = Event::new("DELIVERED_SERVICE_ADDED", params, serde_json::Value::Null);
            outbox.push(TOPIC_ALL, false, event.clone());
            outbox.push(TOPIC_STAT, false, event);
            Ok(visit)
        });
        self.finish(outbox, result).await
    }
}
