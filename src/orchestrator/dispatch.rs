//! Call, confirm and auto-call flows.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::events::{Event, Outbox, TOPIC_FRONTEND};
use crate::lifecycle::VisitEventKind;
use crate::model::visit::IS_TRANSFERRED_TO_START;
use crate::model::{Branch, QueuePosition, Visit};
use crate::routing::CallRule;

use super::core::VisitOrchestrator;

impl VisitOrchestrator {
    /// Call a specific visit to a service point and start serving it.
    ///
    /// The visit leaves whichever queue or pool it sat in (breadcrumbs
    /// recorded), the operator's identity is stamped onto it, and `Called`
    /// then `StartServing` are appended, both tagged with `call_method`.
    pub async fn visit_call(
        &self,
        branch_id: &str,
        service_point_id: &str,
        visit_id: &str,
        call_method: &str,
    ) -> Result<Visit> {
        let mut outbox = Outbox::new();
        let result = self.branch_handle(branch_id).and_then(|handle| {
            let mut branch = handle.lock();
            self.visit_call_locked(&mut branch, service_point_id, visit_id, call_method, &mut outbox)
        });
        self.finish(outbox, result).await
    }

    pub(crate) fn visit_call_locked(
        &self,
        branch: &mut Branch,
        service_point_id: &str,
        visit_id: &str,
        call_method: &str,
        outbox: &mut Outbox,
    ) -> Result<Visit> {
        let service_point = branch
            .service_points
            .get(service_point_id)
            .ok_or_else(|| {
                EngineError::not_found("ServicePoint not found in branch configuration")
            })?
            .clone();
        if !service_point.is_idle() {
            return Err(EngineError::conflict(format!(
                "Visit already called in the ServicePoint {}",
                service_point_id
            )));
        }
        let mut visit = branch
            .find_visit(visit_id)
            .ok_or_else(|| EngineError::not_found(format!("Visit {} not found", visit_id)))?;

        let (staff_id, staff_name, work_profile_id) = Self::staff_params(branch, &service_point);
        let left_queue_id = visit.queue_id.clone();

        visit.leave_location();
        visit.clear_cooldown();
        visit.user_id = (!staff_id.is_empty()).then(|| staff_id.clone());
        visit.user_name = (!staff_name.is_empty()).then(|| staff_name.clone());
        visit.call_date_time = Some(Utc::now());
        visit.service_point_id = Some(service_point_id.to_string());

        let mut called_params = HashMap::new();
        called_params.insert("servicePointId".to_string(), service_point_id.to_string());
        called_params.insert("queueId".to_string(), left_queue_id.unwrap_or_default());
        called_params.insert("branchId".to_string(), branch.id.clone());
        called_params.insert("staffId".to_string(), staff_id.clone());
        called_params.insert("staffName".to_string(), staff_name.clone());
        called_params.insert("workProfileId".to_string(), work_profile_id.clone());
        called_params.insert("callMethod".to_string(), call_method.to_string());
        self.commit_event(
            branch,
            &mut visit,
            VisitEventKind::Called,
            called_params,
            QueuePosition::End,
            outbox,
        )?;

        visit.start_serving_date_time = Some(Utc::now());
        let mut serving_params = HashMap::new();
        serving_params.insert("servicePointId".to_string(), service_point_id.to_string());
        serving_params.insert("branchId".to_string(), branch.id.clone());
        serving_params.insert("staffId".to_string(), staff_id);
        serving_params.insert("staffName".to_string(), staff_name);
        serving_params.insert("workProfileId".to_string(), work_profile_id);
        serving_params.insert("callMethod".to_string(), call_method.to_string());
        self.commit_event(
            branch,
            &mut visit,
            VisitEventKind::StartServing,
            serving_params,
            QueuePosition::End,
            outbox,
        )?;
        info!(
            "📣 Visit {} called to service point {} ({})",
            visit.id, service_point_id, call_method
        );
        Ok(visit)
    }

    /// Call the next visit by longest waiting time
    pub async fn visit_call_with_maximal_waiting_time(
        &self,
        branch_id: &str,
        service_point_id: &str,
    ) -> Result<Option<Visit>> {
        let rule = self.waiting_time_rule.clone();
        self.call_next(branch_id, service_point_id, rule, None, false).await
    }

    /// Call the next visit by longest waiting time, narrowed to queues
    pub async fn visit_call_with_maximal_waiting_time_from_queues(
        &self,
        branch_id: &str,
        service_point_id: &str,
        queue_ids: &[String],
    ) -> Result<Option<Visit>> {
        let rule = self.waiting_time_rule.clone();
        self.call_next(branch_id, service_point_id, rule, Some(queue_ids), false)
            .await
    }

    /// Call the next visit closest to its SLA deadline
    pub async fn visit_call_with_max_life_time(
        &self,
        branch_id: &str,
        service_point_id: &str,
    ) -> Result<Option<Visit>> {
        let rule = self.life_time_rule.clone();
        self.call_next(branch_id, service_point_id, rule, None, false).await
    }

    /// Call the next visit closest to its SLA deadline, narrowed to queues
    pub async fn visit_call_with_max_life_time_from_queues(
        &self,
        branch_id: &str,
        service_point_id: &str,
        queue_ids: &[String],
    ) -> Result<Option<Visit>> {
        let rule = self.life_time_rule.clone();
        self.call_next(branch_id, service_point_id, rule, Some(queue_ids), false)
            .await
    }

    /// Confirm-gated variant: candidate selection identical to the direct
    /// call, but only `Called` is appended and the visit stays put until
    /// [`visit_confirm`](Self::visit_confirm).
    pub async fn visit_call_for_confirm_with_maximal_waiting_time(
        &self,
        branch_id: &str,
        service_point_id: &str,
    ) -> Result<Option<Visit>> {
        let rule = self.waiting_time_rule.clone();
        self.call_next(branch_id, service_point_id, rule, None, true).await
    }

    /// Confirm-gated variant, narrowed to queues
    pub async fn visit_call_for_confirm_with_maximal_waiting_time_from_queues(
        &self,
        branch_id: &str,
        service_point_id: &str,
        queue_ids: &[String],
    ) -> Result<Option<Visit>> {
        let rule = self.waiting_time_rule.clone();
        self.call_next(branch_id, service_point_id, rule, Some(queue_ids), true)
            .await
    }

    /// Confirm-gated variant of the SLA-deadline call
    pub async fn visit_call_for_confirm_with_max_life_time(
        &self,
        branch_id: &str,
        service_point_id: &str,
    ) -> Result<Option<Visit>> {
        let rule = self.life_time_rule.clone();
        self.call_next(branch_id, service_point_id, rule, None, true).await
    }

    /// Confirm-gated variant of the SLA-deadline call, narrowed to queues
    pub async fn visit_call_for_confirm_with_max_life_time_from_queues(
        &self,
        branch_id: &str,
        service_point_id: &str,
        queue_ids: &[String],
    ) -> Result<Option<Visit>> {
        let rule = self.life_time_rule.clone();
        self.call_next(branch_id, service_point_id, rule, Some(queue_ids), true)
            .await
    }

    async fn call_next(
        &self,
        branch_id: &str,
        service_point_id: &str,
        rule: std::sync::Arc<dyn CallRule>,
        queue_ids: Option<&[String]>,
        confirm: bool,
    ) -> Result<Option<Visit>> {
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
            if branch.operator_of(&service_point).is_none() {
                return Err(EngineError::forbidden(format!(
                    "No user logged in into service point {}",
                    service_point_id
                )));
            }
            if !service_point.is_idle() {
                // Busy point: empty result, no side effect
                return Ok(None);
            }

            let candidate = rule.select(&branch, &service_point, queue_ids)?;
            match candidate {
                Some(candidate) => {
                    let call_method = self.config().dispatch.call_next_method.clone();
                    let visit = if confirm {
                        self.call_for_confirm_locked(
                            &mut branch,
                            service_point_id,
                            &candidate.id,
                            &call_method,
                            &mut outbox,
                        )?
                    } else {
                        self.visit_call_locked(
                            &mut branch,
                            service_point_id,
                            &candidate.id,
                            &call_method,
                            &mut outbox,
                        )?
                    };
                    Ok(Some(visit))
                }
                None => {
                    if branch.auto_call_mode() {
                        self.arm_service_point(&mut branch, service_point_id, &mut outbox)?;
                        Err(EngineError::AutoCallArmed(format!(
                            "No visit available, auto-call armed on {}",
                            service_point_id
                        )))
                    } else {
                        Ok(None)
                    }
                }
            }
        });
        self.finish(outbox, result).await
    }

    fn arm_service_point(
        &self,
        branch: &mut Branch,
        service_point_id: &str,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let service_point = branch
            .service_points
            .get_mut(service_point_id)
            .ok_or_else(|| {
                EngineError::not_found("ServicePoint not found in branch configuration")
            })?;
        service_point.auto_call_mode = true;
        let mut params = HashMap::new();
        params.insert("branchId".to_string(), branch.id.clone());
        params.insert("servicePointId".to_string(), service_point_id.to_string());
        outbox.push(
            TOPIC_FRONTEND,
            false,
            Event::new("AUTOCALL_MODE_TURN_ON", params, serde_json::Value::Null),
        );
        debug!("🔔 Auto-call armed on service point {}", service_point_id);
        Ok(())
    }

    /// Append `Called` without moving the visit; the hand-off waits for
    /// confirmation.
    fn call_for_confirm_locked(
        &self,
        branch: &mut Branch,
        service_point_id: &str,
        visit_id: &str,
        call_method: &str,
        outbox: &mut Outbox,
    ) -> Result<Visit> {
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
        let (staff_id, staff_name, _) = Self::staff_params(branch, &service_point);

        visit.call_date_time = Some(Utc::now());
        visit.clear_cooldown();
        visit.parameters.remove(IS_TRANSFERRED_TO_START);

        let position = self.position_of(branch, &visit);
        let mut params = HashMap::new();
        params.insert("servicePointId".to_string(), service_point_id.to_string());
        params.insert("branchId".to_string(), branch.id.clone());
        params.insert("queueId".to_string(), visit.queue_id.clone().unwrap_or_default());
        params.insert("staffId".to_string(), staff_id);
        params.insert("staffName".to_string(), staff_name);
        params.insert("callMethod".to_string(), call_method.to_string());
        self.commit_event(branch, &mut visit, VisitEventKind::Called, params, position, outbox)?;
        Ok(visit)
    }

    /// Complete a pending confirm: the visit leaves its location and lands
    /// on the service point with a single `StartServing`.
    pub async fn visit_confirm(
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
            if !service_point.is_idle() {
                return Err(EngineError::conflict(format!(
                    "Visit already called in the ServicePoint {}",
                    service_point_id
                )));
            }
            let mut visit = branch
                .find_visit(visit_id)
                .ok_or_else(|| EngineError::not_found(format!("Visit {} not found", visit_id)))?;
            let (staff_id, staff_name, _) = Self::staff_params(&branch, &service_point);

            visit.leave_location();
            visit.user_id = (!staff_id.is_empty()).then(|| staff_id.clone());
            visit.user_name = (!staff_name.is_empty()).then(|| staff_name.clone());
            visit.service_point_id = Some(service_point_id.to_string());
            visit.start_serving_date_time = Some(Utc::now());

            let mut params = HashMap::new();
            params.insert("servicePointId".to_string(), service_point_id.to_string());
            params.insert("branchId".to_string(), branch.id.clone());
            params.insert(
                "serviceId".to_string(),
                visit
                    .current_service
                    .as_ref()
                    .map(|service| service.id.clone())
                    .unwrap_or_default(),
            );
            params.insert("staffId".to_string(), staff_id);
            params.insert("staffName".to_string(), staff_name);
            self.commit_event(
                &mut branch,
                &mut visit,
                VisitEventKind::StartServing,
                params,
                QueuePosition::End,
                &mut outbox,
            )?;
            info!("✅ Visit {} confirmed on service point {}", visit.id, service_point_id);
            Ok(visit)
        });
        self.finish(outbox, result).await
    }

    /// Repeat the call announcement for a pending confirm (cherry-pick)
    pub async fn visit_recall_for_confirm(
        &self,
        branch_id: &str,
        service_point_id: &str,
        visit_id: &str,
    ) -> Result<Visit> {
        let mut outbox = Outbox::new();
        let result = self.branch_handle(branch_id).and_then(|handle| {
            let mut branch = handle.lock();
            self.call_for_confirm_locked(
                &mut branch,
                service_point_id,
                visit_id,
                "cherryPick",
                &mut outbox,
            )
        });
        self.finish(outbox, result).await
    }

    /// Auto-call a visit that just entered a queue under branch auto-call
    /// mode.
    ///
    /// The chosen service point is disarmed after the attempt whether or
    /// not it produced a hand-off. When no eligible idle armed point
    /// exists, every flag stays as it was and the visit is returned
    /// unchanged.
    pub async fn visit_auto_call(&self, visit: Visit) -> Result<Visit> {
        let mut outbox = Outbox::new();
        let result = self.branch_handle(&visit.branch_id).and_then(|handle| {
            let mut branch = handle.lock();
            let eligible = self
                .waiting_time_rule
                .available_service_points(&branch, &visit);
            let Some(service_point_id) = eligible.first().cloned() else {
                return Ok(visit.clone());
            };
            let confirm_required = branch
                .service_points
                .get(&service_point_id)
                .map(|sp| sp.confirm_required)
                .unwrap_or(false);

            let attempt = if confirm_required {
                self.call_for_confirm_locked(
                    &mut branch,
                    &service_point_id,
                    &visit.id,
                    "autoCall",
                    &mut outbox,
                )
            } else {
                self.visit_call_locked(
                    &mut branch,
                    &service_point_id,
                    &visit.id,
                    "autoCall",
                    &mut outbox,
                )
            };

            // One-shot: disarm regardless of how the attempt went
            if let Some(service_point) = branch.service_points.get_mut(&service_point_id) {
                service_point.auto_call_mode = false;
            }
            attempt
        });
        self.finish(outbox, result).await
    }
}
