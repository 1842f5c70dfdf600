//! Visit intake: entry-point creation and service-point-originated
//! ("virtual") creation.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::events::Outbox;
use crate::lifecycle::VisitEventKind;
use crate::model::{Branch, QueuePosition, Service, Visit};

use super::core::VisitOrchestrator;

impl VisitOrchestrator {
    /// Create a visit at an entry point and place it into the queue the
    /// routing rule resolves for its primary service.
    ///
    /// Ticket format: queue prefix + zero-padded counter (`A` + 25 →
    /// `A025`). When `print_ticket` is set the printer collaborator runs
    /// after the branch lock is released; print failures are logged and
    /// swallowed.
    pub async fn create_visit(
        &self,
        branch_id: &str,
        entry_point_id: &str,
        service_ids: &[String],
        parameters: HashMap<String, String>,
        print_ticket: bool,
        rule_id: Option<&str>,
    ) -> Result<Visit> {
        let mut outbox = Outbox::new();
        let mut printer_id = None;
        let result = self.branch_handle(branch_id).and_then(|handle| {
            let mut branch = handle.lock();
            let visit = self.create_visit_locked(
                &mut branch,
                entry_point_id,
                service_ids,
                parameters,
                print_ticket,
                rule_id,
                &mut printer_id,
                &mut outbox,
            )?;
            Ok(visit)
        });
        let visit = self.finish(outbox, result).await?;

        if print_ticket {
            if let Some(printer_id) = printer_id {
                if let Err(error) = self.printer.print(&printer_id, &visit).await {
                    warn!("🖨️ Ticket print for visit {} failed: {}", visit.id, error);
                }
            }
        }
        info!("🎫 Visit {} created with ticket {}", visit.id, visit.ticket);
        self.try_auto_call(&visit).await;
        Ok(visit)
    }

    fn create_visit_locked(
        &self,
        branch: &mut Branch,
        entry_point_id: &str,
        service_ids: &[String],
        parameters: HashMap<String, String>,
        print_ticket: bool,
        rule_id: Option<&str>,
        printer_id: &mut Option<String>,
        outbox: &mut Outbox,
    ) -> Result<Visit> {
        let services = Self::copy_services(branch, service_ids)?;
        let entry_point = branch
            .entry_points
            .get(entry_point_id)
            .ok_or_else(|| {
                EngineError::not_found("EntryPoint not found in branch configuration")
            })?
            .clone();
        *printer_id = entry_point.printer_id.clone();

        let mut visit = Self::blank_visit(branch, services, parameters);

        let queue_id = self
            .routing_rule
            .target_queue(&visit, branch, rule_id)?
            .ok_or_else(|| {
                EngineError::invalid_input("No queue resolved for the requested service")
            })?;
        let queue = branch
            .queues
            .get(&queue_id)
            .ok_or_else(|| EngineError::not_found("Queue not found in branch configuration"))?;
        let ticket_prefix = queue.ticket_prefix.clone();

        let counter = branch.increment_ticket_counter(&queue_id)?;
        visit.ticket = format!(
            "{}{:0width$}",
            ticket_prefix,
            counter,
            width = self.config().general.ticket_number_width
        );
        visit.queue_id = Some(queue_id.clone());

        let service_id = visit
            .current_service
            .as_ref()
            .map(|service| service.id.clone())
            .unwrap_or_default();
        let service_name = visit
            .current_service
            .as_ref()
            .map(|service| service.name.clone())
            .unwrap_or_default();

        let mut created_params = HashMap::new();
        created_params.insert("channel".to_string(), "entryPoint".to_string());
        created_params.insert("entryPointId".to_string(), entry_point.id.clone());
        created_params.insert("entryPointName".to_string(), entry_point.name.clone());
        created_params.insert("serviceId".to_string(), service_id.clone());
        created_params.insert("serviceName".to_string(), service_name.clone());
        if let Some(printer) = &entry_point.printer_id {
            if print_ticket {
                created_params.insert("printerId".to_string(), printer.clone());
            }
        }
        self.commit_event(
            branch,
            &mut visit,
            VisitEventKind::Created,
            created_params,
            QueuePosition::End,
            outbox,
        )?;

        let mut queue_params = HashMap::new();
        queue_params.insert("queueId".to_string(), queue_id);
        queue_params.insert("serviceId".to_string(), service_id);
        queue_params.insert("serviceName".to_string(), service_name);
        self.commit_event(
            branch,
            &mut visit,
            VisitEventKind::PlacedInQueue,
            queue_params,
            QueuePosition::End,
            outbox,
        )?;
        Ok(visit)
    }

    /// Service-point-originated intake: the visit skips the queue entirely
    /// and lands on the service point already being served.
    pub async fn create_virtual_visit(
        &self,
        branch_id: &str,
        service_point_id: &str,
        service_ids: &[String],
        parameters: HashMap<String, String>,
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
            let services = Self::copy_services(&branch, service_ids)?;
            let mut visit = Self::blank_visit(&branch, services, parameters);
            let (staff_id, staff_name, work_profile_id) =
                Self::staff_params(&branch, &service_point);
            if !staff_id.is_empty() {
                visit.user_id = Some(staff_id.clone());
                visit.user_name = Some(staff_name.clone());
            }

            let now = Utc::now();
            let service_id = visit
                .current_service
                .as_ref()
                .map(|service| service.id.clone())
                .unwrap_or_default();
            let mut created_params = HashMap::new();
            created_params.insert("channel".to_string(), "servicePoint".to_string());
            created_params.insert("servicePointId".to_string(), service_point_id.to_string());
            created_params.insert("serviceId".to_string(), service_id.clone());
            created_params.insert("staffId".to_string(), staff_id.clone());
            created_params.insert("staffName".to_string(), staff_name.clone());
            self.commit_event(
                &mut branch,
                &mut visit,
                VisitEventKind::Created,
                created_params,
                QueuePosition::End,
                &mut outbox,
            )?;

            visit.call_date_time = Some(now);
            let mut called_params = HashMap::new();
            called_params.insert("servicePointId".to_string(), service_point_id.to_string());
            called_params.insert("staffId".to_string(), staff_id.clone());
            called_params.insert("staffName".to_string(), staff_name.clone());
            called_params.insert("workProfileId".to_string(), work_profile_id.clone());
            self.commit_event(
                &mut branch,
                &mut visit,
                VisitEventKind::Called,
                called_params,
                QueuePosition::End,
                &mut outbox,
            )?;

            visit.service_point_id = Some(service_point_id.to_string());
            visit.start_serving_date_time = Some(now);
            let mut serving_params = HashMap::new();
            serving_params.insert("servicePointId".to_string(), service_point_id.to_string());
            serving_params.insert("serviceId".to_string(), service_id);
            serving_params.insert("staffId".to_string(), staff_id);
            serving_params.insert("staffName".to_string(), staff_name);
            serving_params.insert("workProfileId".to_string(), work_profile_id);
            self.commit_event(
                &mut branch,
                &mut visit,
                VisitEventKind::StartServing,
                serving_params,
                QueuePosition::End,
                &mut outbox,
            )?;
            info!(
                "🎫 Virtual visit {} started on service point {}",
                visit.id, service_point_id
            );
            Ok(visit)
        });
        self.finish(outbox, result).await
    }

    /// Deep-copy the requested services out of the branch catalog: the
    /// first becomes the current service, the rest stay unserved in order.
    fn copy_services(branch: &Branch, service_ids: &[String]) -> Result<Vec<Service>> {
        if service_ids.is_empty() {
            return Err(EngineError::not_found("Services can not be empty"));
        }
        service_ids
            .iter()
            .map(|service_id| {
                branch.services.get(service_id).cloned().ok_or_else(|| {
                    EngineError::not_found(format!(
                        "Service {} not found in branch configuration",
                        service_id
                    ))
                })
            })
            .collect()
    }

    fn blank_visit(
        branch: &Branch,
        mut services: Vec<Service>,
        parameters: HashMap<String, String>,
    ) -> Visit {
        let mut visit = Visit::new(&branch.id, &branch.name);
        visit.branch_prefix = branch.prefix.clone();
        visit.branch_path = branch.path.clone();
        visit.current_service = Some(services.remove(0));
        visit.unserved_services = services.into();
        visit.parameters = parameters;
        visit
    }
}
