//! # Branch Domain Model
//!
//! The [`Branch`] aggregate and its sub-resources: queues, service points,
//! services, work profiles, users, entry points and segmentation rules. The
//! branch is the only mutable shared state in the engine; it exclusively
//! owns its collections, while a [`Visit`] is referenced by whichever
//! collection currently holds it. The visit's own location fields are the
//! source of truth and [`Branch::sync_visit`] keeps container placement in
//! agreement with them.

pub mod visit;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
pub use visit::{Visit, VisitStatus};

/// Where to insert a visit into an ordered waiting list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    /// Front of the list (placed-at-start semantics)
    Start,
    /// Back of the list
    End,
    /// Explicit index
    At(usize),
}

impl Default for QueuePosition {
    fn default() -> Self {
        Self::End
    }
}

/// A waiting line with its own ticket counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub id: String,
    pub name: String,
    /// Ticket letter, e.g. `A`
    pub ticket_prefix: String,
    /// Service level agreement for this queue, in seconds
    pub sla_seconds: i64,
    /// Monotonic ticket counter, branch-scoped
    pub ticket_counter: u32,
    /// Ordered list of waiting visits
    pub visits: Vec<Visit>,
}

impl Queue {
    pub fn new(id: &str, name: &str, ticket_prefix: &str, sla_seconds: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            ticket_prefix: ticket_prefix.to_string(),
            sla_seconds,
            ticket_counter: 0,
            visits: Vec::new(),
        }
    }
}

/// A worker/window that serves one visit at a time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePoint {
    pub id: String,
    pub name: String,
    /// Operator currently logged in, by user id
    pub user_id: Option<String>,
    /// Visit currently being served (at most one)
    pub current_visit: Option<Visit>,
    /// Per-service-point holding pool
    pub visits: Vec<Visit>,
    /// One-shot auto-call arming flag
    pub auto_call_mode: bool,
    /// Whether a call must be confirmed before the hand-off
    pub confirm_required: bool,
}

impl ServicePoint {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            user_id: None,
            current_visit: None,
            visits: Vec::new(),
            auto_call_mode: false,
            confirm_required: false,
        }
    }

    /// Idle means no visit is currently being served here
    pub fn is_idle(&self) -> bool {
        self.current_visit.is_none()
    }
}

/// An operator account known to the branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub current_work_profile_id: Option<String>,
    /// Service point the operator is bound to, when logged in
    pub service_point_id: Option<String>,
    /// Personal holding pool
    pub visits: Vec<Visit>,
}

impl User {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            current_work_profile_id: None,
            service_point_id: None,
            visits: Vec::new(),
        }
    }
}

/// Set of queues an operator bound to this profile may pull from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkProfile {
    pub id: String,
    pub name: String,
    pub queue_ids: Vec<String>,
}

impl WorkProfile {
    pub fn new(id: &str, name: &str, queue_ids: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            queue_ids,
        }
    }
}

/// Recorded result of a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub name: String,
}

/// A sub-service delivered while serving a visit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredService {
    pub id: String,
    pub name: String,
    /// Services this delivered service may be attached to
    pub service_ids: Vec<String>,
    pub outcome: Option<Outcome>,
}

/// Catalog entry describing a service the branch offers.
///
/// Copies of this struct travel on visits; mutating a visit's copy
/// (outcome, delivered sub-services) never touches the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    /// Normative serving time, in seconds
    pub serving_sl: i64,
    /// Queue this service funnels into when no segmentation rule applies
    pub linked_queue_id: String,
    pub is_available: bool,
    pub possible_outcomes: HashMap<String, Outcome>,
    pub outcome: Option<Outcome>,
    pub delivered_services: Vec<DeliveredService>,
}

impl Service {
    pub fn new(id: &str, name: &str, serving_sl: i64, linked_queue_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            serving_sl,
            linked_queue_id: linked_queue_id.to_string(),
            is_available: true,
            possible_outcomes: HashMap::new(),
            outcome: None,
            delivered_services: Vec::new(),
        }
    }
}

/// Intake kiosk/terminal the visit was created from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPoint {
    pub id: String,
    pub name: String,
    pub printer_id: Option<String>,
}

impl EntryPoint {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            printer_id: None,
        }
    }
}

/// Maps a set of visit parameters onto a target queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationRuleData {
    pub id: String,
    pub name: String,
    pub queue_id: String,
    /// All entries must be present in the visit's parameter bag to match
    pub visit_property: HashMap<String, String>,
}

/// Aggregate root owning every sub-resource of one physical branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub name: String,
    pub prefix: String,
    pub path: String,

    /// Branch-wide settings, including the `autoCallMode` toggle
    pub parameters: HashMap<String, String>,

    pub queues: HashMap<String, Queue>,
    pub service_points: HashMap<String, ServicePoint>,
    pub services: HashMap<String, Service>,
    pub work_profiles: HashMap<String, WorkProfile>,
    pub users: HashMap<String, User>,
    pub entry_points: HashMap<String, EntryPoint>,
    pub segmentation_rules: HashMap<String, SegmentationRuleData>,
    pub delivered_services: HashMap<String, DeliveredService>,

    /// Reception/printer descriptor; consumed by the printer collaborator
    pub reception_printer_id: Option<String>,
}

impl Branch {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            prefix: String::new(),
            path: String::new(),
            parameters: HashMap::new(),
            queues: HashMap::new(),
            service_points: HashMap::new(),
            services: HashMap::new(),
            work_profiles: HashMap::new(),
            users: HashMap::new(),
            entry_points: HashMap::new(),
            segmentation_rules: HashMap::new(),
            delivered_services: HashMap::new(),
            reception_printer_id: None,
        }
    }

    /// Branch-wide auto-call toggle
    pub fn auto_call_mode(&self) -> bool {
        self.parameters
            .get("autoCallMode")
            .map(|value| value == "true")
            .unwrap_or(false)
    }

    pub fn set_auto_call_mode(&mut self, enabled: bool) {
        self.parameters
            .insert("autoCallMode".to_string(), enabled.to_string());
    }

    /// Operator currently logged into the service point
    pub fn operator_of(&self, service_point: &ServicePoint) -> Option<&User> {
        service_point
            .user_id
            .as_ref()
            .and_then(|user_id| self.users.get(user_id))
    }

    /// Queue ids reachable through the service point operator's work profile
    pub fn reachable_queue_ids(&self, service_point: &ServicePoint) -> Vec<String> {
        let Some(user) = self.operator_of(service_point) else {
            return Vec::new();
        };
        let Some(profile_id) = user.current_work_profile_id.as_ref() else {
            return Vec::new();
        };
        self.work_profiles
            .get(profile_id)
            .map(|profile| profile.queue_ids.clone())
            .unwrap_or_default()
    }

    /// Increment the ticket counter of a queue, atomically under the branch
    /// lock, and return the new value.
    pub fn increment_ticket_counter(&mut self, queue_id: &str) -> Result<u32> {
        let queue = self
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| EngineError::not_found(format!("Queue {} not found", queue_id)))?;
        queue.ticket_counter += 1;
        Ok(queue.ticket_counter)
    }

    /// All visits currently held anywhere in the branch
    pub fn all_visits(&self) -> Vec<Visit> {
        let mut visits = Vec::new();
        for queue in self.queues.values() {
            visits.extend(queue.visits.iter().cloned());
        }
        for service_point in self.service_points.values() {
            if let Some(current) = &service_point.current_visit {
                visits.push(current.clone());
            }
            visits.extend(service_point.visits.iter().cloned());
        }
        for user in self.users.values() {
            visits.extend(user.visits.iter().cloned());
        }
        visits
    }

    /// Find a visit by id wherever it currently sits
    pub fn find_visit(&self, visit_id: &str) -> Option<Visit> {
        self.all_visits().into_iter().find(|visit| visit.id == visit_id)
    }

    /// Visits filtered by status
    pub fn visits_by_status(&self, statuses: &[VisitStatus]) -> Vec<Visit> {
        self.all_visits()
            .into_iter()
            .filter(|visit| statuses.contains(&visit.status))
            .collect()
    }

    /// Reconcile container placement with the visit's location fields.
    ///
    /// The visit is removed from every collection, then re-inserted into
    /// exactly the one its location names (at `position` for ordered
    /// lists). A visit with no location ends up in no collection. Putting a
    /// visit onto a service point that is already serving a different visit
    /// is a conflict.
    pub fn sync_visit(&mut self, visit: &Visit, position: QueuePosition) -> Result<()> {
        for queue in self.queues.values_mut() {
            queue.visits.retain(|held| held.id != visit.id);
        }
        for service_point in self.service_points.values_mut() {
            if service_point
                .current_visit
                .as_ref()
                .map(|held| held.id == visit.id)
                .unwrap_or(false)
            {
                service_point.current_visit = None;
            }
            service_point.visits.retain(|held| held.id != visit.id);
        }
        for user in self.users.values_mut() {
            user.visits.retain(|held| held.id != visit.id);
        }

        if let Some(queue_id) = &visit.queue_id {
            let queue = self
                .queues
                .get_mut(queue_id)
                .ok_or_else(|| EngineError::not_found(format!("Queue {} not found", queue_id)))?;
            insert_visit(&mut queue.visits, visit.clone(), position)?;
        } else if let Some(sp_id) = &visit.service_point_id {
            let service_point = self.service_points.get_mut(sp_id).ok_or_else(|| {
                EngineError::not_found(format!("ServicePoint {} not found", sp_id))
            })?;
            if let Some(current) = &service_point.current_visit {
                if current.id != visit.id {
                    return Err(EngineError::conflict(format!(
                        "In ServicePoint {} already exists visit {}",
                        sp_id, current.id
                    )));
                }
            }
            service_point.current_visit = Some(visit.clone());
        } else if let Some(pool_sp_id) = &visit.pool_service_point_id {
            let service_point = self.service_points.get_mut(pool_sp_id).ok_or_else(|| {
                EngineError::not_found(format!("ServicePoint {} not found", pool_sp_id))
            })?;
            insert_visit(&mut service_point.visits, visit.clone(), position)?;
        } else if let Some(pool_user_id) = &visit.pool_user_id {
            let user = self.users.get_mut(pool_user_id).ok_or_else(|| {
                EngineError::not_found(format!("User {} not found", pool_user_id))
            })?;
            insert_visit(&mut user.visits, visit.clone(), position)?;
        }
        Ok(())
    }
}

fn insert_visit(list: &mut Vec<Visit>, visit: Visit, position: QueuePosition) -> Result<()> {
    match position {
        QueuePosition::Start => list.insert(0, visit),
        QueuePosition::End => list.push(visit),
        QueuePosition::At(index) => {
            if index > list.len() {
                return Err(EngineError::conflict(format!(
                    "Visit position {} out of range of list range {}",
                    index,
                    list.len()
                )));
            }
            list.insert(index, visit);
        }
    }
    Ok(())
}
