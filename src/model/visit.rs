//! Visit: the unit of work flowing through a branch.
//!
//! A visit is pure data plus invariants. It is located in exactly one place
//! at a time (queue, service point, service-point pool, user pool) or
//! nowhere once terminal; the location fields on the visit are the source of
//! truth and the owning [`Branch`](crate::model::Branch) keeps its
//! collections in agreement via `sync_visit`.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::{VisitEventEntry, VisitEventKind};
use crate::model::Service;

/// Breadcrumb key: queue the visit last waited in
pub const LAST_QUEUE_ID: &str = "LastQueueId";
/// Breadcrumb key: service-point pool the visit last sat in
pub const LAST_POOL_SERVICE_POINT_ID: &str = "LastPoolServicePointId";
/// Breadcrumb key: user pool the visit last sat in
pub const LAST_POOL_USER_ID: &str = "LastPoolUserId";
/// Breadcrumb key: operator who last served the visit
pub const LAST_USER_ID: &str = "LastUserId";
/// Transient flag: visit was transferred to the front of its queue
pub const IS_TRANSFERRED_TO_START: &str = "isTransferredToStart";

/// Informational status tag, kept consistent with the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitStatus {
    Waiting,
    Called,
    StartServing,
    NoShow,
    Served,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Called => "CALLED",
            Self::StartServing => "START_SERVING",
            Self::NoShow => "NO_SHOW",
            Self::Served => "SERVED",
        }
    }
}

/// A customer's single pass through the branch's service process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub id: String,
    pub ticket: String,
    pub branch_id: String,
    pub branch_name: String,
    pub branch_prefix: String,
    pub branch_path: String,

    pub status: VisitStatus,

    // Location: at most one of these is set at a time
    pub queue_id: Option<String>,
    pub service_point_id: Option<String>,
    pub pool_service_point_id: Option<String>,
    pub pool_user_id: Option<String>,

    // Operator identity stamped on dispatch
    pub user_id: Option<String>,
    pub user_name: Option<String>,

    // Service progress; services here are deep copies of catalog entries
    pub current_service: Option<Service>,
    pub unserved_services: VecDeque<Service>,
    pub served_services: Vec<Service>,

    pub create_date_time: DateTime<Utc>,
    pub call_date_time: Option<DateTime<Utc>>,
    pub start_serving_date_time: Option<DateTime<Utc>>,
    pub served_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub return_date_time: Option<DateTime<Utc>>,
    pub transfer_date_time: Option<DateTime<Utc>>,

    /// Cooldown after a return, in seconds
    pub return_time_delay: Option<i64>,
    /// Cooldown after a transfer, in seconds
    pub transfer_time_delay: Option<i64>,

    /// Bookkeeping bag: `Last*` breadcrumbs and transient flags
    pub parameters: HashMap<String, String>,

    /// Audit trail: kind + timestamp + parameter snapshot per entry
    pub events: Vec<VisitEventEntry>,
    /// Event kinds only; used to validate the next legal transition
    pub visit_events: Vec<VisitEventKind>,
}

impl Visit {
    /// Create a blank visit for a branch
    pub fn new(branch_id: &str, branch_name: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ticket: String::new(),
            branch_id: branch_id.to_string(),
            branch_name: branch_name.to_string(),
            branch_prefix: String::new(),
            branch_path: String::new(),
            status: VisitStatus::Waiting,
            queue_id: None,
            service_point_id: None,
            pool_service_point_id: None,
            pool_user_id: None,
            user_id: None,
            user_name: None,
            current_service: None,
            unserved_services: VecDeque::new(),
            served_services: Vec::new(),
            create_date_time: Utc::now(),
            call_date_time: None,
            start_serving_date_time: None,
            served_date_time: None,
            end_date_time: None,
            return_date_time: None,
            transfer_date_time: None,
            return_time_delay: None,
            transfer_time_delay: None,
            parameters: HashMap::new(),
            events: Vec::new(),
            visit_events: Vec::new(),
        }
    }

    /// Number of location fields currently set; the invariant is ≤ 1
    pub fn location_count(&self) -> usize {
        [
            self.queue_id.is_some(),
            self.service_point_id.is_some(),
            self.pool_service_point_id.is_some(),
            self.pool_user_id.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Clear all four location fields
    pub fn clear_location(&mut self) {
        self.queue_id = None;
        self.service_point_id = None;
        self.pool_service_point_id = None;
        self.pool_user_id = None;
    }

    /// Record `Last*` breadcrumbs for whichever location is being vacated,
    /// then clear every location field.
    pub fn leave_location(&mut self) {
        if let Some(queue_id) = self.queue_id.take() {
            self.parameters.insert(LAST_QUEUE_ID.to_string(), queue_id);
        }
        if let Some(pool_sp_id) = self.pool_service_point_id.take() {
            self.parameters
                .insert(LAST_POOL_SERVICE_POINT_ID.to_string(), pool_sp_id);
        }
        if let Some(pool_user_id) = self.pool_user_id.take() {
            self.parameters
                .insert(LAST_POOL_USER_ID.to_string(), pool_user_id);
        }
        if let Some(user_id) = self.user_id.clone() {
            self.parameters.insert(LAST_USER_ID.to_string(), user_id);
        }
        self.service_point_id = None;
    }

    /// Seconds spent waiting since the most recent (re-)entry into a queue
    pub fn waiting_time(&self, now: DateTime<Utc>) -> i64 {
        let since = self
            .return_date_time
            .or(self.transfer_date_time)
            .unwrap_or(self.create_date_time);
        let until = self.start_serving_date_time.unwrap_or(now);
        (until - since).num_seconds()
    }

    /// Seconds elapsed since the visit was returned to a queue
    pub fn returning_time(&self, now: DateTime<Utc>) -> i64 {
        self.return_date_time
            .map(|returned| (now - returned).num_seconds())
            .unwrap_or(0)
    }

    /// Seconds elapsed since the visit was transferred
    pub fn transferring_time(&self, now: DateTime<Utc>) -> i64 {
        self.transfer_date_time
            .map(|transferred| (now - transferred).num_seconds())
            .unwrap_or(0)
    }

    /// Total seconds since creation (until end, when ended)
    pub fn visit_life_time(&self, now: DateTime<Utc>) -> i64 {
        let until = self.end_date_time.unwrap_or(now);
        (until - self.create_date_time).num_seconds()
    }

    /// Seconds spent being served
    pub fn serving_time(&self, now: DateTime<Utc>) -> i64 {
        let since = self.start_serving_date_time.unwrap_or(now);
        let until = self.served_date_time.unwrap_or(now);
        (until - since).num_seconds()
    }

    /// Whether the return cooldown window is still open
    pub fn in_return_cooldown(&self, now: DateTime<Utc>) -> bool {
        match (self.return_date_time, self.return_time_delay) {
            (Some(_), Some(delay)) => self.returning_time(now) < delay,
            _ => false,
        }
    }

    /// Whether the transfer cooldown window is still open
    pub fn in_transfer_cooldown(&self, now: DateTime<Utc>) -> bool {
        match (self.transfer_date_time, self.transfer_time_delay) {
            (Some(_), Some(delay)) => self.transferring_time(now) < delay,
            _ => false,
        }
    }

    /// Whether the visit is hidden by any active cooldown window
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.in_return_cooldown(now) || self.in_transfer_cooldown(now)
    }

    /// Consume the cooldown: called when a dispatch rule selects the visit
    pub fn clear_cooldown(&mut self) {
        self.return_date_time = None;
        self.transfer_date_time = None;
        self.parameters.remove(IS_TRANSFERRED_TO_START);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_visit_has_no_location() {
        let visit = Visit::new("branch-1", "Main");
        assert_eq!(visit.location_count(), 0);
        assert_eq!(visit.status, VisitStatus::Waiting);
        assert!(visit.events.is_empty());
    }

    #[test]
    fn test_leave_location_records_breadcrumbs() {
        let mut visit = Visit::new("branch-1", "Main");
        visit.queue_id = Some("q-1".to_string());
        visit.user_id = Some("u-1".to_string());
        visit.leave_location();

        assert_eq!(visit.location_count(), 0);
        assert_eq!(visit.parameters.get(LAST_QUEUE_ID), Some(&"q-1".to_string()));
        assert_eq!(visit.parameters.get(LAST_USER_ID), Some(&"u-1".to_string()));

        visit.pool_service_point_id = Some("sp-2".to_string());
        visit.leave_location();
        assert_eq!(
            visit.parameters.get(LAST_POOL_SERVICE_POINT_ID),
            Some(&"sp-2".to_string())
        );
    }

    #[test]
    fn test_cooldown_windows() {
        let now = Utc::now();
        let mut visit = Visit::new("branch-1", "Main");
        assert!(!visit.in_cooldown(now));

        visit.return_date_time = Some(now - Duration::seconds(10));
        visit.return_time_delay = Some(60);
        assert!(visit.in_return_cooldown(now));
        assert!(visit.in_cooldown(now));
        assert!(!visit.in_cooldown(now + Duration::seconds(60)));

        visit.clear_cooldown();
        assert!(!visit.in_cooldown(now));
    }

    #[test]
    fn test_waiting_time_prefers_return_timestamp() {
        let now = Utc::now();
        let mut visit = Visit::new("branch-1", "Main");
        visit.create_date_time = now - Duration::seconds(300);
        assert_eq!(visit.waiting_time(now), 300);

        visit.return_date_time = Some(now - Duration::seconds(30));
        assert_eq!(visit.waiting_time(now), 30);
    }
}
