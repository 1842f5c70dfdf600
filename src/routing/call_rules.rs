//! Call rule implementations: oldest-waiting-first and SLA-deadline-first.

use chrono::{DateTime, Duration, Utc};

use crate::error::{EngineError, Result};
use crate::model::{Branch, Queue, ServicePoint, Visit, VisitStatus};

use super::CallRule;

/// Waiting visits in the given queues that a rule may consider: status
/// WAITING and no active cooldown window.
fn eligible_visits<'a>(queues: &[&'a Queue], now: DateTime<Utc>) -> Vec<(&'a Queue, &'a Visit)> {
    queues
        .iter()
        .flat_map(|queue| queue.visits.iter().map(move |visit| (*queue, visit)))
        .filter(|(_, visit)| visit.status == VisitStatus::Waiting && !visit.in_cooldown(now))
        .collect()
}

/// Queues the service point may pull from, narrowed to `queue_ids` when given
fn candidate_queues<'a>(
    branch: &'a Branch,
    service_point: &ServicePoint,
    queue_ids: Option<&[String]>,
) -> Result<Vec<&'a Queue>> {
    if branch.operator_of(service_point).is_none() {
        return Err(EngineError::forbidden(format!(
            "No user logged in into service point {}",
            service_point.id
        )));
    }
    let reachable = branch.reachable_queue_ids(service_point);
    Ok(branch
        .queues
        .values()
        .filter(|queue| reachable.contains(&queue.id))
        .filter(|queue| {
            queue_ids
                .map(|narrowed| narrowed.contains(&queue.id))
                .unwrap_or(true)
        })
        .collect())
}

/// Service points that could pull the visit: idle, armed for auto-call, with
/// an operator whose work profile reaches the visit's queue.
fn armed_service_points(branch: &Branch, visit: &Visit) -> Vec<String> {
    let target_queue = visit
        .queue_id
        .clone()
        .or_else(|| {
            visit
                .current_service
                .as_ref()
                .map(|service| service.linked_queue_id.clone())
        });
    let Some(target_queue) = target_queue else {
        return Vec::new();
    };
    branch
        .service_points
        .values()
        .filter(|sp| sp.is_idle() && sp.auto_call_mode)
        .filter(|sp| branch.reachable_queue_ids(sp).contains(&target_queue))
        .map(|sp| sp.id.clone())
        .collect()
}

/// Oldest-waiting-first dispatch: the eligible visit with the earliest
/// creation time wins.
pub struct MaxWaitingTimeCallRule;

impl CallRule for MaxWaitingTimeCallRule {
    fn select(
        &self,
        branch: &Branch,
        service_point: &ServicePoint,
        queue_ids: Option<&[String]>,
    ) -> Result<Option<Visit>> {
        let now = Utc::now();
        let queues = candidate_queues(branch, service_point, queue_ids)?;
        let winner = eligible_visits(&queues, now)
            .into_iter()
            .min_by_key(|(_, visit)| visit.create_date_time)
            .map(|(_, visit)| visit.clone());
        Ok(winner)
    }

    fn available_service_points(&self, branch: &Branch, visit: &Visit) -> Vec<String> {
        armed_service_points(branch, visit)
    }
}

/// SLA-deadline-first dispatch: the eligible visit closest to (or past) its
/// queue's service-level deadline wins; ties fall back to creation time.
pub struct MaxLifeTimeCallRule;

impl CallRule for MaxLifeTimeCallRule {
    fn select(
        &self,
        branch: &Branch,
        service_point: &ServicePoint,
        queue_ids: Option<&[String]>,
    ) -> Result<Option<Visit>> {
        let now = Utc::now();
        let queues = candidate_queues(branch, service_point, queue_ids)?;
        let winner = eligible_visits(&queues, now)
            .into_iter()
            .min_by_key(|(queue, visit)| {
                let deadline = visit.create_date_time + Duration::seconds(queue.sla_seconds);
                (deadline, visit.create_date_time)
            })
            .map(|(_, visit)| visit.clone());
        Ok(winner)
    }

    fn available_service_points(&self, branch: &Branch, visit: &Visit) -> Vec<String> {
        armed_service_points(branch, visit)
    }
}
