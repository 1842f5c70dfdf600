//! Data-driven segmentation: visit parameters → target queue.

use crate::error::{EngineError, Result};
use crate::model::{Branch, SegmentationRuleData, Visit};

use super::RoutingRule;

/// Default segmentation rule.
///
/// A rule matches when every entry of its `visit_property` map is present in
/// the visit's parameter bag. With an explicit `rule_id` the named rule is
/// required to exist and is the only one consulted; otherwise the first
/// matching rule wins and the current service's linked queue is the
/// fallback.
pub struct SimpleRoutingRule;

fn rule_matches(rule: &SegmentationRuleData, visit: &Visit) -> bool {
    rule.visit_property.iter().all(|(key, value)| {
        visit
            .parameters
            .get(key)
            .map(|held| held == value)
            .unwrap_or(false)
    })
}

impl RoutingRule for SimpleRoutingRule {
    fn target_queue(
        &self,
        visit: &Visit,
        branch: &Branch,
        rule_id: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(rule_id) = rule_id {
            let rule = branch.segmentation_rules.get(rule_id).ok_or_else(|| {
                EngineError::not_found(format!("Segmentation rule {} not found", rule_id))
            })?;
            if rule_matches(rule, visit) {
                return Ok(Some(rule.queue_id.clone()));
            }
            return Ok(None);
        }

        if !visit.parameters.is_empty() {
            let matched = branch
                .segmentation_rules
                .values()
                .filter(|rule| !rule.visit_property.is_empty())
                .find(|rule| rule_matches(rule, visit));
            if let Some(rule) = matched {
                return Ok(Some(rule.queue_id.clone()));
            }
        }

        let linked = visit
            .current_service
            .as_ref()
            .map(|service| service.linked_queue_id.clone())
            .filter(|queue_id| branch.queues.contains_key(queue_id));
        Ok(linked)
    }
}
