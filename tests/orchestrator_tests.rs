//! Integration tests for the visit engine
//!
//! These tests drive the orchestrator end to end: intake, dispatch,
//! confirm flows, completion, transfers, cooldown gating and auto-call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serial_test::serial;

use visit_engine::prelude::*;

/// Sink that records everything the engine publishes
struct CollectingSink {
    published: Mutex<Vec<(String, Event)>>,
}

impl CollectingSink {
    fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }

    fn event_types(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|(held_topic, _)| held_topic == topic)
            .map(|(_, event)| event.event_type.clone())
            .collect()
    }

    fn find(&self, event_type: &str) -> Option<Event> {
        self.published
            .lock()
            .iter()
            .find(|(_, event)| event.event_type == event_type)
            .map(|(_, event)| event.clone())
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn publish(&self, topic: &str, _durable: bool, event: Event) {
        self.published.lock().push((topic.to_string(), event));
    }
}

fn test_branch() -> Branch {
    let mut branch = Branch::new("b-1", "Main Branch");
    branch.prefix = "MB".to_string();
    branch
        .queues
        .insert("q-main".to_string(), Queue::new("q-main", "General", "A", 900));
    branch
        .queues
        .insert("q-next".to_string(), Queue::new("q-next", "Follow-up", "B", 300));
    branch.services.insert(
        "svc-main".to_string(),
        Service::new("svc-main", "Deposits", 600, "q-main"),
    );
    branch.services.insert(
        "svc-next".to_string(),
        Service::new("svc-next", "Cards", 300, "q-next"),
    );
    branch.work_profiles.insert(
        "wp-all".to_string(),
        WorkProfile::new("wp-all", "All queues", vec!["q-main".to_string(), "q-next".to_string()]),
    );
    let mut alice = User::new("u-alice", "alice");
    alice.current_work_profile_id = Some("wp-all".to_string());
    branch.users.insert("u-alice".to_string(), alice);

    let mut sp = ServicePoint::new("sp-1", "Window 1");
    sp.user_id = Some("u-alice".to_string());
    branch.service_points.insert("sp-1".to_string(), sp);
    branch
        .service_points
        .insert("sp-2".to_string(), ServicePoint::new("sp-2", "Window 2"));

    branch
        .entry_points
        .insert("ep-1".to_string(), EntryPoint::new("ep-1", "Front door"));
    branch
}

fn setup() -> (VisitOrchestrator, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let branches = Arc::new(BranchRegistry::new());
    branches.add(test_branch());
    let orchestrator = VisitOrchestrator::new(EngineConfig::default(), branches, sink.clone());
    (orchestrator, sink)
}

async fn create_waiting_visit(orchestrator: &VisitOrchestrator) -> Visit {
    orchestrator
        .create_visit(
            "b-1",
            "ep-1",
            &["svc-main".to_string()],
            HashMap::new(),
            false,
            None,
        )
        .await
        .expect("Visit creation failed")
}

fn assert_single_location(visit: &Visit) {
    let set = [
        visit.queue_id.is_some(),
        visit.service_point_id.is_some(),
        visit.pool_service_point_id.is_some(),
        visit.pool_user_id.is_some(),
    ]
    .iter()
    .filter(|flag| **flag)
    .count();
    assert!(set <= 1, "more than one location field set: {:?}", visit);
    assert_eq!(visit.events.len(), visit.visit_events.len());
    if !visit.visit_events.is_empty() {
        assert_eq!(visit.visit_events[0], VisitEventKind::Created);
    }
}

#[tokio::test]
async fn test_intake_places_visit_in_routed_queue() {
    let (orchestrator, sink) = setup();
    let visit = create_waiting_visit(&orchestrator).await;

    assert_eq!(visit.queue_id.as_deref(), Some("q-main"));
    assert_eq!(visit.status, VisitStatus::Waiting);
    assert_eq!(
        visit.visit_events,
        vec![VisitEventKind::Created, VisitEventKind::PlacedInQueue]
    );
    assert_single_location(&visit);

    // The visit actually sits in the queue's list
    let queued = orchestrator
        .get_visits("b-1", "q-main", None)
        .await
        .expect("Queue listing failed");
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, visit.id);

    // Lifecycle events reached the broadcast topic
    let types = sink.event_types("*");
    assert!(types.contains(&"VISIT_CREATED".to_string()));
    assert!(types.contains(&"VISIT_PLACED_IN_QUEUE".to_string()));
}

#[tokio::test]
async fn test_ticket_format_zero_padded() {
    let (orchestrator, _) = setup();
    {
        let handle = orchestrator.branches().get("b-1").unwrap();
        handle.lock().queues.get_mut("q-main").unwrap().ticket_counter = 24;
    }
    let visit = create_waiting_visit(&orchestrator).await;
    assert_eq!(visit.ticket, "A025");
}

#[tokio::test]
async fn test_intake_rejects_unknown_inputs() {
    let (orchestrator, _) = setup();
    let err = orchestrator
        .create_visit("b-9", "ep-1", &["svc-main".to_string()], HashMap::new(), false, None)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);

    let err = orchestrator
        .create_visit("b-1", "ep-1", &[], HashMap::new(), false, None)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);

    let err = orchestrator
        .create_visit("b-1", "ep-1", &["svc-missing".to_string()], HashMap::new(), false, None)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);

    let err = orchestrator
        .create_visit("b-1", "ep-9", &["svc-main".to_string()], HashMap::new(), false, None)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn test_segmentation_parameter_routes_to_named_queue() {
    let (orchestrator, _) = setup();
    {
        let handle = orchestrator.branches().get("b-1").unwrap();
        let mut property = HashMap::new();
        property.insert("segment".to_string(), "follow-up".to_string());
        handle.lock().segmentation_rules.insert(
            "rule-1".to_string(),
            SegmentationRuleData {
                id: "rule-1".to_string(),
                name: "Follow-up customers".to_string(),
                queue_id: "q-next".to_string(),
                visit_property: property,
            },
        );
    }
    let mut parameters = HashMap::new();
    parameters.insert("segment".to_string(), "follow-up".to_string());
    let visit = orchestrator
        .create_visit("b-1", "ep-1", &["svc-main".to_string()], parameters, false, None)
        .await
        .expect("Visit creation failed");
    assert_eq!(visit.queue_id.as_deref(), Some("q-next"));
    assert_eq!(visit.ticket, "B001");
}

#[tokio::test]
async fn test_call_moves_visit_onto_service_point() {
    let (orchestrator, _) = setup();
    let visit = create_waiting_visit(&orchestrator).await;

    let called = orchestrator
        .visit_call("b-1", "sp-1", &visit.id, "callNext")
        .await
        .expect("Call failed");
    assert_eq!(called.service_point_id.as_deref(), Some("sp-1"));
    assert_eq!(called.queue_id, None);
    assert_eq!(called.status, VisitStatus::StartServing);
    assert_eq!(called.user_name.as_deref(), Some("alice"));
    assert_eq!(
        called.parameters.get("LastQueueId"),
        Some(&"q-main".to_string())
    );
    assert_single_location(&called);

    // Queue is empty, service point occupied
    let queued = orchestrator.get_visits("b-1", "q-main", None).await.unwrap();
    assert!(queued.is_empty());
    let handle = orchestrator.branches().get("b-1").unwrap();
    assert!(handle.lock().service_points["sp-1"].current_visit.is_some());
}

#[tokio::test]
async fn test_call_on_occupied_service_point_is_conflict_without_mutation() {
    let (orchestrator, _) = setup();
    let first = create_waiting_visit(&orchestrator).await;
    orchestrator
        .visit_call("b-1", "sp-1", &first.id, "callNext")
        .await
        .expect("First call failed");

    let second = create_waiting_visit(&orchestrator).await;
    let err = orchestrator
        .visit_call("b-1", "sp-1", &second.id, "callNext")
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 409);

    // The second visit's log is unchanged and it still waits in its queue
    let unchanged = orchestrator.get_visit("b-1", &second.id).await.unwrap();
    assert_eq!(
        unchanged.visit_events,
        vec![VisitEventKind::Created, VisitEventKind::PlacedInQueue]
    );
    assert_eq!(unchanged.queue_id.as_deref(), Some("q-main"));
}

#[tokio::test]
async fn test_call_next_picks_oldest_visit() {
    let (orchestrator, _) = setup();
    let oldest = create_waiting_visit(&orchestrator).await;
    let _newer = create_waiting_visit(&orchestrator).await;

    let called = orchestrator
        .visit_call_with_maximal_waiting_time("b-1", "sp-1")
        .await
        .expect("Dispatch failed")
        .expect("No candidate found");
    assert_eq!(called.id, oldest.id);
    assert_eq!(called.status, VisitStatus::StartServing);
}

#[tokio::test]
async fn test_call_next_on_unmanned_point_is_forbidden() {
    let (orchestrator, _) = setup();
    create_waiting_visit(&orchestrator).await;
    let err = orchestrator
        .visit_call_with_maximal_waiting_time("b-1", "sp-2")
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 403);
}

#[tokio::test]
async fn test_call_next_busy_point_returns_empty() {
    let (orchestrator, _) = setup();
    let visit = create_waiting_visit(&orchestrator).await;
    orchestrator
        .visit_call("b-1", "sp-1", &visit.id, "callNext")
        .await
        .unwrap();
    create_waiting_visit(&orchestrator).await;

    let result = orchestrator
        .visit_call_with_maximal_waiting_time("b-1", "sp-1")
        .await
        .expect("Busy point should not error");
    assert!(result.is_none());
}

#[tokio::test]
async fn test_empty_queue_arms_auto_call_with_207() {
    let (orchestrator, sink) = setup();
    {
        let handle = orchestrator.branches().get("b-1").unwrap();
        handle.lock().set_auto_call_mode(true);
    }

    let err = orchestrator
        .visit_call_with_maximal_waiting_time("b-1", "sp-1")
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 207);
    assert!(err.is_auto_call_armed());

    let handle = orchestrator.branches().get("b-1").unwrap();
    assert!(handle.lock().service_points["sp-1"].auto_call_mode);
    assert!(sink.find("AUTOCALL_MODE_TURN_ON").is_some());
    // 207 is control flow: no business error accompanies it
    assert!(sink.find("BUSINESS_ERROR").is_none());
}

#[tokio::test]
async fn test_empty_queue_without_auto_call_returns_none() {
    let (orchestrator, _) = setup();
    let result = orchestrator
        .visit_call_with_maximal_waiting_time("b-1", "sp-1")
        .await
        .expect("Empty dispatch should not error");
    assert!(result.is_none());
}

#[tokio::test]
#[serial]
async fn test_auto_call_dispatches_new_visit_and_disarms() {
    let (orchestrator, _) = setup();
    {
        let handle = orchestrator.branches().get("b-1").unwrap();
        let mut branch = handle.lock();
        branch.set_auto_call_mode(true);
        branch.service_points.get_mut("sp-1").unwrap().auto_call_mode = true;
    }

    let visit = create_waiting_visit(&orchestrator).await;

    let handle = orchestrator.branches().get("b-1").unwrap();
    let branch = handle.lock().clone();
    let served = branch.service_points["sp-1"]
        .current_visit
        .clone()
        .expect("Auto-call did not dispatch the visit");
    assert_eq!(served.id, visit.id);
    assert_eq!(served.status, VisitStatus::StartServing);
    assert!(
        !branch.service_points["sp-1"].auto_call_mode,
        "auto-call must disarm after the attempt"
    );
}

#[tokio::test]
async fn test_auto_call_leaves_flag_armed_without_eligible_point() {
    let (orchestrator, _) = setup();
    {
        let handle = orchestrator.branches().get("b-1").unwrap();
        let mut branch = handle.lock();
        branch.set_auto_call_mode(true);
        // sp-2 is armed but has no operator, so it is never eligible
        branch.service_points.get_mut("sp-2").unwrap().auto_call_mode = true;
    }

    let visit = create_waiting_visit(&orchestrator).await;

    let handle = orchestrator.branches().get("b-1").unwrap();
    let branch = handle.lock().clone();
    assert!(branch.service_points["sp-2"].auto_call_mode);
    let held = branch.find_visit(&visit.id).expect("Visit vanished");
    assert_eq!(held.queue_id.as_deref(), Some("q-main"));
    assert_eq!(held.status, VisitStatus::Waiting);
}

#[tokio::test]
async fn test_confirm_flow_calls_then_hands_off() {
    let (orchestrator, _) = setup();
    let visit = create_waiting_visit(&orchestrator).await;

    let called = orchestrator
        .visit_call_for_confirm_with_maximal_waiting_time("b-1", "sp-1")
        .await
        .expect("Confirm call failed")
        .expect("No candidate found");
    assert_eq!(called.id, visit.id);
    // Only CALLED was appended; the visit stays in its queue
    assert_eq!(
        called.visit_events.last(),
        Some(&VisitEventKind::Called)
    );
    assert_eq!(called.queue_id.as_deref(), Some("q-main"));
    assert!(called.call_date_time.is_some());

    let recalled = orchestrator
        .visit_recall_for_confirm("b-1", "sp-1", &visit.id)
        .await
        .expect("Recall failed");
    assert_eq!(
        recalled.events.last().unwrap().parameters.get("callMethod"),
        Some(&"cherryPick".to_string())
    );

    let confirmed = orchestrator
        .visit_confirm("b-1", "sp-1", &visit.id)
        .await
        .expect("Confirm failed");
    assert_eq!(confirmed.service_point_id.as_deref(), Some("sp-1"));
    assert_eq!(confirmed.status, VisitStatus::StartServing);
    assert_eq!(
        confirmed.visit_events.last(),
        Some(&VisitEventKind::StartServing)
    );
    assert_single_location(&confirmed);
}

#[tokio::test]
async fn test_visit_end_routes_next_service_to_its_linked_queue() {
    let (orchestrator, _) = setup();
    let visit = orchestrator
        .create_visit(
            "b-1",
            "ep-1",
            &["svc-main".to_string(), "svc-next".to_string()],
            HashMap::new(),
            false,
            None,
        )
        .await
        .expect("Visit creation failed");
    orchestrator
        .visit_call("b-1", "sp-1", &visit.id, "callNext")
        .await
        .expect("Call failed");

    let ended = orchestrator
        .visit_end("b-1", "sp-1", false, None)
        .await
        .expect("End failed");

    // The next unserved service decides the queue, not the routing rule
    assert_eq!(ended.queue_id.as_deref(), Some("q-next"));
    assert_eq!(
        ended.current_service.as_ref().map(|service| service.id.as_str()),
        Some("svc-next")
    );
    assert_eq!(ended.served_services.len(), 1);
    assert_eq!(ended.served_services[0].id, "svc-main");
    assert_eq!(ended.status, VisitStatus::Waiting);
    assert!(ended.return_date_time.is_some());
    assert_eq!(
        &ended.visit_events[ended.visit_events.len() - 2..],
        &[VisitEventKind::StopServing, VisitEventKind::BackToQueue]
    );
    assert_single_location(&ended);

    // Serve the remaining service to completion
    let called = orchestrator
        .visit_call("b-1", "sp-1", &visit.id, "callNext")
        .await
        .expect("Second call failed");
    assert_eq!(called.service_point_id.as_deref(), Some("sp-1"));
    let finished = orchestrator
        .visit_end("b-1", "sp-1", false, None)
        .await
        .expect("Final end failed");
    assert_eq!(finished.status, VisitStatus::Served);
    assert!(finished.current_service.is_none());
    assert_eq!(finished.location_count(), 0);
    assert!(finished.end_date_time.is_some());
    assert_eq!(finished.visit_events.last(), Some(&VisitEventKind::End));
}

#[tokio::test]
async fn test_no_show_clears_location_and_timestamps() {
    let (orchestrator, _) = setup();
    let visit = create_waiting_visit(&orchestrator).await;
    orchestrator
        .visit_call("b-1", "sp-1", &visit.id, "callNext")
        .await
        .unwrap();

    let no_show = orchestrator
        .visit_no_show("b-1", "sp-1", &visit.id)
        .await
        .expect("No-show failed");
    assert_eq!(no_show.status, VisitStatus::NoShow);
    assert_eq!(no_show.location_count(), 0);
    assert_eq!(no_show.call_date_time, None);
    assert_eq!(no_show.start_serving_date_time, None);
}

#[tokio::test]
async fn test_stop_serving_without_breadcrumb_is_conflict_without_mutation() {
    let (orchestrator, _) = setup();
    // A virtual visit never waited in a queue, so it has no LastQueueId
    let visit = orchestrator
        .create_virtual_visit("b-1", "sp-1", &["svc-main".to_string()], HashMap::new())
        .await
        .expect("Virtual intake failed");

    let err = orchestrator
        .stop_serving_and_back_to_queue("b-1", "sp-1", 60)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 409);

    // Zero mutation: the visit is still being served
    let held = orchestrator.get_visit("b-1", &visit.id).await.unwrap();
    assert_eq!(held.service_point_id.as_deref(), Some("sp-1"));
    assert_eq!(held.visit_events.last(), Some(&VisitEventKind::StartServing));
}

#[tokio::test(start_paused = true)]
async fn test_stop_serving_returns_to_last_queue_and_notifies_later() {
    let (orchestrator, sink) = setup();
    let visit = create_waiting_visit(&orchestrator).await;
    orchestrator
        .visit_call("b-1", "sp-1", &visit.id, "callNext")
        .await
        .unwrap();

    let returned = orchestrator
        .stop_serving_and_back_to_queue("b-1", "sp-1", 30)
        .await
        .expect("Return failed");
    assert_eq!(returned.queue_id.as_deref(), Some("q-main"));
    assert_eq!(returned.return_time_delay, Some(30));
    assert!(returned.return_date_time.is_some());
    assert_single_location(&returned);

    // Inside the cooldown: hidden from listing and from deletion
    let listed = orchestrator.get_visits("b-1", "q-main", None).await.unwrap();
    assert!(listed.is_empty());
    let err = orchestrator.delete_visit("b-1", &visit.id).await.unwrap_err();
    assert_eq!(err.http_status(), 409);

    // The delayed refresh fires once the window elapses
    tokio::task::yield_now().await; // let the spawned cooldown timer register at t=0
    tokio::time::advance(std::time::Duration::from_secs(31)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    let refresh = sink.find("QUEUE_REFRESHED").expect("No refresh published");
    assert_eq!(
        refresh.params.get("reason"),
        Some(&"RETURN_TIME_DELAY_FINISHED".to_string())
    );
}

#[tokio::test]
async fn test_delete_after_cooldown_appends_exactly_one_deleted() {
    let (orchestrator, _) = setup();
    let visit = create_waiting_visit(&orchestrator).await;

    let deleted = orchestrator
        .delete_visit("b-1", &visit.id)
        .await
        .expect("Delete failed");
    assert_eq!(deleted.location_count(), 0);
    assert_eq!(
        deleted
            .visit_events
            .iter()
            .filter(|kind| **kind == VisitEventKind::Deleted)
            .count(),
        1
    );
    // Gone from every container
    assert!(orchestrator.get_visit("b-1", &visit.id).await.is_err());
}

#[tokio::test]
async fn test_transfer_to_user_pool_sets_exactly_one_location() {
    let (orchestrator, _) = setup();
    let visit = create_waiting_visit(&orchestrator).await;
    orchestrator
        .visit_call("b-1", "sp-1", &visit.id, "callNext")
        .await
        .unwrap();

    let transferred = orchestrator
        .visit_transfer_to_user_pool("b-1", "sp-1", "u-alice", 60)
        .await
        .expect("Transfer failed");
    assert_eq!(transferred.pool_user_id.as_deref(), Some("u-alice"));
    assert_eq!(transferred.queue_id, None);
    assert_eq!(transferred.service_point_id, None);
    assert_eq!(transferred.pool_service_point_id, None);
    assert!(transferred.transfer_date_time.is_some());
    assert_eq!(transferred.transfer_time_delay, Some(60));
    assert_eq!(
        &transferred.visit_events[transferred.visit_events.len() - 2..],
        &[VisitEventKind::StopServing, VisitEventKind::TransferToUserPool]
    );

    let handle = orchestrator.branches().get("b-1").unwrap();
    let branch = handle.lock().clone();
    assert_eq!(branch.users["u-alice"].visits.len(), 1);
    assert!(branch.service_points["sp-1"].current_visit.is_none());
}

#[tokio::test]
async fn test_transfer_from_queue_carries_external_identity_and_metadata() {
    struct StaticResolver;

    #[async_trait]
    impl IdentityResolver for StaticResolver {
        async fn resolve_by_session_id(&self, _session_id: &str) -> Option<StaffIdentity> {
            Some(StaffIdentity {
                id: "u-super".to_string(),
                name: "supervisor".to_string(),
            })
        }
    }

    let sink = Arc::new(CollectingSink::new());
    let branches = Arc::new(BranchRegistry::new());
    branches.add(test_branch());
    let orchestrator = VisitOrchestrator::new(EngineConfig::default(), branches, sink.clone())
        .with_identity_resolver(Arc::new(StaticResolver));

    let visit = create_waiting_visit(&orchestrator).await;
    let mut metadata = HashMap::new();
    metadata.insert("ticketNote".to_string(), "escalated".to_string());

    let transferred = orchestrator
        .visit_transfer_from_queue(
            "b-1",
            &visit.id,
            "q-next",
            QueuePosition::Start,
            45,
            Some("sid-123"),
            metadata,
        )
        .await
        .expect("Transfer failed");

    assert_eq!(transferred.queue_id.as_deref(), Some("q-next"));
    assert!(transferred.transfer_date_time.is_some());
    assert_eq!(
        transferred.parameters.get("isTransferredToStart"),
        Some(&"true".to_string())
    );
    let entry = transferred.events.last().unwrap();
    assert_eq!(entry.kind, VisitEventKind::TransferToQueue);
    assert_eq!(entry.parameters.get("oldQueueId"), Some(&"q-main".to_string()));
    assert_eq!(
        entry.parameters.get("externalStaffName"),
        Some(&"supervisor".to_string())
    );
    assert_eq!(
        entry.parameters.get("ticketNote"),
        Some(&"escalated".to_string())
    );

    // Inserted at the front of the target queue
    let handle = orchestrator.branches().get("b-1").unwrap();
    assert_eq!(handle.lock().queues["q-next"].visits[0].id, visit.id);
}

#[tokio::test]
async fn test_back_to_service_point_pool_follows_breadcrumb() {
    let (orchestrator, _) = setup();
    let visit = create_waiting_visit(&orchestrator).await;

    // Park the visit in sp-2's pool, then serve it from there
    orchestrator
        .visit_transfer_from_queue_to_service_point_pool(
            "b-1",
            &visit.id,
            "sp-2",
            QueuePosition::End,
            0,
            None,
            HashMap::new(),
        )
        .await
        .expect("Pool transfer failed");
    let called = orchestrator
        .visit_call("b-1", "sp-1", &visit.id, "cherryPick")
        .await
        .expect("Call from pool failed");
    assert_eq!(
        called.parameters.get("LastPoolServicePointId"),
        Some(&"sp-2".to_string())
    );

    let back = orchestrator
        .visit_back_to_service_point_pool("b-1", "sp-1", 15)
        .await
        .expect("Back to pool failed");
    assert_eq!(back.pool_service_point_id.as_deref(), Some("sp-2"));
    assert_eq!(back.visit_events.last(), Some(&VisitEventKind::BackToServicePointPool));
    assert_single_location(&back);
}

#[tokio::test]
async fn test_back_to_user_pool_without_breadcrumb_is_conflict() {
    let (orchestrator, _) = setup();
    // Virtual visit: no pool history at all and no prior operator
    orchestrator
        .create_virtual_visit("b-1", "sp-2", &["svc-main".to_string()], HashMap::new())
        .await
        .expect("Virtual intake failed");

    let err = orchestrator
        .visit_back_to_user_pool("b-1", "sp-2", 10)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 409);
}

#[tokio::test]
async fn test_get_visits_orders_by_creation_and_respects_limit() {
    let (orchestrator, _) = setup();
    let first = create_waiting_visit(&orchestrator).await;
    let second = create_waiting_visit(&orchestrator).await;
    let third = create_waiting_visit(&orchestrator).await;

    let listed = orchestrator.get_visits("b-1", "q-main", None).await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|visit| visit.id.as_str()).collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str(), third.id.as_str()]);

    let limited = orchestrator.get_visits("b-1", "q-main", Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);

    let err = orchestrator.get_visits("b-1", "q-missing", None).await.unwrap_err();
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn test_service_point_sessions_open_close() {
    let (orchestrator, sink) = setup();
    let mut bob = User::new("u-bob", "bob");
    bob.current_work_profile_id = Some("wp-all".to_string());

    let opened = orchestrator
        .open_service_point("b-1", "sp-2", bob)
        .await
        .expect("Open failed");
    assert_eq!(opened.user_id.as_deref(), Some("u-bob"));
    assert!(sink.find("SERVICE_POINT_OPENED").is_some());

    // A second operator cannot take the occupied window
    let eve = User::new("u-eve", "eve");
    let err = orchestrator.open_service_point("b-1", "sp-2", eve).await.unwrap_err();
    assert_eq!(err.http_status(), 409);

    // Closing ends the visit being served there
    let visit = create_waiting_visit(&orchestrator).await;
    orchestrator
        .visit_call("b-1", "sp-2", &visit.id, "callNext")
        .await
        .expect("Call failed");
    orchestrator
        .close_service_point("b-1", "sp-2")
        .await
        .expect("Close failed");

    let handle = orchestrator.branches().get("b-1").unwrap();
    let branch = handle.lock().clone();
    assert_eq!(branch.service_points["sp-2"].user_id, None);
    assert!(branch.service_points["sp-2"].current_visit.is_none());
    assert!(sink.find("SERVICE_POINT_CLOSED").is_some());
}

#[tokio::test]
async fn test_add_service_and_outcome_touch_visit_copy_only() {
    let (orchestrator, _) = setup();
    {
        let handle = orchestrator.branches().get("b-1").unwrap();
        let mut branch = handle.lock();
        branch
            .services
            .get_mut("svc-main")
            .unwrap()
            .possible_outcomes
            .insert(
                "ok".to_string(),
                Outcome {
                    id: "ok".to_string(),
                    name: "Resolved".to_string(),
                },
            );
    }
    let visit = create_waiting_visit(&orchestrator).await;
    orchestrator
        .visit_call("b-1", "sp-1", &visit.id, "callNext")
        .await
        .unwrap();

    let with_service = orchestrator
        .add_service("b-1", "sp-1", "svc-next")
        .await
        .expect("Add service failed");
    assert_eq!(with_service.unserved_services.len(), 1);
    assert_eq!(with_service.visit_events.last(), Some(&VisitEventKind::AddService));

    let err = orchestrator.add_service("b-1", "sp-1", "svc-next").await.unwrap_err();
    assert_eq!(err.http_status(), 409);

    let with_outcome = orchestrator
        .add_outcome("b-1", "sp-1", "ok")
        .await
        .expect("Add outcome failed");
    assert_eq!(
        with_outcome
            .current_service
            .as_ref()
            .and_then(|service| service.outcome.as_ref())
            .map(|outcome| outcome.id.as_str()),
        Some("ok")
    );

    // The branch catalog entry was never touched
    let handle = orchestrator.branches().get("b-1").unwrap();
    assert!(handle.lock().services["svc-main"].outcome.is_none());
}

#[tokio::test]
async fn test_business_error_published_on_failure() {
    let (orchestrator, sink) = setup();
    let err = orchestrator.get_visit("b-1", "v-missing").await.unwrap_err();
    assert_eq!(err.http_status(), 404);

    let error_event = sink.find("BUSINESS_ERROR").expect("No business error published");
    assert_eq!(error_event.params.get("httpStatus"), Some(&"404".to_string()));
}
