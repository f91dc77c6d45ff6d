//! Call outcome processing: exactly-once completion effects.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use telecrm_core::{
    assignment_engine::{LeadAssignment, NewLead},
    authorization_gate::Identity,
    call_outcome_processor::{CallUpdate, NewCall},
    clock::CrmClock,
    config::CrmConfig,
    engine::CrmEngine,
    error::CrmError,
    event::CrmEvent,
    notifier::RecordingNotifier,
    store::CrmStore,
    team_directory::NewUser,
    types::{CallOutcome, CallStatus, LeadStatus, Role},
};

fn build_engine() -> (CrmEngine, Arc<RecordingNotifier>) {
    let store = CrmStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = CrmClock::fixed(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
    let engine = CrmEngine::new(store, CrmConfig::default(), clock, Box::new(notifier.clone()));
    (engine, notifier)
}

struct Desk {
    root: Identity,
    agent: Identity,
    lead_id: String,
}

fn desk(engine: &CrmEngine) -> Desk {
    let admin = engine
        .bootstrap_admin(NewUser::new("Ada", "ada@crm.test", Role::Admin))
        .unwrap();
    let root = engine.identity(&admin.user_id).unwrap();
    let agent = engine
        .create_user(Some(&root), NewUser::new("Tara", "tara@crm.test", Role::Telecaller))
        .unwrap();
    let lead = engine
        .ingest_lead(
            NewLead::new("Lee", "+15550001"),
            LeadAssignment::Manual(agent.user_id.clone()),
        )
        .unwrap();
    Desk {
        root,
        agent: engine.identity(&agent.user_id).unwrap(),
        lead_id: lead.lead_id,
    }
}

#[test]
fn completing_a_call_updates_lead_and_agent_once() {
    let (engine, notifier) = build_engine();
    let d = desk(&engine);
    let call = engine
        .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
        .unwrap()
        .call;
    assert_eq!(call.lead_status_before, LeadStatus::New);

    let update = CallUpdate::completed(CallOutcome::Interested)
        .with_lead_status(LeadStatus::Interested);
    let saved = engine
        .update_call(Some(&d.agent), &call.call_id, update.clone())
        .unwrap();
    assert!(saved.effects.is_some());
    assert_eq!(saved.call.lead_status_after, Some(LeadStatus::Interested));

    // Same status again: no statistics, no notification.
    let again = engine.update_call(Some(&d.agent), &call.call_id, update).unwrap();
    assert!(again.effects.is_none());
    assert!(again.events.is_empty());

    let agent = engine.store().get_user(&d.agent.id).unwrap();
    assert_eq!(agent.total_calls, 1);
    assert_eq!(agent.successful_calls, 1);
    let lead = engine.store().get_lead(&d.lead_id).unwrap();
    assert_eq!(lead.followup_count, 1);
    assert_eq!(lead.status, LeadStatus::Interested);
    assert_eq!(notifier.count("call_completed"), 1);
    assert_eq!(engine.store().events_of_type("call_completed").unwrap().len(), 1);
}

#[test]
fn unsuccessful_outcome_counts_the_call_only() {
    let (engine, _) = build_engine();
    let d = desk(&engine);
    let call = engine
        .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
        .unwrap()
        .call;
    engine
        .update_call(Some(&d.agent), &call.call_id, CallUpdate::completed(CallOutcome::NoAnswer))
        .unwrap();

    let agent = engine.store().get_user(&d.agent.id).unwrap();
    assert_eq!(agent.total_calls, 1);
    assert_eq!(agent.successful_calls, 0);
    // No status supplied: the lead keeps its stage.
    assert_eq!(engine.store().get_lead(&d.lead_id).unwrap().status, LeadStatus::New);
}

#[test]
fn contact_date_prefers_end_then_start_then_now() {
    let (engine, _) = build_engine();
    let d = desk(&engine);
    let start = engine.clock().now() - Duration::minutes(10);
    let end = start + Duration::minutes(4);

    let mut with_both = NewCall::new(&d.lead_id, &d.agent.id);
    with_both.start_time = Some(start);
    with_both.end_time = Some(end);
    let saved = engine.log_call(Some(&d.agent), with_both).unwrap();
    engine
        .update_call(Some(&d.agent), &saved.call.call_id, CallUpdate::completed(CallOutcome::Busy))
        .unwrap();
    assert_eq!(
        engine.store().get_lead(&d.lead_id).unwrap().last_contact_date,
        Some(end)
    );

    let mut start_only = NewCall::new(&d.lead_id, &d.agent.id);
    start_only.start_time = Some(start);
    let saved = engine.log_call(Some(&d.agent), start_only).unwrap();
    engine
        .update_call(Some(&d.agent), &saved.call.call_id, CallUpdate::completed(CallOutcome::Busy))
        .unwrap();
    assert_eq!(
        engine.store().get_lead(&d.lead_id).unwrap().last_contact_date,
        Some(start)
    );

    let saved = engine
        .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
        .unwrap();
    engine
        .update_call(Some(&d.agent), &saved.call.call_id, CallUpdate::completed(CallOutcome::Busy))
        .unwrap();
    let lead = engine.store().get_lead(&d.lead_id).unwrap();
    assert_eq!(lead.last_contact_date, Some(engine.clock().now()));
    assert_eq!(lead.followup_count, 3);
}

#[test]
fn status_before_is_a_snapshot_and_status_after_is_write_once() {
    let (engine, _) = build_engine();
    let d = desk(&engine);
    let first = engine
        .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
        .unwrap()
        .call;
    engine
        .update_call(
            Some(&d.agent),
            &first.call_id,
            CallUpdate::completed(CallOutcome::CallbackRequested).with_lead_status(LeadStatus::FollowUp),
        )
        .unwrap();

    // A later save with a different lead status does not rewrite the record.
    engine
        .update_call(
            Some(&d.agent),
            &first.call_id,
            CallUpdate::completed(CallOutcome::CallbackRequested).with_lead_status(LeadStatus::Closed),
        )
        .unwrap();
    let stored = engine.store().get_call(&first.call_id).unwrap();
    assert_eq!(stored.lead_status_before, LeadStatus::New);
    assert_eq!(stored.lead_status_after, Some(LeadStatus::FollowUp));
    assert_eq!(engine.store().get_lead(&d.lead_id).unwrap().status, LeadStatus::FollowUp);

    // The next call snapshots the stage the previous one left behind.
    let second = engine
        .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
        .unwrap()
        .call;
    assert_eq!(second.lead_status_before, LeadStatus::FollowUp);

    let history = engine.store().calls_for_lead(&d.lead_id).unwrap();
    let ids: Vec<_> = history.iter().map(|c| c.call_id.as_str()).collect();
    assert_eq!(ids, vec![first.call_id.as_str(), second.call_id.as_str()]);
}

#[test]
fn intermediate_statuses_do_not_count() {
    let (engine, notifier) = build_engine();
    let d = desk(&engine);
    let call = engine
        .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
        .unwrap()
        .call;
    let in_progress = CallUpdate {
        status: Some(CallStatus::InProgress),
        ..CallUpdate::default()
    };
    let saved = engine.update_call(Some(&d.agent), &call.call_id, in_progress).unwrap();
    assert_eq!(saved.call.status, CallStatus::InProgress);
    assert!(saved.effects.is_none());

    assert_eq!(engine.store().get_user(&d.agent.id).unwrap().total_calls, 0);
    assert_eq!(notifier.count("call_completed"), 0);
}

#[test]
fn completed_is_terminal() {
    let (engine, _) = build_engine();
    let d = desk(&engine);
    let call = engine
        .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
        .unwrap()
        .call;
    engine
        .update_call(Some(&d.agent), &call.call_id, CallUpdate::completed(CallOutcome::Converted))
        .unwrap();

    let reopen = CallUpdate {
        status: Some(CallStatus::InProgress),
        ..CallUpdate::default()
    };
    assert!(matches!(
        engine.update_call(Some(&d.agent), &call.call_id, reopen),
        Err(CrmError::Validation(_))
    ));
    assert_eq!(engine.store().get_user(&d.agent.id).unwrap().total_calls, 1);
}

#[test]
fn call_logged_as_completed_counts_immediately() {
    let (engine, notifier) = build_engine();
    let d = desk(&engine);
    let mut new = NewCall::new(&d.lead_id, &d.agent.id);
    new.status = CallStatus::Completed;
    new.outcome = Some(CallOutcome::Converted);
    new.lead_status = Some(LeadStatus::Converted);

    let saved = engine.log_call(Some(&d.agent), new).unwrap();

    assert!(saved.call.is_successful);
    assert_eq!(saved.call.lead_status_before, LeadStatus::New);
    assert_eq!(saved.call.lead_status_after, Some(LeadStatus::Converted));
    let agent = engine.store().get_user(&d.agent.id).unwrap();
    assert_eq!((agent.total_calls, agent.successful_calls), (1, 1));
    assert_eq!(notifier.count("call_completed"), 1);
    assert!(matches!(
        notifier.events().last(),
        Some(CrmEvent::CallCompleted { successful: true, .. })
    ));
}

#[test]
fn agents_log_calls_only_for_themselves() {
    let (engine, _) = build_engine();
    let d = desk(&engine);
    let other = engine
        .create_user(Some(&d.root), NewUser::new("Tom", "tom@crm.test", Role::Telecaller))
        .unwrap();
    let other = engine.identity(&other.user_id).unwrap();

    assert!(matches!(
        engine.log_call(Some(&other), NewCall::new(&d.lead_id, &d.agent.id)),
        Err(CrmError::Authorization { .. })
    ));
    let call = engine
        .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
        .unwrap()
        .call;
    assert!(matches!(
        engine.update_call(Some(&other), &call.call_id, CallUpdate::completed(CallOutcome::Busy)),
        Err(CrmError::Authorization { .. })
    ));
    // Admins may act on anyone's calls.
    assert!(engine
        .update_call(Some(&d.root), &call.call_id, CallUpdate::completed(CallOutcome::Busy))
        .is_ok());
}

#[test]
fn bad_call_input_is_rejected() {
    let (engine, _) = build_engine();
    let d = desk(&engine);
    let mut backwards = NewCall::new(&d.lead_id, &d.agent.id);
    backwards.start_time = Some(engine.clock().now());
    backwards.end_time = Some(engine.clock().now() - Duration::minutes(1));
    assert!(matches!(
        engine.log_call(Some(&d.agent), backwards),
        Err(CrmError::Validation(_))
    ));
    assert!(matches!(
        engine.log_call(Some(&d.agent), NewCall::new("lead-missing", &d.agent.id)),
        Err(CrmError::NotFound { .. })
    ));
}

#[test]
fn reviews_are_bounded_and_gated() {
    let (engine, notifier) = build_engine();
    let d = desk(&engine);
    let call = engine
        .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
        .unwrap()
        .call;

    assert!(matches!(
        engine.review_call(Some(&d.agent), &call.call_id, 4, None),
        Err(CrmError::Authorization { .. })
    ));
    assert!(matches!(
        engine.review_call(Some(&d.root), &call.call_id, 6, None),
        Err(CrmError::Validation(_))
    ));
    engine
        .review_call(Some(&d.root), &call.call_id, 4, Some("good opener"))
        .unwrap();

    let stored = engine.store().get_call(&call.call_id).unwrap();
    assert_eq!(stored.reviewed_by.as_deref(), Some(d.root.id.as_str()));
    assert_eq!(stored.review_rating, Some(4));
    assert_eq!(notifier.count("call_reviewed"), 1);
}

#[test]
fn statistics_reflect_completed_calls() {
    let (engine, _) = build_engine();
    let d = desk(&engine);
    for outcome in [CallOutcome::Interested, CallOutcome::NoAnswer] {
        let call = engine
            .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
            .unwrap()
            .call;
        engine
            .update_call(Some(&d.agent), &call.call_id, CallUpdate::completed(outcome))
            .unwrap();
    }

    let stats = engine.user_statistics(Some(&d.agent), &d.agent.id).unwrap();
    assert_eq!(stats.total_calls, 2);
    assert_eq!(stats.successful_calls, 1);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(stats.total_leads, 1);
    assert_eq!(stats.open_leads, 1);
}

#[test]
fn completed_outcome_cannot_be_rewritten() {
    let (engine, _) = build_engine();
    let d = desk(&engine);
    let call = engine
        .log_call(Some(&d.agent), NewCall::new(&d.lead_id, &d.agent.id))
        .unwrap()
        .call;
    engine
        .update_call(Some(&d.agent), &call.call_id, CallUpdate::completed(CallOutcome::Converted))
        .unwrap();

    let flip = CallUpdate {
        outcome: Some(CallOutcome::NoAnswer),
        ..CallUpdate::default()
    };
    assert!(matches!(
        engine.update_call(Some(&d.agent), &call.call_id, flip),
        Err(CrmError::Validation(_))
    ));

    // Notes may still be edited; the outcome and the counters stay consistent.
    let notes = CallUpdate {
        notes: Some("asked for brochure".into()),
        ..CallUpdate::default()
    };
    engine.update_call(Some(&d.agent), &call.call_id, notes).unwrap();
    let stored = engine.store().get_call(&call.call_id).unwrap();
    assert_eq!(stored.outcome, Some(CallOutcome::Converted));
    assert!(stored.is_successful);
    let agent = engine.store().get_user(&d.agent.id).unwrap();
    assert_eq!((agent.total_calls, agent.successful_calls), (1, 1));
}
