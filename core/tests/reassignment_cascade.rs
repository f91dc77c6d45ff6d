//! Lead redistribution when an agent is deactivated or deleted.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use telecrm_core::{
    assignment_engine::{AssignmentEngine, LeadAssignment, NewLead},
    authorization_gate::Identity,
    clock::CrmClock,
    config::CrmConfig,
    engine::CrmEngine,
    error::CrmError,
    notifier::RecordingNotifier,
    store::CrmStore,
    team_directory::NewUser,
    types::{LeadStatus, Role},
};

fn build_engine() -> (CrmEngine, Arc<RecordingNotifier>) {
    let store = CrmStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = CrmClock::fixed(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
    let engine = CrmEngine::new(store, CrmConfig::default(), clock, Box::new(notifier.clone()));
    (engine, notifier)
}

fn admin(engine: &CrmEngine) -> Identity {
    let admin = engine
        .bootstrap_admin(NewUser::new("Ada", "ada@crm.test", Role::Admin))
        .unwrap();
    engine.identity(&admin.user_id).unwrap()
}

fn telecaller(engine: &CrmEngine, root: &Identity, name: &str, load: i64) -> String {
    let id = engine
        .create_user(
            Some(root),
            NewUser::new(name, &format!("{}@crm.test", name.to_lowercase()), Role::Telecaller),
        )
        .unwrap()
        .user_id;
    engine.store().set_total_leads(&id, load).unwrap();
    id
}

fn give_leads(engine: &CrmEngine, owner: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            engine
                .ingest_lead(
                    NewLead::new(&format!("Lead {i}"), &format!("+1555000{i}")),
                    LeadAssignment::Manual(owner.to_string()),
                )
                .unwrap()
                .lead_id
        })
        .collect()
}

#[test]
fn open_leads_are_dealt_round_robin_over_the_sorted_pool() {
    let (engine, notifier) = build_engine();
    let root = admin(&engine);
    let leaving = telecaller(&engine, &root, "Lou", 0);
    let leads = give_leads(&engine, &leaving, 3);
    let agent_a = telecaller(&engine, &root, "Abe", 4);
    let agent_b = telecaller(&engine, &root, "Bev", 4);

    let report = engine
        .deactivate_user(Some(&root), &leaving, "resigned")
        .unwrap();

    let expected = [&agent_a, &agent_b, &agent_a];
    for (lead_id, owner) in leads.iter().zip(expected) {
        let lead = engine.store().get_lead(lead_id).unwrap();
        assert_eq!(lead.assigned_to.as_deref(), Some(owner.as_str()), "{lead_id}");
        assert_eq!(lead.reassignment_count, 1);
        assert_eq!(lead.notes.lines().count(), 1);
        assert!(lead.notes.contains("resigned"));
        assert!(lead.notes.contains(&leaving));
        assert!(!lead.auto_assigned);
    }
    assert_eq!(report.moved.len(), 3);
    assert!(report.stranded.is_empty());
    assert!(report.cascade_error.is_none());

    let store = engine.store();
    assert_eq!(store.get_user(&agent_a).unwrap().total_leads, 6);
    assert_eq!(store.get_user(&agent_b).unwrap().total_leads, 5);
    let gone = store.get_user(&leaving).unwrap();
    assert_eq!(gone.total_leads, 0);
    assert!(!gone.is_active);
    assert!(store.leads_assigned_to(&leaving).unwrap().is_empty());
    assert_eq!(notifier.count("lead_reassigned"), 3);
    assert_eq!(notifier.count("user_deactivated"), 1);
}

#[test]
fn pool_order_is_fixed_up_front() {
    let (engine, _) = build_engine();
    let root = admin(&engine);
    let leaving = telecaller(&engine, &root, "Lou", 0);
    let leads = give_leads(&engine, &leaving, 4);
    let light = telecaller(&engine, &root, "Lia", 0);
    let heavy = telecaller(&engine, &root, "Hal", 10);

    engine.deactivate_user(Some(&root), &leaving, "resigned").unwrap();

    // No re-sorting between leads: the heavy agent still gets every other lead.
    let owners: Vec<String> = leads
        .iter()
        .map(|id| engine.store().get_lead(id).unwrap().assigned_to.unwrap())
        .collect();
    assert_eq!(owners, vec![light.clone(), heavy.clone(), light, heavy]);
}

#[test]
fn closed_and_converted_leads_stay_put() {
    let (engine, _) = build_engine();
    let root = admin(&engine);
    let leaving = telecaller(&engine, &root, "Lou", 0);
    let leads = give_leads(&engine, &leaving, 3);
    let other = telecaller(&engine, &root, "Oz", 0);
    engine
        .store()
        .record_contact(&leads[0], engine.clock().now(), Some(LeadStatus::Converted))
        .unwrap();
    engine
        .store()
        .record_contact(&leads[1], engine.clock().now(), Some(LeadStatus::Closed))
        .unwrap();

    let report = engine.deactivate_user(Some(&root), &leaving, "resigned").unwrap();

    assert_eq!(report.moved, vec![(leads[2].clone(), other)]);
    for kept in &leads[..2] {
        let lead = engine.store().get_lead(kept).unwrap();
        assert_eq!(lead.assigned_to.as_deref(), Some(leaving.as_str()));
        assert_eq!(lead.reassignment_count, 0);
    }
}

#[test]
fn empty_pool_strands_leads_but_still_zeroes_load() {
    let (engine, notifier) = build_engine();
    let root = admin(&engine);
    let leaving = telecaller(&engine, &root, "Lou", 0);
    let leads = give_leads(&engine, &leaving, 2);

    let report = engine.deactivate_user(Some(&root), &leaving, "resigned").unwrap();

    assert!(report.moved.is_empty());
    assert_eq!(report.stranded, leads);
    for id in &leads {
        let lead = engine.store().get_lead(id).unwrap();
        assert_eq!(lead.assigned_to.as_deref(), Some(leaving.as_str()));
        assert_eq!(lead.reassignment_count, 0);
    }
    let gone = engine.store().get_user(&leaving).unwrap();
    assert_eq!(gone.total_leads, 0);
    assert!(!gone.is_active);
    assert_eq!(notifier.count("cascade_stranded"), 1);
}

#[test]
fn store_failure_mid_cascade_rolls_back_every_move() {
    let (engine, _) = build_engine();
    let root = admin(&engine);
    let leaving = telecaller(&engine, &root, "Lou", 0);
    let leads = give_leads(&engine, &leaving, 3);
    let agent_a = telecaller(&engine, &root, "Abe", 4);
    let agent_b = telecaller(&engine, &root, "Bev", 4);

    // The second lead's write fails.
    engine
        .store()
        .execute_raw(&format!(
            "CREATE TRIGGER fail_second_move BEFORE UPDATE OF assigned_to ON lead
             WHEN OLD.lead_id = '{}'
             BEGIN SELECT RAISE(ABORT, 'injected write failure'); END;",
            leads[1]
        ))
        .unwrap();

    let direct = AssignmentEngine::new(engine.store(), &engine.config().assignment)
        .reassign_on_agent_removal(&leaving, "resigned", engine.clock().now());
    assert!(matches!(direct, Err(CrmError::Database(_))));

    // Transactional: the first lead is not moved either.
    for id in &leads {
        let lead = engine.store().get_lead(id).unwrap();
        assert_eq!(lead.assigned_to.as_deref(), Some(leaving.as_str()), "{id}");
        assert_eq!(lead.reassignment_count, 0);
        assert!(lead.notes.is_empty());
    }
    assert_eq!(engine.store().get_user(&agent_a).unwrap().total_leads, 4);
    assert_eq!(engine.store().get_user(&agent_b).unwrap().total_leads, 4);
    assert_eq!(engine.store().get_user(&leaving).unwrap().total_leads, 0);
}

#[test]
fn deactivation_completes_when_the_cascade_fails() {
    let (engine, _) = build_engine();
    let root = admin(&engine);
    let leaving = telecaller(&engine, &root, "Lou", 0);
    let leads = give_leads(&engine, &leaving, 3);
    telecaller(&engine, &root, "Abe", 4);
    engine
        .store()
        .execute_raw(&format!(
            "CREATE TRIGGER fail_second_move BEFORE UPDATE OF assigned_to ON lead
             WHEN OLD.lead_id = '{}'
             BEGIN SELECT RAISE(ABORT, 'injected write failure'); END;",
            leads[1]
        ))
        .unwrap();

    let report = engine.deactivate_user(Some(&root), &leaving, "resigned").unwrap();

    assert!(report.cascade_error.is_some());
    assert!(report.moved.is_empty());
    assert_eq!(report.stranded, leads);
    let gone = engine.store().get_user(&leaving).unwrap();
    assert!(!gone.is_active);
    assert_eq!(gone.total_leads, 0);
}

#[test]
fn deleting_an_agent_redistributes_then_removes_the_row() {
    let (engine, notifier) = build_engine();
    let root = admin(&engine);
    let leaving = telecaller(&engine, &root, "Lou", 0);
    let leads = give_leads(&engine, &leaving, 2);
    let other = telecaller(&engine, &root, "Oz", 0);

    let report = engine.delete_user(Some(&root), &leaving, "account removed").unwrap();

    assert_eq!(report.moved.len(), 2);
    for id in &leads {
        assert_eq!(
            engine.store().get_lead(id).unwrap().assigned_to.as_deref(),
            Some(other.as_str())
        );
    }
    assert!(matches!(
        engine.store().get_user(&leaving),
        Err(CrmError::NotFound { .. })
    ));
    assert_eq!(notifier.count("user_deleted"), 1);
    assert!(engine.audit_teams().unwrap().is_empty());
}

#[test]
fn deleting_a_supervisor_severs_members_without_resupervising() {
    let (engine, _) = build_engine();
    let root = admin(&engine);
    let sup = engine
        .create_user(Some(&root), NewUser::new("Sam", "sam@crm.test", Role::Supervisor))
        .unwrap()
        .user_id;
    let spare = engine
        .create_user(Some(&root), NewUser::new("Sue", "sue@crm.test", Role::Supervisor))
        .unwrap()
        .user_id;
    let member = telecaller(&engine, &root, "Tara", 0);
    engine.assign_supervisor(Some(&root), &member, &sup).unwrap();

    engine.delete_user(Some(&root), &sup, "restructure").unwrap();

    assert!(engine.store().get_user(&member).unwrap().supervisor.is_none());
    assert!(engine.store().get_user(&spare).unwrap().team_members.is_empty());
    assert!(engine.audit_teams().unwrap().is_empty());
}

#[test]
fn supervisor_may_deactivate_only_own_members() {
    let (engine, _) = build_engine();
    let root = admin(&engine);
    let sup = engine
        .create_user(Some(&root), NewUser::new("Sam", "sam@crm.test", Role::Supervisor))
        .unwrap()
        .user_id;
    let mine = telecaller(&engine, &root, "Mia", 0);
    let other = telecaller(&engine, &root, "Ola", 0);
    engine.assign_supervisor(Some(&root), &mine, &sup).unwrap();
    let supervisor = engine.identity(&sup).unwrap();

    assert!(matches!(
        engine.deactivate_user(Some(&supervisor), &other, "no"),
        Err(CrmError::Authorization { .. })
    ));
    engine.deactivate_user(Some(&supervisor), &mine, "performance").unwrap();
    assert!(!engine.store().get_user(&mine).unwrap().is_active);
    assert!(matches!(
        engine.deactivate_user(Some(&root), &mine, "again"),
        Err(CrmError::Validation(_))
    ));

    engine.reactivate_user(Some(&root), &mine).unwrap();
    assert!(engine.store().get_user(&mine).unwrap().is_active);
}
