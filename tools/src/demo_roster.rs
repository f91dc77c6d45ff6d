//! Deterministic demo roster.
//!
//! Same seed, same people, same leads. All randomness comes from one PCG
//! stream so a demo database can be rebuilt exactly.

use anyhow::Result;
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use telecrm_core::{
    assignment_engine::{LeadAssignment, NewLead},
    engine::CrmEngine,
    team_directory::NewUser,
    types::{AgentStatus, LeadPriority, Role},
};

/// Telecallers per supervisor in the generated roster.
const TEAM_SIZE: usize = 4;
/// Leads ingested per telecaller.
const LEADS_PER_AGENT: usize = 3;

const FIRST_NAMES: &[&str] = &[
    "Aarav", "Amara", "Bianca", "Chen", "Dmitri", "Elena", "Farah", "Gabriel", "Hana", "Ibrahim",
    "Jonas", "Keiko", "Leila", "Mateo", "Nadia", "Omar", "Priya", "Quinn", "Rosa", "Sanjay",
    "Tomas", "Uma", "Viktor", "Wen", "Yusuf", "Zara",
];

const LAST_NAMES: &[&str] = &[
    "Abbott", "Banerjee", "Castillo", "Dubois", "Eriksen", "Fischer", "Garcia", "Hughes", "Iyer",
    "Jensen", "Kowalski", "Lindqvist", "Moreau", "Nakamura", "Okafor", "Petrov", "Rossi", "Santos",
    "Tanaka", "Varga", "Walsh", "Yilmaz",
];

const LEAD_SOURCES: &[&str] = &["website", "referral", "campaign", "walk_in", "partner"];

pub struct DemoRng {
    inner: Pcg64Mcg,
}

impl DemoRng {
    pub fn new(seed: u64) -> Self {
        Self { inner: Pcg64Mcg::seed_from_u64(seed) }
    }

    /// Roll a u64 in [0, n). `n` must be non-zero.
    pub fn below(&mut self, n: u64) -> u64 {
        self.inner.next_u64() % n.max(1)
    }

    pub fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items[self.below(items.len() as u64) as usize]
    }

    pub fn full_name(&mut self) -> String {
        format!("{} {}", self.pick(FIRST_NAMES), self.pick(LAST_NAMES))
    }

    /// Ten-digit phone number in the 555 test range.
    pub fn phone(&mut self) -> String {
        format!("+1555{:07}", self.below(10_000_000))
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct DemoSummary {
    pub admin_id: String,
    pub supervisors: usize,
    pub telecallers: usize,
    pub leads: usize,
    pub unassigned_leads: usize,
}

/// Populate an empty database with one admin, `telecallers` agents split
/// into teams, and auto-assigned leads.
pub fn seed_demo(engine: &CrmEngine, telecallers: usize, seed: u64) -> Result<DemoSummary> {
    let mut rng = DemoRng::new(seed);
    let admin = engine.bootstrap_admin(NewUser::new("Demo Admin", "admin@demo.crm", Role::Admin))?;
    let root = engine.identity(&admin.user_id)?;
    let mut summary = DemoSummary { admin_id: admin.user_id.clone(), ..Default::default() };

    let mut supervisor_id = None;
    for n in 0..telecallers {
        if n % TEAM_SIZE == 0 {
            let name = rng.full_name();
            let email = format!("supervisor{}@demo.crm", summary.supervisors + 1);
            let supervisor = engine.create_user(
                Some(&root),
                NewUser::new(&name, &email, Role::Supervisor).in_department("sales"),
            )?;
            supervisor_id = Some(supervisor.user_id);
            summary.supervisors += 1;
        }

        let name = rng.full_name();
        let email = format!("agent{}@demo.crm", n + 1);
        let mut new = NewUser::new(&name, &email, Role::Telecaller).in_department("sales");
        if let Some(id) = &supervisor_id {
            new = new.with_supervisor(id);
        }
        let agent = engine.create_user(Some(&root), new)?;
        let status = match rng.below(4) {
            0 => AgentStatus::Break,
            1 => AgentStatus::Offline,
            _ => AgentStatus::Available,
        };
        engine.set_availability(Some(&root), &agent.user_id, status != AgentStatus::Offline, status)?;
        summary.telecallers += 1;
    }

    for _ in 0..telecallers * LEADS_PER_AGENT {
        let mut lead = NewLead::new(&rng.full_name(), &rng.phone()).from_source(rng.pick(LEAD_SOURCES));
        lead.priority = match rng.below(10) {
            0 => LeadPriority::Urgent,
            1 | 2 => LeadPriority::High,
            3..=5 => LeadPriority::Medium,
            _ => LeadPriority::Low,
        };
        let lead = engine.ingest_lead(lead, LeadAssignment::Auto)?;
        if lead.assigned_to.is_none() {
            summary.unassigned_leads += 1;
        }
        summary.leads += 1;
    }

    log::info!(
        "demo roster: {} supervisors, {} telecallers, {} leads ({} unassigned)",
        summary.supervisors,
        summary.telecallers,
        summary.leads,
        summary.unassigned_leads
    );
    Ok(summary)
}
