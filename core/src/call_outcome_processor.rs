//! Call outcome processor: what a completed call does to its lead and agent.
//!
//! RULE: effects apply exactly once, on the transition into `completed`.
//! Each save holds the write lock from its first read, so saves of one call
//! run one after the other; a save that finds the call already completed
//! changes no statistics. `completed` is terminal, and so is its outcome.

use crate::{
    config::ReviewConfig,
    error::{CrmError, CrmResult},
    event::CrmEvent,
    store::CrmStore,
    types::{CallId, CallOutcome, CallStatus, LeadId, LeadStatus, Timestamp, UserId},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: CallId,
    pub telecaller_id: UserId,
    pub lead_id: LeadId,
    pub status: CallStatus,
    pub outcome: Option<CallOutcome>,
    pub is_successful: bool,
    /// Lead status when the call was logged. Never rewritten.
    pub lead_status_before: LeadStatus,
    /// Lead status applied after completion. Written at most once.
    pub lead_status_after: Option<LeadStatus>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub duration_secs: Option<i64>,
    pub notes: Option<String>,
    pub reviewed_by: Option<UserId>,
    pub review_rating: Option<u8>,
    pub review_comment: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCall {
    pub lead_id: LeadId,
    pub telecaller_id: UserId,
    #[serde(default = "default_call_status")]
    pub status: CallStatus,
    #[serde(default)]
    pub outcome: Option<CallOutcome>,
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub end_time: Option<Timestamp>,
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Lead status to apply if the call is logged already completed.
    #[serde(default)]
    pub lead_status: Option<LeadStatus>,
}

fn default_call_status() -> CallStatus {
    CallStatus::Scheduled
}

impl NewCall {
    pub fn new(lead_id: &str, telecaller_id: &str) -> Self {
        Self {
            lead_id: lead_id.to_string(),
            telecaller_id: telecaller_id.to_string(),
            status: default_call_status(),
            outcome: None,
            start_time: None,
            end_time: None,
            duration_secs: None,
            notes: None,
            lead_status: None,
        }
    }
}

/// Partial update of a call. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallUpdate {
    #[serde(default)]
    pub status: Option<CallStatus>,
    #[serde(default)]
    pub outcome: Option<CallOutcome>,
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub end_time: Option<Timestamp>,
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Post-call lead status, applied only on completion.
    #[serde(default)]
    pub lead_status: Option<LeadStatus>,
}

impl CallUpdate {
    pub fn completed(outcome: CallOutcome) -> Self {
        Self {
            status: Some(CallStatus::Completed),
            outcome: Some(outcome),
            ..Self::default()
        }
    }

    pub fn with_lead_status(mut self, status: LeadStatus) -> Self {
        self.lead_status = Some(status);
        self
    }
}

/// Mutations performed by one genuine completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEffects {
    pub lead_id: LeadId,
    pub telecaller_id: UserId,
    pub contacted_at: Timestamp,
    pub lead_status_after: Option<LeadStatus>,
    pub successful: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSave {
    pub call: CallRecord,
    /// `Some` only when this save completed the call.
    pub effects: Option<OutcomeEffects>,
    pub events: Vec<CrmEvent>,
}

pub struct CallOutcomeProcessor<'a> {
    store: &'a CrmStore,
}

impl<'a> CallOutcomeProcessor<'a> {
    pub fn new(store: &'a CrmStore) -> Self {
        Self { store }
    }

    /// Record a call, snapshotting the lead's current status.
    pub fn log_call(&self, new: NewCall, now: Timestamp) -> CrmResult<CallSave> {
        validate_times(new.start_time, new.end_time, new.duration_secs)?;
        self.store.with_transaction(|store| {
            let lead = store.get_lead(&new.lead_id)?;
            store.get_user(&new.telecaller_id)?;

            let mut call = CallRecord {
                call_id: format!("call-{}", Uuid::new_v4().simple()),
                telecaller_id: new.telecaller_id.clone(),
                lead_id: new.lead_id.clone(),
                status: new.status,
                outcome: new.outcome,
                is_successful: new.outcome.is_some_and(|o| o.is_successful()),
                lead_status_before: lead.status,
                lead_status_after: None,
                start_time: new.start_time,
                end_time: new.end_time,
                duration_secs: new.duration_secs,
                notes: new.notes.clone(),
                reviewed_by: None,
                review_rating: None,
                review_comment: None,
                created_at: now,
            };
            store.insert_call(&call)?;
            let mut events = vec![CrmEvent::CallLogged {
                call_id: call.call_id.clone(),
                lead_id: call.lead_id.clone(),
                telecaller_id: call.telecaller_id.clone(),
            }];

            // Logged straight into `completed` is a genuine transition.
            let effects = if call.status == CallStatus::Completed {
                let effects = Self::apply_completion(store, &call, new.lead_status, now)?;
                call.lead_status_after = effects.lead_status_after;
                events.push(completion_event(&call, &effects));
                Some(effects)
            } else {
                None
            };
            Ok(CallSave { call, effects, events })
        })
    }

    /// Apply an update; runs the outcome bookkeeping when this save moves
    /// the call into `completed`.
    pub fn update_call(&self, call_id: &str, update: CallUpdate, now: Timestamp) -> CrmResult<CallSave> {
        self.store.with_transaction(|store| {
            let old = store.get_call(call_id)?;
            let mut call = old.clone();

            if old.status == CallStatus::Completed
                && update.outcome.is_some_and(|o| Some(o) != old.outcome)
            {
                return Err(CrmError::Validation(format!(
                    "call '{call_id}' is completed; its outcome can no longer change"
                )));
            }

            if let Some(outcome) = update.outcome {
                call.outcome = Some(outcome);
            }
            call.is_successful = call.outcome.is_some_and(|o| o.is_successful());
            if update.start_time.is_some() {
                call.start_time = update.start_time;
            }
            if update.end_time.is_some() {
                call.end_time = update.end_time;
            }
            if update.duration_secs.is_some() {
                call.duration_secs = update.duration_secs;
            }
            if update.notes.is_some() {
                call.notes = update.notes.clone();
            }
            validate_times(call.start_time, call.end_time, call.duration_secs)?;

            let new_status = update.status.unwrap_or(old.status);
            if old.status == CallStatus::Completed && new_status != CallStatus::Completed {
                return Err(CrmError::Validation(format!(
                    "call '{call_id}' is completed and cannot move to {new_status}"
                )));
            }

            store.save_call_details(&call)?;

            let mut events = Vec::new();
            let mut effects = None;
            if new_status != old.status {
                if !store.transition_call_status(call_id, old.status, new_status)? {
                    return Err(CrmError::Other(anyhow::anyhow!(
                        "call '{call_id}' left status {} inside its own transaction",
                        old.status
                    )));
                }
                call.status = new_status;
                if new_status == CallStatus::Completed {
                    let applied = Self::apply_completion(store, &call, update.lead_status, now)?;
                    call.lead_status_after = applied.lead_status_after;
                    events.push(completion_event(&call, &applied));
                    effects = Some(applied);
                }
            } else if update.lead_status.is_some() {
                log::debug!("call {call_id}: lead status ignored, no completion in this save");
            }
            Ok(CallSave { call, effects, events })
        })
    }

    fn apply_completion(
        store: &CrmStore,
        call: &CallRecord,
        supplied_status: Option<LeadStatus>,
        now: Timestamp,
    ) -> CrmResult<OutcomeEffects> {
        let contacted_at = call.end_time.or(call.start_time).unwrap_or(now);
        store.record_contact(&call.lead_id, contacted_at, supplied_status)?;

        let mut lead_status_after = None;
        if let Some(status) = supplied_status {
            store.set_lead_status_after(&call.call_id, status)?;
            lead_status_after = store.get_call(&call.call_id)?.lead_status_after;
        }

        store.record_call_stats(&call.telecaller_id, call.is_successful)?;
        log::info!(
            "call {} completed: lead {} contacted, telecaller {} successful={}",
            call.call_id,
            call.lead_id,
            call.telecaller_id,
            call.is_successful
        );
        Ok(OutcomeEffects {
            lead_id: call.lead_id.clone(),
            telecaller_id: call.telecaller_id.clone(),
            contacted_at,
            lead_status_after,
            successful: call.is_successful,
        })
    }

    pub fn review_call(
        &self,
        call_id: &str,
        reviewer_id: &str,
        rating: u8,
        comment: Option<&str>,
        limits: &ReviewConfig,
    ) -> CrmResult<Vec<CrmEvent>> {
        if rating < limits.min_rating || rating > limits.max_rating {
            return Err(CrmError::Validation(format!(
                "rating {rating} outside {}..={}",
                limits.min_rating, limits.max_rating
            )));
        }
        self.store.save_review(call_id, reviewer_id, rating, comment)?;
        Ok(vec![CrmEvent::CallReviewed {
            call_id: call_id.to_string(),
            reviewed_by: reviewer_id.to_string(),
            rating,
        }])
    }
}

fn completion_event(call: &CallRecord, effects: &OutcomeEffects) -> CrmEvent {
    CrmEvent::CallCompleted {
        call_id: call.call_id.clone(),
        lead_id: call.lead_id.clone(),
        telecaller_id: call.telecaller_id.clone(),
        successful: effects.successful,
        lead_status_after: effects.lead_status_after,
        contacted_at: effects.contacted_at,
    }
}

fn validate_times(
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    duration_secs: Option<i64>,
) -> CrmResult<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(CrmError::Validation("call end_time precedes start_time".into()));
        }
    }
    if duration_secs.is_some_and(|d| d < 0) {
        return Err(CrmError::Validation("call duration must not be negative".into()));
    }
    Ok(())
}
