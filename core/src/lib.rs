//! Authorization and lead-distribution core of a telecalling CRM.
//!
//! Components, leaves first:
//!   team_directory          users and the supervisor/team relationship
//!   authorization_gate      role and ownership predicates over an explicit identity
//!   assignment_engine       who owns each lead
//!   call_outcome_processor  effects of a completed call
//!
//! `engine::CrmEngine` wires them to the store, the event log and the notifier.

pub mod assignment_engine;
pub mod authorization_gate;
pub mod call_outcome_processor;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod notifier;
pub mod store;
pub mod team_directory;
pub mod types;
