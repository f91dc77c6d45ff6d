//! Shared primitive types used across the whole CRM core.

use crate::error::CrmError;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Stable identifier of a user (admin, supervisor or telecaller).
pub type UserId = String;

/// Stable identifier of a lead.
pub type LeadId = String;

/// Stable identifier of a call.
pub type CallId = String;

/// Every instant the core records is UTC.
pub type Timestamp = DateTime<Utc>;

/// Timestamps are persisted as Unix milliseconds.
pub fn to_millis(ts: Timestamp) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Timestamp {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Declares a closed string enum that round-trips through serde, `FromStr`
/// and SQLite TEXT columns using the same snake_case spelling.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = CrmError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(CrmError::Validation(format!(
                        "invalid {} value '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: CrmError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum! {
    /// Position in the role hierarchy.
    Role {
        Admin      => "admin",
        Supervisor => "supervisor",
        Telecaller => "telecaller",
    }
}

text_enum! {
    /// What an agent is doing right now.
    AgentStatus {
        Available => "available",
        Busy      => "busy",
        Break     => "break",
        Offline   => "offline",
    }
}

text_enum! {
    /// Pipeline stage of a lead.
    LeadStatus {
        New           => "new",
        Contacted     => "contacted",
        Interested    => "interested",
        NotInterested => "not_interested",
        FollowUp      => "follow_up",
        Converted     => "converted",
        Closed        => "closed",
    }
}

text_enum! {
    LeadPriority {
        Low    => "low",
        Medium => "medium",
        High   => "high",
        Urgent => "urgent",
    }
}

text_enum! {
    CallStatus {
        Scheduled  => "scheduled",
        InProgress => "in_progress",
        Completed  => "completed",
        Missed     => "missed",
        Cancelled  => "cancelled",
        Failed     => "failed",
    }
}

text_enum! {
    /// How a call ended from the customer's side.
    CallOutcome {
        Interested        => "interested",
        NotInterested     => "not_interested",
        CallbackRequested => "callback_requested",
        NoAnswer          => "no_answer",
        Busy              => "busy",
        WrongNumber       => "wrong_number",
        Voicemail         => "voicemail",
        Converted         => "converted",
    }
}

impl Role {
    /// Supervisors and admins may own a team and see everyone's resources.
    pub fn is_manager(&self) -> bool {
        matches!(self, Role::Admin | Role::Supervisor)
    }
}

impl CallOutcome {
    /// The `is_successful` flag of a call is derived from its outcome.
    pub fn is_successful(&self) -> bool {
        matches!(
            self,
            CallOutcome::Interested | CallOutcome::CallbackRequested | CallOutcome::Converted
        )
    }
}
