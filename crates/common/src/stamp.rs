//! Creation/update timestamps embedded by every persisted record.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Returns the current time truncated to microseconds.
///
/// PostgreSQL stores `timestamptz` with microsecond precision; truncating up
/// front keeps in-memory values, stored rows and published events identical.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Shared record timestamps, embedded by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStamp {
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecordStamp {
    /// Creates a stamp for a record created right now.
    pub fn new() -> Self {
        Self::created_at(now())
    }

    /// Creates a stamp for a record created at the given instant.
    pub fn created_at(at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            updated_at: None,
        }
    }

    /// Records a modification.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
}

impl Default for RecordStamp {
    fn default() -> Self {
        Self::new()
    }
}
