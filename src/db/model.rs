//! Records returned by the seen-state repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A listing id together with the moment it was first handled. Never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SeenRecord {
    pub listing_id: String,
    pub first_seen_at: DateTime<Utc>,
}
