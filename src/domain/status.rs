//! Snapshot type describing the state of the current (or last) update run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of an update run.
///
/// Counters only move while `is_updating` is set; the whole record is reset
/// when a run starts so a snapshot always describes a single run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub is_updating: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_end: Option<DateTime<Utc>>,

    /// Artists upserted so far this run.
    pub artists: u64,
    /// Albums upserted so far this run.
    pub albums: u64,
    /// Pages that passed the change filter so far this run.
    pub pages: u64,

    /// Messages of non-fatal errors accumulated this run.
    pub errors: Vec<String>,
}
