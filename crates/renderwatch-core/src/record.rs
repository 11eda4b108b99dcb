//! Normalized job snapshots.
//!
//! The render queue reports each job as a loose key/value record and serves
//! its live status through a second lookup. [`JobRecord::normalize`] merges the
//! two and fills in the optional fields so successive snapshots of one job can
//! always be compared key-for-key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A record exactly as the render queue returned it.
pub type RawRecord = Map<String, Value>;

// ---------------------------------------------------------------------------
// Field names reported by the render queue
// ---------------------------------------------------------------------------

pub mod fields {
    pub const JOB_ID: &str = "JobId";
    pub const JOB_NAME: &str = "RenderJobName";
    pub const TARGET_DIR: &str = "TargetDir";
    pub const TIMELINE_NAME: &str = "TimelineName";
    pub const STATUS: &str = "JobStatus";
    pub const COMPLETION_PERCENTAGE: &str = "CompletionPercentage";
    pub const TIME_REMAINING_MS: &str = "EstimatedTimeRemainingInMs";
    pub const TIME_TAKEN_MS: &str = "TimeTakenToRenderInMs";
    pub const ERROR: &str = "Error";
    pub const MARK_IN: &str = "MarkIn";
    pub const MARK_OUT: &str = "MarkOut";

    /// Optional fields defaulted to `false` when the queue omits them.
    pub const DEFAULTED: &[&str] = &[
        TIME_TAKEN_MS,
        TIME_REMAINING_MS,
        COMPLETION_PERCENTAGE,
        ERROR,
    ];
}

/// Truthiness as the render queue means it: `false`, `null`, zero and empty
/// values carry no information.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a value for display without JSON quoting.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobRecord(BTreeMap<String, Value>);

impl JobRecord {
    /// Merge a raw record with its status lookup. Status keys win on conflict;
    /// optional fields absent from both are set to `false`.
    pub fn normalize(raw: &RawRecord, status: &RawRecord) -> Self {
        let mut merged: BTreeMap<String, Value> = raw
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in status {
            merged.insert(k.clone(), v.clone());
        }
        for field in fields::DEFAULTED {
            merged
                .entry((*field).to_string())
                .or_insert(Value::Bool(false));
        }
        Self(merged)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }

    /// The field's value when it carries information, see [`is_truthy`].
    pub fn truthy(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| is_truthy(v))
    }

    pub fn job_id(&self) -> Option<&str> {
        self.get_str(fields::JOB_ID)
    }

    pub fn status(&self) -> Option<&str> {
        self.get_str(fields::STATUS)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Three-way structural diff from `self` to `newer`.
    pub fn diff(&self, newer: &JobRecord) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();
        for (key, old) in &self.0 {
            match newer.0.get(key) {
                Some(new) if new != old => {
                    diff.changed
                        .insert(key.clone(), (old.clone(), new.clone()));
                }
                Some(_) => {}
                None => {
                    diff.removed.insert(key.clone(), old.clone());
                }
            }
        }
        for (key, new) in &newer.0 {
            if !self.0.contains_key(key) {
                diff.added.insert(key.clone(), new.clone());
            }
        }
        diff
    }
}

impl FromIterator<(String, Value)> for JobRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// SnapshotDiff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotDiff {
    pub added: BTreeMap<String, Value>,
    pub changed: BTreeMap<String, (Value, Value)>,
    pub removed: BTreeMap<String, Value>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn changed_field(&self, field: &str) -> Option<(&Value, &Value)> {
        self.changed.get(field).map(|(old, new)| (old, new))
    }
}
