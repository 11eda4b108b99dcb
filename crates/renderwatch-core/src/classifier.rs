use crate::record::{fields, is_truthy, JobRecord, SnapshotDiff};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Render job states reported by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Ready,
    Rendering,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Ready => "Ready",
            JobStatus::Rendering => "Rendering",
            JobStatus::Complete => "Complete",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ChangeKind
// ---------------------------------------------------------------------------

/// What semantically happened between two snapshots of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Started,
    Completed,
    Cancelled,
    Failed,
    Reset,
    Progress,
    Misc,
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum FromStatus {
    Is(JobStatus),
    /// Any previous status that carries a value.
    AnyTruthy,
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub from: FromStatus,
    pub to: JobStatus,
    pub kind: ChangeKind,
}

impl TransitionRule {
    fn matches(&self, old: &Value, new: &Value) -> bool {
        let from_ok = match self.from {
            FromStatus::Is(status) => old.as_str() == Some(status.as_str()),
            FromStatus::AnyTruthy => is_truthy(old),
        };
        from_ok && new.as_str() == Some(self.to.as_str())
    }
}

/// Evaluated top to bottom; the first matching rule wins.
pub const TRANSITIONS: &[TransitionRule] = &[
    TransitionRule {
        from: FromStatus::Is(JobStatus::Ready),
        to: JobStatus::Rendering,
        kind: ChangeKind::Started,
    },
    TransitionRule {
        from: FromStatus::Is(JobStatus::Complete),
        to: JobStatus::Rendering,
        kind: ChangeKind::Started,
    },
    TransitionRule {
        from: FromStatus::Is(JobStatus::Rendering),
        to: JobStatus::Complete,
        kind: ChangeKind::Completed,
    },
    TransitionRule {
        from: FromStatus::Is(JobStatus::Rendering),
        to: JobStatus::Cancelled,
        kind: ChangeKind::Cancelled,
    },
    TransitionRule {
        from: FromStatus::Is(JobStatus::Rendering),
        to: JobStatus::Failed,
        kind: ChangeKind::Failed,
    },
    TransitionRule {
        from: FromStatus::AnyTruthy,
        to: JobStatus::Ready,
        kind: ChangeKind::Reset,
    },
];

// ---------------------------------------------------------------------------
// Classification (output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedChange {
    pub kind: ChangeKind,
    /// `(old, new)` when the status field changed, whether or not a rule fired.
    pub status: Option<(Value, Value)>,
    /// New values of every changed field except the status.
    pub changes: BTreeMap<String, Value>,
    pub diff: SnapshotDiff,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    NoChange,
    Changed(ClassifiedChange),
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

pub fn classify(old: &JobRecord, new: &JobRecord) -> Classification {
    if old == new {
        return Classification::NoChange;
    }

    let diff = old.diff(new);
    let status = diff
        .changed_field(fields::STATUS)
        .map(|(o, n)| (o.clone(), n.clone()));
    let changes: BTreeMap<String, Value> = diff
        .changed
        .iter()
        .filter(|(k, _)| k.as_str() != fields::STATUS)
        .map(|(k, (_, new))| (k.clone(), new.clone()))
        .collect();

    let status_kind = status.as_ref().and_then(|(o, n)| {
        TRANSITIONS
            .iter()
            .find(|rule| rule.matches(o, n))
            .map(|rule| rule.kind)
    });

    let kind = match status_kind {
        Some(kind) => kind,
        None => match diff.changed_field(fields::COMPLETION_PERCENTAGE) {
            Some((_, pct)) if is_truthy(pct) => ChangeKind::Progress,
            _ => ChangeKind::Misc,
        },
    };

    Classification::Changed(ClassifiedChange {
        kind,
        status,
        changes,
        diff,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
