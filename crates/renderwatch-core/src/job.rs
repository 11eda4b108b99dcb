use crate::classifier::{classify, ChangeKind, Classification, ClassifiedChange};
use crate::error::Result;
use crate::event::ResolveEvent;
use crate::format::precise_duration;
use crate::history::{HistoryEntry, JobHistory};
use crate::record::{display_value, fields, JobRecord};
use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// JobUpdate
// ---------------------------------------------------------------------------

/// Result of feeding a snapshot to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Unchanged,
    Changed {
        /// Events to emit, in order. One primary event, preceded by
        /// `RenderJobProgressInitialUpdate` on the job's first progress report.
        events: Vec<ResolveEvent>,
        change: ClassifiedChange,
    },
}

impl JobUpdate {
    pub fn events(&self) -> &[ResolveEvent] {
        match self {
            JobUpdate::Unchanged => &[],
            JobUpdate::Changed { events, .. } => events,
        }
    }
}

// ---------------------------------------------------------------------------
// RenderJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RenderJob {
    pub id: String,
    pub name: Option<String>,
    pub target_directory: Option<String>,
    pub timeline_name: Option<String>,
    pub status: Option<String>,
    pub completion_percent: Option<String>,
    pub time_elapsed: Option<String>,
    pub time_remaining: Option<String>,
    pub job_frame_count: Option<i64>,
    pub job_average_fps: Option<i64>,
    pub timestamp_short: String,
    pub line_completion_percent: String,
    pub line_time_remaining: String,
    pub line_time_elapsed: String,
    pub line_average_fps: String,
    /// Timestamp of the last poll that observed this job.
    pub last_touched: i64,
    #[serde(skip)]
    progress_initial_update: bool,
    #[serde(skip)]
    history: JobHistory,
}

impl RenderJob {
    /// Build a job from its first snapshot. The snapshot becomes the first
    /// history entry.
    pub fn new(id: impl Into<String>, snapshot: JobRecord, now: i64, history_limit: usize) -> Self {
        let mut job = Self {
            id: id.into(),
            name: None,
            target_directory: None,
            timeline_name: None,
            status: None,
            completion_percent: None,
            time_elapsed: None,
            time_remaining: None,
            job_frame_count: None,
            job_average_fps: None,
            timestamp_short: String::new(),
            line_completion_percent: String::new(),
            line_time_remaining: String::new(),
            line_time_elapsed: String::new(),
            line_average_fps: String::new(),
            last_touched: now,
            progress_initial_update: true,
            history: JobHistory::new(history_limit),
        };
        job.refresh_display(&snapshot, now);
        job.history.append(now, snapshot);
        job
    }

    /// Apply a new snapshot. Unchanged snapshots only refresh `last_touched`;
    /// changed ones are classified and appended to history.
    pub fn update(&mut self, snapshot: JobRecord, now: i64) -> Result<JobUpdate> {
        self.last_touched = now;
        self.refresh_display(&snapshot, now);

        let classification = classify(&self.history.latest()?.snapshot, &snapshot);
        let change = match classification {
            Classification::NoChange => return Ok(JobUpdate::Unchanged),
            Classification::Changed(change) => change,
        };

        let mut events = Vec::with_capacity(2);
        match change.kind {
            ChangeKind::Started => events.push(ResolveEvent::RenderJobStarted),
            ChangeKind::Completed => events.push(ResolveEvent::RenderJobCompleted),
            ChangeKind::Cancelled => events.push(ResolveEvent::RenderJobCancelled),
            ChangeKind::Failed => events.push(ResolveEvent::RenderJobFailed),
            ChangeKind::Reset => events.push(ResolveEvent::RenderJobReset),
            ChangeKind::Progress => {
                if self.progress_initial_update {
                    self.progress_initial_update = false;
                    events.push(ResolveEvent::RenderJobProgressInitialUpdate);
                }
                events.push(ResolveEvent::RenderJobProgress);
            }
            ChangeKind::Misc => events.push(ResolveEvent::RenderJobChangeMisc),
        }

        self.history.append(now, snapshot);
        Ok(JobUpdate::Changed { events, change })
    }

    pub fn latest(&self) -> Result<&HistoryEntry> {
        self.history.latest()
    }

    pub fn history(&self) -> &JobHistory {
        &self.history
    }

    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    /// Values available to `{field}` placeholders in message templates.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        fn opt(v: &Option<String>) -> String {
            v.clone().unwrap_or_default()
        }
        fn num(v: Option<i64>) -> String {
            v.map(|n| n.to_string()).unwrap_or_default()
        }

        let mut attrs = BTreeMap::new();
        attrs.insert("id".to_string(), self.id.clone());
        attrs.insert("name".to_string(), opt(&self.name));
        attrs.insert("target_directory".to_string(), opt(&self.target_directory));
        attrs.insert("timeline_name".to_string(), opt(&self.timeline_name));
        attrs.insert("status".to_string(), opt(&self.status));
        attrs.insert("completion_percent".to_string(), opt(&self.completion_percent));
        attrs.insert("time_elapsed".to_string(), opt(&self.time_elapsed));
        attrs.insert("time_remaining".to_string(), opt(&self.time_remaining));
        attrs.insert("job_frame_count".to_string(), num(self.job_frame_count));
        attrs.insert("job_average_fps".to_string(), num(self.job_average_fps));
        attrs.insert("timestamp_short".to_string(), self.timestamp_short.clone());
        attrs.insert(
            "line_completion_percent".to_string(),
            self.line_completion_percent.clone(),
        );
        attrs.insert(
            "line_time_remaining".to_string(),
            self.line_time_remaining.clone(),
        );
        attrs.insert("line_time_elapsed".to_string(), self.line_time_elapsed.clone());
        attrs.insert("line_average_fps".to_string(), self.line_average_fps.clone());
        attrs
    }

    // -----------------------------------------------------------------------
    // Display fields
    // -----------------------------------------------------------------------

    fn refresh_display(&mut self, snapshot: &JobRecord, now: i64) {
        let text = |field: &str| snapshot.get(field).map(display_value);

        self.timestamp_short = Local
            .timestamp_opt(now, 0)
            .single()
            .map(|t: DateTime<Local>| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        self.name = text(fields::JOB_NAME);
        self.target_directory = text(fields::TARGET_DIR);
        self.timeline_name = text(fields::TIMELINE_NAME);
        self.status = text(fields::STATUS);

        if let Some(pct) = snapshot.truthy(fields::COMPLETION_PERCENTAGE) {
            let pct = format!("{}%", display_value(pct));
            self.line_completion_percent = format!("\nJob completion was: {pct}");
            self.completion_percent = Some(pct);
        }

        if let Some(ms) = snapshot.truthy(fields::TIME_REMAINING_MS).and_then(as_millis) {
            self.time_remaining = Some(precise_duration(ms));
        }
        if let (Some(remaining), Some(pct)) = (&self.time_remaining, &self.completion_percent) {
            self.line_time_remaining = format!("\n{pct} - Remaining: ~{remaining}");
        }

        if let Some(ms) = snapshot.truthy(fields::TIME_TAKEN_MS).and_then(as_millis) {
            let elapsed = precise_duration(ms);
            self.line_time_elapsed = format!("\nRender time was: {elapsed}");
            self.time_elapsed = Some(elapsed);

            if let (Some(mark_in), Some(mark_out)) = (
                snapshot.get_i64(fields::MARK_IN),
                snapshot.get_i64(fields::MARK_OUT),
            ) {
                let frames = mark_out
                    .checked_sub(mark_in)
                    .and_then(|span| span.checked_add(1));
                self.job_frame_count = frames;
                if let Some(fps) = frames.and_then(|frames| average_fps(frames, ms)) {
                    self.job_average_fps = Some(fps);
                    self.line_average_fps = format!("\nRender speed (avg): ~{fps} FPS");
                }
            }
        }
    }
}

fn as_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

/// Whole frames per second over whole elapsed seconds; `None` under one second.
pub fn average_fps(frame_count: i64, elapsed_ms: i64) -> Option<i64> {
    let seconds = elapsed_ms / 1000;
    if seconds == 0 {
        return None;
    }
    frame_count.checked_div_euclid(seconds)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
