//! Keeps the known job set in step with each poll of the render queue.

use crate::error::Result;
use crate::event::{EventHub, EventPayload, ResolveEvent};
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::job::{JobUpdate, RenderJob};
use crate::record::{fields, JobRecord, RawRecord};
use crate::source::QueueContext;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

/// One job as returned by a poll: its record and its status lookup.
#[derive(Debug, Clone, Default)]
pub struct PolledJob {
    pub record: RawRecord,
    pub status: RawRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub created: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// JobSetReconciler
// ---------------------------------------------------------------------------

pub struct JobSetReconciler {
    jobs: BTreeMap<String, RenderJob>,
    first_run: bool,
    history_limit: usize,
    context: Option<QueueContext>,
}

impl JobSetReconciler {
    pub fn new(history_limit: usize) -> Self {
        Self {
            jobs: BTreeMap::new(),
            first_run: true,
            history_limit,
            context: None,
        }
    }

    pub fn jobs(&self) -> impl Iterator<Item = &RenderJob> {
        self.jobs.values()
    }

    pub fn job(&self, id: &str) -> Option<&RenderJob> {
        self.jobs.get(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    pub fn context(&self) -> Option<&QueueContext> {
        self.context.as_ref()
    }

    /// Forget every job. Jobs seen on the next poll count as `render_job_onload`.
    pub fn reset(&mut self) {
        self.jobs.clear();
        self.first_run = true;
    }

    /// Compare the queue's project and database with the last ones seen,
    /// emitting load/change events. A switch resets the job set.
    ///
    /// Returns true if a switch happened.
    pub fn observe_context(&mut self, context: QueueContext, hub: &EventHub) -> bool {
        let project = json!({ "project": context.project });
        let database = json!({ "database": context.database });

        let switched = match &self.context {
            None => {
                hub.emit_resolve(
                    ResolveEvent::ProjectOnload,
                    EventPayload::empty().with_data(&project),
                );
                hub.emit_resolve(
                    ResolveEvent::DbOnload,
                    EventPayload::empty().with_data(&database),
                );
                false
            }
            Some(previous) => {
                let mut switched = false;
                if previous.project != context.project {
                    hub.emit_resolve(
                        ResolveEvent::ProjectChange,
                        EventPayload::empty().with_data(&project),
                    );
                    switched = true;
                }
                if previous.database != context.database {
                    hub.emit_resolve(
                        ResolveEvent::DbChange,
                        EventPayload::empty().with_data(&database),
                    );
                    switched = true;
                }
                switched
            }
        };

        if switched {
            tracing::info!(
                project = %context.project,
                jobs = self.jobs.len(),
                "render queue context switched, clearing jobs"
            );
            self.reset();
        }
        self.context = Some(context);
        switched
    }

    /// Apply one poll. Jobs missing from `polled` are removed.
    pub fn reconcile(
        &mut self,
        polled: Vec<PolledJob>,
        now: i64,
        hub: &EventHub,
    ) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        let mut seen = HashSet::new();

        for PolledJob { record, status } in polled {
            let Some(id) = record.get(fields::JOB_ID).and_then(Value::as_str) else {
                tracing::debug!("skipping render queue entry without a JobId");
                summary.skipped += 1;
                continue;
            };
            let id = id.to_string();
            let snapshot = JobRecord::normalize(&record, &status);
            seen.insert(id.clone());

            if let Some(job) = self.jobs.get_mut(&id) {
                match job.update(snapshot, now)? {
                    JobUpdate::Unchanged => summary.unchanged += 1,
                    JobUpdate::Changed { events, change } => {
                        summary.changed += 1;
                        let data = change_data(&change.changes, change.status.as_ref());
                        for event in events {
                            hub.emit_resolve(event, EventPayload::for_job(job).with_data(&data));
                        }
                    }
                }
            } else {
                let job = RenderJob::new(id.clone(), snapshot, now, self.history_limit);
                self.jobs.insert(id.clone(), job);
                summary.created += 1;
                let event = if self.first_run {
                    ResolveEvent::RenderJobOnload
                } else {
                    ResolveEvent::RenderJobNew
                };
                if let Some(job) = self.jobs.get(&id) {
                    hub.emit_resolve(event, EventPayload::for_job(job));
                }
            }
        }

        self.first_run = false;

        let gone: Vec<String> = self
            .jobs
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in gone {
            if let Some(job) = self.jobs.remove(&id) {
                summary.removed += 1;
                hub.emit_resolve(ResolveEvent::RenderJobRemoved, EventPayload::for_job(&job));
            }
        }

        Ok(summary)
    }
}

impl Default for JobSetReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

fn change_data(changes: &BTreeMap<String, Value>, status: Option<&(Value, Value)>) -> Value {
    let mut data = json!({ "changes": changes });
    if let Some((old, new)) = status {
        data["status"] = json!({ "old": old, "new": new });
    }
    data
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
