//! The poll loop.
//!
//! Each cycle: connect to the source, observe the project/database context,
//! read every job with its status, and reconcile. All event handlers run
//! inside the cycle before the loop sleeps.

use crate::config::{Config, ConnectionPolicy};
use crate::error::Result;
use crate::event::{EventHub, EventPayload, ResolveEvent};
use crate::reconcile::{JobSetReconciler, PolledJob, ReconcileSummary};
use crate::record::fields;
use crate::source::RenderQueueSource;
use serde_json::{json, Value};
use std::time::Duration;

pub struct Daemon {
    source: Box<dyn RenderQueueSource>,
    hub: EventHub,
    reconciler: JobSetReconciler,
    poll_interval: Duration,
    policy: ConnectionPolicy,
    connected: bool,
    ever_connected: bool,
}

impl Daemon {
    pub fn new(config: &Config, source: Box<dyn RenderQueueSource>, hub: EventHub) -> Self {
        Self {
            source,
            hub,
            reconciler: JobSetReconciler::new(config.daemon.history_limit),
            poll_interval: Duration::from_secs(config.daemon.poll_interval_secs),
            policy: config.daemon.on_connection_error,
            connected: false,
            ever_connected: false,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn reconciler(&self) -> &JobSetReconciler {
        &self.reconciler
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Run one poll cycle at time `now` (unix seconds).
    pub fn poll_once(&mut self, now: i64) -> Result<ReconcileSummary> {
        let context = match self.source.connect() {
            Ok(context) => context,
            Err(e) => {
                if self.connected {
                    self.connected = false;
                    let data = json!({ "error": e.to_string() });
                    self.hub.emit_resolve(
                        ResolveEvent::ApiConnLost,
                        EventPayload::empty().with_data(&data),
                    );
                }
                return Err(e);
            }
        };

        if !self.connected {
            self.connected = true;
            if !self.ever_connected {
                self.ever_connected = true;
                self.hub
                    .emit_resolve(ResolveEvent::ApiConnInitialSuccess, EventPayload::empty());
            } else {
                tracing::info!("render queue reachable again");
            }
        }

        self.reconciler.observe_context(context, &self.hub);

        let records = self.source.render_jobs()?;
        let mut polled = Vec::with_capacity(records.len());
        for record in records {
            let status = match record.get(fields::JOB_ID).and_then(Value::as_str) {
                Some(id) => self.source.render_status(id)?,
                None => Default::default(),
            };
            polled.push(PolledJob { record, status });
        }

        self.reconciler.reconcile(polled, now, &self.hub)
    }

    /// Poll until a connection error meets the `exit` policy.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            policy = ?self.policy,
            "watching render queue"
        );
        loop {
            let now = chrono::Utc::now().timestamp();
            match self.poll_once(now) {
                Ok(summary) => tracing::debug!(
                    jobs = self.reconciler.len(),
                    created = summary.created,
                    changed = summary.changed,
                    removed = summary.removed,
                    "poll complete"
                ),
                Err(e) if e.is_connectivity() => match self.policy {
                    ConnectionPolicy::Exit => {
                        tracing::error!(error = %e, "render queue unreachable, exiting");
                        return Err(e);
                    }
                    ConnectionPolicy::Retry => {
                        tracing::warn!(error = %e, "render queue unreachable, retrying");
                    }
                },
                Err(e) => tracing::error!(error = %e, "poll cycle aborted"),
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
