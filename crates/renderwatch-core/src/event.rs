//! Event buses.
//!
//! Three buses exist, one per concern:
//!
//! - `resolve`: render queue lifecycle ([`ResolveEvent`]), the events users
//!   bind actions to;
//! - `internal`: step instrumentation ([`InternalEvent`]);
//! - `user`: names minted at binding time, one `.pre` / `.post` pair per bound
//!   step ([`UserEventBus`]).
//!
//! Dispatch is synchronous and depth-first. Handlers receive the whole
//! [`EventHub`] so they can emit further events on any bus. After the
//! registered handlers run, every bus logs the event.

use crate::error::{RenderwatchError, Result};
use crate::job::RenderJob;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// BusEvent
// ---------------------------------------------------------------------------

/// A statically declared event set.
pub trait BusEvent: Copy + Eq + Hash + fmt::Display + FromStr + 'static {
    /// Bus name used in log records.
    const BUS: &'static str;

    fn all() -> &'static [Self];

    fn as_str(self) -> &'static str;
}

// ---------------------------------------------------------------------------
// ResolveEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveEvent {
    ApiConnInitialSuccess,
    ApiConnLost,
    ProjectOnload,
    ProjectChange,
    DbOnload,
    DbChange,
    RenderJobOnload,
    RenderJobChangeMisc,
    RenderJobNew,
    RenderJobRemoved,
    RenderJobStarted,
    RenderJobProgress,
    RenderJobProgressInitialUpdate,
    RenderJobCompleted,
    RenderJobCancelled,
    RenderJobFailed,
    RenderJobReset,
}

impl BusEvent for ResolveEvent {
    const BUS: &'static str = "resolve";

    fn all() -> &'static [Self] {
        &[
            ResolveEvent::ApiConnInitialSuccess,
            ResolveEvent::ApiConnLost,
            ResolveEvent::ProjectOnload,
            ResolveEvent::ProjectChange,
            ResolveEvent::DbOnload,
            ResolveEvent::DbChange,
            ResolveEvent::RenderJobOnload,
            ResolveEvent::RenderJobChangeMisc,
            ResolveEvent::RenderJobNew,
            ResolveEvent::RenderJobRemoved,
            ResolveEvent::RenderJobStarted,
            ResolveEvent::RenderJobProgress,
            ResolveEvent::RenderJobProgressInitialUpdate,
            ResolveEvent::RenderJobCompleted,
            ResolveEvent::RenderJobCancelled,
            ResolveEvent::RenderJobFailed,
            ResolveEvent::RenderJobReset,
        ]
    }

    fn as_str(self) -> &'static str {
        match self {
            ResolveEvent::ApiConnInitialSuccess => "api_conn_initial_success",
            ResolveEvent::ApiConnLost => "api_conn_lost",
            ResolveEvent::ProjectOnload => "project_onload",
            ResolveEvent::ProjectChange => "project_change",
            ResolveEvent::DbOnload => "db_onload",
            ResolveEvent::DbChange => "db_change",
            ResolveEvent::RenderJobOnload => "render_job_onload",
            ResolveEvent::RenderJobChangeMisc => "render_job_change_misc",
            ResolveEvent::RenderJobNew => "render_job_new",
            ResolveEvent::RenderJobRemoved => "render_job_removed",
            ResolveEvent::RenderJobStarted => "render_job_started",
            ResolveEvent::RenderJobProgress => "render_job_progress",
            ResolveEvent::RenderJobProgressInitialUpdate => "render_job_progress_initial_update",
            ResolveEvent::RenderJobCompleted => "render_job_completed",
            ResolveEvent::RenderJobCancelled => "render_job_cancelled",
            ResolveEvent::RenderJobFailed => "render_job_failed",
            ResolveEvent::RenderJobReset => "render_job_reset",
        }
    }
}

impl ResolveEvent {
    pub fn description(self) -> &'static str {
        match self {
            ResolveEvent::ApiConnInitialSuccess => "first successful connection to the render queue",
            ResolveEvent::ApiConnLost => "render queue stopped answering",
            ResolveEvent::ProjectOnload => "project observed for the first time",
            ResolveEvent::ProjectChange => "current project switched",
            ResolveEvent::DbOnload => "database observed for the first time",
            ResolveEvent::DbChange => "current database switched",
            ResolveEvent::RenderJobOnload => "job found in the queue at startup or after a switch",
            ResolveEvent::RenderJobChangeMisc => "job changed in some other way",
            ResolveEvent::RenderJobNew => "job added to the queue",
            ResolveEvent::RenderJobRemoved => "job removed from the queue",
            ResolveEvent::RenderJobStarted => "job started rendering",
            ResolveEvent::RenderJobProgress => "job completion percentage advanced",
            ResolveEvent::RenderJobProgressInitialUpdate => "first progress report of a job",
            ResolveEvent::RenderJobCompleted => "job finished rendering",
            ResolveEvent::RenderJobCancelled => "job was cancelled while rendering",
            ResolveEvent::RenderJobFailed => "job failed while rendering",
            ResolveEvent::RenderJobReset => "job went back to Ready",
        }
    }
}

// ---------------------------------------------------------------------------
// InternalEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalEvent {
    ActionStepFired,
    ActionStepFailed,
    ActionStepTelegramMessageSent,
}

impl BusEvent for InternalEvent {
    const BUS: &'static str = "internal";

    fn all() -> &'static [Self] {
        &[
            InternalEvent::ActionStepFired,
            InternalEvent::ActionStepFailed,
            InternalEvent::ActionStepTelegramMessageSent,
        ]
    }

    fn as_str(self) -> &'static str {
        match self {
            InternalEvent::ActionStepFired => "action_step_fired",
            InternalEvent::ActionStepFailed => "action_step_failed",
            InternalEvent::ActionStepTelegramMessageSent => "action_step_telegram_message_sent",
        }
    }
}

macro_rules! bus_event_traits {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = RenderwatchError;

            fn from_str(s: &str) -> Result<Self> {
                <$ty as BusEvent>::all()
                    .iter()
                    .copied()
                    .find(|e| e.as_str() == s)
                    .ok_or_else(|| RenderwatchError::UnknownEvent(s.to_string()))
            }
        }
    };
}

bus_event_traits!(ResolveEvent);
bus_event_traits!(InternalEvent);

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// What an event carries: the job it concerns, if any, and free-form data.
#[derive(Debug, Clone, Copy)]
pub struct EventPayload<'a> {
    pub job: Option<&'a RenderJob>,
    pub data: &'a Value,
}

static NO_DATA: Value = Value::Null;

impl<'a> EventPayload<'a> {
    pub fn empty() -> Self {
        Self {
            job: None,
            data: &NO_DATA,
        }
    }

    pub fn for_job(job: &'a RenderJob) -> Self {
        Self {
            job: Some(job),
            data: &NO_DATA,
        }
    }

    pub fn with_data(self, data: &'a Value) -> Self {
        Self { data, ..self }
    }
}

pub type Handler = Box<dyn Fn(&EventHub, &EventPayload<'_>)>;

fn log_event(bus: &str, event: &str, payload: &EventPayload<'_>) {
    match payload.job {
        Some(job) => tracing::info!(bus, event, job = job.short_id(), "event"),
        None => tracing::info!(bus, event, "event"),
    }
    if !payload.data.is_null() {
        tracing::debug!(bus, event, data = %payload.data, "event data");
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Publish/subscribe over a fixed event enumeration.
pub struct EventBus<E: BusEvent> {
    handlers: HashMap<E, Vec<Handler>>,
}

impl<E: BusEvent> EventBus<E> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn subscribe<F>(&mut self, event: E, handler: F)
    where
        F: Fn(&EventHub, &EventPayload<'_>) + 'static,
    {
        self.handlers
            .entry(event)
            .or_default()
            .push(Box::new(handler));
    }

    /// Subscribe by event name; fails with `UnknownEvent` outside the declared set.
    pub fn subscribe_named<F>(&mut self, name: &str, handler: F) -> Result<E>
    where
        F: Fn(&EventHub, &EventPayload<'_>) + 'static,
    {
        let event = E::all()
            .iter()
            .copied()
            .find(|e| e.as_str() == name)
            .ok_or_else(|| RenderwatchError::UnknownEvent(name.to_string()))?;
        self.subscribe(event, handler);
        Ok(event)
    }

    pub fn handler_count(&self, event: E) -> usize {
        self.handlers.get(&event).map_or(0, Vec::len)
    }

    fn dispatch(&self, hub: &EventHub, event: E, payload: &EventPayload<'_>) {
        if let Some(handlers) = self.handlers.get(&event) {
            for handler in handlers {
                handler(hub, payload);
            }
        }
        log_event(E::BUS, event.as_str(), payload);
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// UserEventBus
// ---------------------------------------------------------------------------

/// Bus whose event names are declared at runtime, before anything subscribes.
#[derive(Default)]
pub struct UserEventBus {
    declared: BTreeSet<String>,
    handlers: HashMap<String, Vec<Handler>>,
}

impl UserEventBus {
    pub const BUS: &'static str = "user";

    /// Declare `name`. Returns false if it was already declared.
    pub fn declare(&mut self, name: impl Into<String>) -> bool {
        self.declared.insert(name.into())
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    pub fn subscribe<F>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&EventHub, &EventPayload<'_>) + 'static,
    {
        if !self.is_declared(name) {
            return Err(RenderwatchError::UnknownEvent(name.to_string()));
        }
        self.handlers
            .entry(name.to_string())
            .or_default()
            .push(Box::new(handler));
        Ok(())
    }

    fn dispatch(&self, hub: &EventHub, name: &str, payload: &EventPayload<'_>) -> Result<()> {
        if !self.is_declared(name) {
            return Err(RenderwatchError::UnknownEvent(name.to_string()));
        }
        if let Some(handlers) = self.handlers.get(name) {
            for handler in handlers {
                handler(hub, payload);
            }
        }
        log_event(Self::BUS, name, payload);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EventHub
// ---------------------------------------------------------------------------

/// The three buses together. Subscriptions need `&mut`; emission only `&`,
/// so handlers may emit while another emission is in progress.
#[derive(Default)]
pub struct EventHub {
    pub resolve: EventBus<ResolveEvent>,
    pub internal: EventBus<InternalEvent>,
    pub user: UserEventBus,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_resolve(&self, event: ResolveEvent, payload: EventPayload<'_>) {
        self.resolve.dispatch(self, event, &payload);
    }

    pub fn emit_internal(&self, event: InternalEvent, payload: EventPayload<'_>) {
        self.internal.dispatch(self, event, &payload);
    }

    pub fn emit_user(&self, name: &str, payload: EventPayload<'_>) -> Result<()> {
        self.user.dispatch(self, name, &payload)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn resolve_event_names_roundtrip() {
        for event in ResolveEvent::all() {
            let parsed: ResolveEvent = event.as_str().parse().unwrap();
            assert_eq!(parsed, *event);
        }
        assert_eq!(ResolveEvent::all().len(), 17);
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "render_job_exploded".parse::<ResolveEvent>().unwrap_err();
        assert!(matches!(err, RenderwatchError::UnknownEvent(_)));

        let mut bus: EventBus<ResolveEvent> = EventBus::new();
        assert!(bus.subscribe_named("nope", |_, _| {}).is_err());
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut hub = EventHub::new();
        for i in 0..3 {
            let seen = Rc::clone(&seen);
            hub.resolve
                .subscribe(ResolveEvent::RenderJobNew, move |_, _| seen.borrow_mut().push(i));
        }
        hub.emit_resolve(ResolveEvent::RenderJobNew, EventPayload::empty());
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn handlers_may_emit_on_other_buses() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut hub = EventHub::new();
        hub.user.declare("on_render_job_new.shell.run_cmd.1.pre");
        {
            let seen = Rc::clone(&seen);
            hub.user
                .subscribe("on_render_job_new.shell.run_cmd.1.pre", move |_, p| {
                    seen.borrow_mut().push(p.data.clone());
                })
                .unwrap();
        }
        hub.resolve.subscribe(ResolveEvent::RenderJobNew, |hub, _| {
            let data = json!({"nested": true});
            hub.emit_user(
                "on_render_job_new.shell.run_cmd.1.pre",
                EventPayload::empty().with_data(&data),
            )
            .unwrap();
        });
        hub.emit_resolve(ResolveEvent::RenderJobNew, EventPayload::empty());
        assert_eq!(*seen.borrow(), vec![json!({"nested": true})]);
    }

    #[test]
    fn user_bus_requires_declaration() {
        let mut hub = EventHub::new();
        assert!(hub.user.subscribe("undeclared", |_, _| {}).is_err());
        assert!(hub.emit_user("undeclared", EventPayload::empty()).is_err());
        assert!(hub.user.declare("declared"));
        assert!(!hub.user.declare("declared"));
        assert!(hub.emit_user("declared", EventPayload::empty()).is_ok());
    }
}
