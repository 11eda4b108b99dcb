use crate::action::StepBinding;
use crate::event::{EventHub, EventPayload, InternalEvent};
use crate::step::StepContext;
use serde_json::Value;

/// Run one bound step for one event.
///
/// Order: `action_step_fired`, the binding's `.pre`, the step itself, then
/// `action_step_failed` if it returned an error, then `.post`. Step errors
/// stop here; nothing is returned to the emitter.
pub fn run(binding: &StepBinding, hub: &EventHub, payload: &EventPayload<'_>) {
    let info = binding.describe();
    let around = EventPayload {
        job: payload.job,
        data: &info,
    };

    hub.emit_internal(InternalEvent::ActionStepFired, around);
    emit_user(hub, &binding.pre_event(), around);

    let ctx = StepContext {
        hub,
        binding,
        job: payload.job,
    };
    if let Err(e) = binding.instance.execute(&ctx) {
        tracing::error!(
            action = %binding.action_name,
            action_index = binding.action_index,
            trigger = %binding.trigger,
            step_type = %binding.kind,
            step_index = binding.step_index,
            error = %e,
            "step failed"
        );
        let mut failed = info.clone();
        if let Value::Object(map) = &mut failed {
            map.insert("error".to_string(), Value::String(e.to_string()));
        }
        hub.emit_internal(
            InternalEvent::ActionStepFailed,
            EventPayload {
                job: payload.job,
                data: &failed,
            },
        );
    }

    emit_user(hub, &binding.post_event(), around);
}

fn emit_user(hub: &EventHub, name: &str, payload: EventPayload<'_>) {
    if let Err(e) = hub.emit_user(name, payload) {
        tracing::warn!(event = name, error = %e, "could not emit user event");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use crate::action::{ActionBindingEngine, ActionsFile};
    use crate::config::{Config, SourceConfig};
    use crate::event::{EventHub, EventPayload, InternalEvent, ResolveEvent};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn bound_hub(cmd: &str) -> (EventHub, Log) {
        let yaml = format!(
            r#"
actions:
  - name: on completion
    triggered_by: render_job_completed
    steps:
      - shell: {{action: run_cmd, cmd: "{cmd}"}}
"#
        );
        let defs = ActionsFile::parse(&yaml).unwrap().actions;
        let mut hub = EventHub::new();
        let mut engine = ActionBindingEngine::new(Config::new(SourceConfig::File {
            path: "queue.json".into(),
        }));
        assert_eq!(engine.load(&defs, &mut hub), 1);

        let log: Log = Rc::new(RefCell::new(Vec::new()));
        for event in [InternalEvent::ActionStepFired, InternalEvent::ActionStepFailed] {
            let log = Rc::clone(&log);
            hub.internal
                .subscribe(event, move |_, _| log.borrow_mut().push(event.to_string()));
        }
        for suffix in ["pre", "post"] {
            let name = format!("on_render_job_completed.shell.run_cmd.1.{suffix}");
            let log = Rc::clone(&log);
            let label = suffix.to_string();
            hub.user
                .subscribe(&name, move |_, _| log.borrow_mut().push(label.clone()))
                .unwrap();
        }
        (hub, log)
    }

    #[test]
    fn successful_step_is_wrapped_in_pre_and_post() {
        let (hub, log) = bound_hub("true");
        hub.emit_resolve(ResolveEvent::RenderJobCompleted, EventPayload::empty());
        assert_eq!(*log.borrow(), vec!["action_step_fired", "pre", "post"]);
    }

    #[test]
    fn failing_step_is_isolated() {
        let (hub, log) = bound_hub("false");
        hub.emit_resolve(ResolveEvent::RenderJobCompleted, EventPayload::empty());
        hub.emit_resolve(ResolveEvent::RenderJobCompleted, EventPayload::empty());
        assert_eq!(
            *log.borrow(),
            vec![
                "action_step_fired",
                "pre",
                "action_step_failed",
                "post",
                "action_step_fired",
                "pre",
                "action_step_failed",
                "post",
            ]
        );
    }

    #[test]
    fn failing_step_does_not_block_sibling() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let yaml = format!(
            r#"
actions:
  - name: fail then touch
    triggered_by: render_job_completed
    steps:
      - shell: {{action: run_cmd, cmd: "false"}}
      - shell: {{action: run_cmd, cmd: [touch, "{}"]}}
"#,
            marker.display()
        );
        let defs = ActionsFile::parse(&yaml).unwrap().actions;
        let mut hub = EventHub::new();
        let mut engine = ActionBindingEngine::new(Config::new(SourceConfig::File {
            path: "queue.json".into(),
        }));
        assert_eq!(engine.load(&defs, &mut hub), 1);

        let log: Log = Rc::new(RefCell::new(Vec::new()));
        {
            let log = Rc::clone(&log);
            hub.internal.subscribe(InternalEvent::ActionStepFailed, move |_, _| {
                log.borrow_mut().push("failed".to_string())
            });
        }
        for index in [1, 2] {
            let name = format!("on_render_job_completed.shell.run_cmd.{index}.post");
            let log = Rc::clone(&log);
            hub.user
                .subscribe(&name, move |_, _| log.borrow_mut().push(format!("post {index}")))
                .unwrap();
        }

        hub.emit_resolve(ResolveEvent::RenderJobCompleted, EventPayload::empty());

        assert!(marker.exists());
        assert_eq!(*log.borrow(), vec!["failed", "post 1", "post 2"]);
    }
}
