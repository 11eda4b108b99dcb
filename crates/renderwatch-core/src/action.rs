//! User actions and the engine that binds them to resolve events.
//!
//! An actions file lists named actions, each triggered by one or more resolve
//! event names and running an ordered list of steps:
//!
//! ```yaml
//! actions:
//!   - name: Notify on finish
//!     triggered_by: [render_job_completed, render_job_failed]
//!     steps:
//!       - telegram:
//!           action: send_message
//!           chat_id: -1001234
//!           message: "{name} is {status}{line_time_elapsed}"
//! ```
//!
//! Every valid step is bound once per trigger. Each binding declares a
//! `.pre` / `.post` pair on the user bus and subscribes a closure that hands
//! the triggering event to [`executor::run`].

use crate::config::Config;
use crate::error::{RenderwatchError, Result};
use crate::event::{EventHub, ResolveEvent};
use crate::executor;
use crate::step::{StepCache, StepInstance, StepKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::rc::Rc;

// ---------------------------------------------------------------------------
// Definitions (actions file)
// ---------------------------------------------------------------------------

/// `triggered_by` accepts a single name or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Triggers {
    One(String),
    Many(Vec<String>),
}

impl Default for Triggers {
    fn default() -> Self {
        Triggers::Many(Vec::new())
    }
}

impl Triggers {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Triggers::One(name) => vec![name.as_str()],
            Triggers::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub triggered_by: Triggers,
    /// Each entry maps a step type to that step's settings.
    #[serde(default)]
    pub steps: Vec<Map<String, Value>>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionsFile {
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

impl ActionsFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RenderwatchError::ActionsNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// One step of one action, attached to one trigger.
#[derive(Debug)]
pub struct StepBinding {
    pub action_index: usize,
    pub action_name: String,
    pub trigger: ResolveEvent,
    /// 1-based position among the action's steps.
    pub step_index: usize,
    pub kind: StepKind,
    pub keyword: &'static str,
    /// The step's settings without the `action` key.
    pub settings: Map<String, Value>,
    pub instance: Rc<StepInstance>,
}

impl StepBinding {
    /// `on_<trigger>.<step_type>.<keyword>.<index>`
    pub fn signature(&self) -> String {
        format!(
            "on_{}.{}.{}.{}",
            self.trigger, self.kind, self.keyword, self.step_index
        )
    }

    pub fn pre_event(&self) -> String {
        format!("{}.pre", self.signature())
    }

    pub fn post_event(&self) -> String {
        format!("{}.post", self.signature())
    }

    /// Identifying fields for logs and event payloads.
    pub fn describe(&self) -> Value {
        json!({
            "action": self.action_name,
            "action_index": self.action_index,
            "trigger": self.trigger.to_string(),
            "step_type": self.kind.as_str(),
            "step_index": self.step_index,
            "keyword": self.keyword,
        })
    }
}

#[derive(Debug)]
pub struct Action {
    /// 1-based position in the actions file.
    pub index: usize,
    pub name: String,
    pub triggers: Vec<ResolveEvent>,
    pub bindings: Vec<Rc<StepBinding>>,
}

struct ValidStep {
    index: usize,
    kind: StepKind,
    keyword: &'static str,
    settings: Map<String, Value>,
    instance: Rc<StepInstance>,
}

// ---------------------------------------------------------------------------
// ActionBindingEngine
// ---------------------------------------------------------------------------

pub struct ActionBindingEngine {
    config: Config,
    cache: StepCache,
    actions: Vec<Action>,
}

impl ActionBindingEngine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cache: StepCache::new(),
            actions: Vec::new(),
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn cache(&self) -> &StepCache {
        &self.cache
    }

    /// Bind every enabled action. Actions that fail are logged and skipped.
    /// Returns how many actions were bound.
    pub fn load(&mut self, definitions: &[ActionDefinition], hub: &mut EventHub) -> usize {
        let mut loaded = 0;
        for (i, def) in definitions.iter().enumerate() {
            let index = i + 1;
            match self.bind(index, def, hub) {
                Ok(Some(action)) => {
                    tracing::info!(
                        action = %action.name,
                        index,
                        bindings = action.bindings.len(),
                        "action loaded"
                    );
                    self.actions.push(action);
                    loaded += 1;
                }
                Ok(None) => tracing::debug!(action = %def.name, index, "action disabled"),
                Err(e) => tracing::error!(action = %def.name, index, error = %e, "action not loaded"),
            }
        }
        loaded
    }

    /// Validate one action and subscribe its bindings. `Ok(None)` for a
    /// disabled action.
    pub fn bind(
        &mut self,
        index: usize,
        def: &ActionDefinition,
        hub: &mut EventHub,
    ) -> Result<Option<Action>> {
        if !def.enabled {
            return Ok(None);
        }
        let name = if def.name.is_empty() {
            format!("action {index}")
        } else {
            def.name.clone()
        };

        let mut triggers = Vec::new();
        for trigger in def.triggered_by.names() {
            match trigger.parse::<ResolveEvent>() {
                Ok(event) if !triggers.contains(&event) => triggers.push(event),
                Ok(_) => {}
                Err(e) => tracing::warn!(action = %name, error = %e, "ignoring trigger"),
            }
        }

        let mut steps = Vec::new();
        let mut step_index = 0;
        for entry in &def.steps {
            for (step_type, settings) in entry {
                step_index += 1;
                match self.validate_step(step_index, step_type, settings) {
                    Ok(step) => steps.push(step),
                    Err(e) => tracing::warn!(
                        action = %name,
                        step_index,
                        step_type = %step_type,
                        error = %e,
                        "skipping step"
                    ),
                }
            }
        }

        if steps.is_empty() {
            return Err(RenderwatchError::InvalidAction { index, name });
        }
        if triggers.is_empty() {
            tracing::warn!(action = %name, "action has no valid trigger, its steps will never run");
        }

        let mut bindings = Vec::with_capacity(steps.len() * triggers.len());
        for step in &steps {
            for trigger in &triggers {
                let binding = Rc::new(StepBinding {
                    action_index: index,
                    action_name: name.clone(),
                    trigger: *trigger,
                    step_index: step.index,
                    kind: step.kind,
                    keyword: step.keyword,
                    settings: step.settings.clone(),
                    instance: Rc::clone(&step.instance),
                });
                hub.user.declare(binding.pre_event());
                hub.user.declare(binding.post_event());

                let handle = Rc::clone(&binding);
                hub.resolve.subscribe(*trigger, move |hub, payload| {
                    executor::run(&handle, hub, payload)
                });
                tracing::debug!(binding = %binding.signature(), "step bound");
                bindings.push(binding);
            }
        }

        Ok(Some(Action {
            index,
            name,
            triggers,
            bindings,
        }))
    }

    fn validate_step(&mut self, index: usize, step_type: &str, settings: &Value) -> Result<ValidStep> {
        let kind: StepKind = step_type.parse()?;
        let invalid = |reason: String| RenderwatchError::InvalidSetting {
            step: kind.to_string(),
            setting: "action".to_string(),
            reason,
        };

        let settings = settings
            .as_object()
            .ok_or_else(|| invalid("step settings must be a mapping".to_string()))?;
        let keyword = settings
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing".to_string()))?;
        let spec = kind
            .action(keyword)
            .ok_or_else(|| invalid(format!("unknown action '{keyword}'")))?;
        spec.check(kind, settings)?;

        let instance = self
            .cache
            .get_or_validate(kind, &self.config)
            .ok_or_else(|| RenderwatchError::StepValidation(kind.to_string()))?;

        let mut settings = settings.clone();
        settings.remove("action");
        Ok(ValidStep {
            index,
            kind,
            keyword: spec.keyword,
            settings,
            instance,
        })
    }
}

/// A binding outside any engine, for exercising steps directly.
#[cfg(test)]
pub(crate) fn test_binding(
    kind: StepKind,
    keyword: &'static str,
    settings: Value,
    instance: Rc<StepInstance>,
) -> StepBinding {
    StepBinding {
        action_index: 1,
        action_name: "test".to_string(),
        trigger: ResolveEvent::RenderJobCompleted,
        step_index: 1,
        kind,
        keyword,
        settings: settings.as_object().cloned().unwrap_or_default(),
        instance,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;

    fn engine() -> ActionBindingEngine {
        ActionBindingEngine::new(Config::new(SourceConfig::File {
            path: "queue.json".into(),
        }))
    }

    fn definitions(yaml: &str) -> Vec<ActionDefinition> {
        ActionsFile::parse(yaml).unwrap().actions
    }

    #[test]
    fn parses_single_and_list_triggers() {
        let defs = definitions(
            r#"
actions:
  - name: one
    triggered_by: render_job_completed
    steps: []
  - name: many
    enabled: false
    triggered_by: [render_job_failed, render_job_cancelled]
"#,
        );
        assert_eq!(defs[0].triggered_by.names(), vec!["render_job_completed"]);
        assert!(defs[0].enabled);
        assert_eq!(defs[1].triggered_by.names().len(), 2);
        assert!(!defs[1].enabled);
    }

    #[test]
    fn valid_step_yields_one_reachable_binding() {
        let defs = definitions(
            r#"
actions:
  - name: touch
    triggered_by: render_job_completed
    steps:
      - shell:
          action: run_cmd
          cmd: "true"
"#,
        );
        let mut hub = EventHub::new();
        let mut engine = engine();
        assert_eq!(engine.load(&defs, &mut hub), 1);

        let action = &engine.actions()[0];
        assert_eq!(action.bindings.len(), 1);
        let binding = &action.bindings[0];
        assert_eq!(binding.signature(), "on_render_job_completed.shell.run_cmd.1");
        assert!(!binding.settings.contains_key("action"));
        assert_eq!(hub.resolve.handler_count(ResolveEvent::RenderJobCompleted), 1);
        assert!(hub.user.is_declared("on_render_job_completed.shell.run_cmd.1.pre"));
        assert!(hub.user.is_declared("on_render_job_completed.shell.run_cmd.1.post"));
    }

    #[test]
    fn missing_required_setting_rejects_action() {
        let defs = definitions(
            r#"
actions:
  - name: notify
    triggered_by: render_job_completed
    steps:
      - shell:
          action: run_cmd
"#,
        );
        let mut hub = EventHub::new();
        let mut engine = engine();
        assert_eq!(engine.load(&defs, &mut hub), 0);
        assert!(engine.actions().is_empty());
        assert_eq!(hub.resolve.handler_count(ResolveEvent::RenderJobCompleted), 0);

        let err = engine.bind(1, &defs[0], &mut hub).unwrap_err();
        assert!(matches!(err, RenderwatchError::InvalidAction { index: 1, .. }));
    }

    #[test]
    fn bad_steps_are_skipped_and_indices_kept() {
        let defs = definitions(
            r#"
actions:
  - name: mixed
    triggered_by: [render_job_started, render_job_completed, not_an_event]
    steps:
      - pager:
          action: page
      - shell:
          action: nope
      - shell:
          action: run_cmd
          cmd: [echo, done]
"#,
        );
        let mut hub = EventHub::new();
        let mut engine = engine();
        assert_eq!(engine.load(&defs, &mut hub), 1);

        let action = &engine.actions()[0];
        assert_eq!(
            action.triggers,
            vec![ResolveEvent::RenderJobStarted, ResolveEvent::RenderJobCompleted]
        );
        let signatures: Vec<String> = action.bindings.iter().map(|b| b.signature()).collect();
        assert_eq!(
            signatures,
            vec![
                "on_render_job_started.shell.run_cmd.3",
                "on_render_job_completed.shell.run_cmd.3",
            ]
        );
    }

    #[test]
    fn action_without_triggers_loads_unreachable() {
        let defs = definitions(
            r#"
actions:
  - name: orphan
    triggered_by: render_job_exploded
    steps:
      - shell: {action: run_cmd, cmd: "true"}
"#,
        );
        let mut hub = EventHub::new();
        let mut engine = engine();
        assert_eq!(engine.load(&defs, &mut hub), 1);
        assert!(engine.actions()[0].bindings.is_empty());
    }

    #[test]
    fn disabled_actions_are_not_bound() {
        let defs = definitions(
            r#"
actions:
  - name: off
    enabled: false
    triggered_by: render_job_new
    steps:
      - shell: {action: run_cmd, cmd: "true"}
"#,
        );
        let mut hub = EventHub::new();
        let mut engine = engine();
        assert_eq!(engine.load(&defs, &mut hub), 0);
        assert_eq!(hub.resolve.handler_count(ResolveEvent::RenderJobNew), 0);
        assert!(!engine.cache().is_cached(StepKind::Shell));
    }

    #[test]
    fn step_type_validated_once_across_actions() {
        let defs = definitions(
            r#"
actions:
  - name: a
    triggered_by: render_job_new
    steps:
      - shell: {action: run_cmd, cmd: "true"}
  - name: b
    triggered_by: render_job_removed
    steps:
      - shell: {action: run_cmd, cmd: "true"}
"#,
        );
        let mut hub = EventHub::new();
        let mut engine = engine();
        assert_eq!(engine.load(&defs, &mut hub), 2);
        let a = &engine.actions()[0].bindings[0].instance;
        let b = &engine.actions()[1].bindings[0].instance;
        assert!(Rc::ptr_eq(a, b));
    }

    #[test]
    fn missing_actions_file_is_reported() {
        let err = ActionsFile::load(Path::new("/nonexistent/actions.yml")).unwrap_err();
        assert!(matches!(err, RenderwatchError::ActionsNotFound(_)));
    }
}
