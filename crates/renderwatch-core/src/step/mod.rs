//! Step types: what an action can do when its trigger fires.
//!
//! The registry is closed. Each [`StepKind`] declares the action keywords it
//! understands and the settings each keyword takes; a [`StepInstance`] is the
//! validated, ready-to-run form of a step type, built once per type and shared
//! through the [`StepCache`].

pub mod shell;
pub mod telegram;

use crate::action::StepBinding;
use crate::config::Config;
use crate::error::{RenderwatchError, Result};
use crate::event::EventHub;
use crate::job::RenderJob;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

pub use shell::ShellStep;
pub use telegram::TelegramStep;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKind {
    String,
    Integer,
    Bool,
    IntegerOrString,
    StringOrList,
}

impl SettingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKind::String => "string",
            SettingKind::Integer => "integer",
            SettingKind::Bool => "bool",
            SettingKind::IntegerOrString => "integer or string",
            SettingKind::StringOrList => "string or list of strings",
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            SettingKind::String => value.is_string(),
            SettingKind::Integer => value.is_i64() || value.is_u64(),
            SettingKind::Bool => value.is_boolean(),
            SettingKind::IntegerOrString => {
                value.is_string() || value.is_i64() || value.is_u64()
            }
            SettingKind::StringOrList => match value {
                Value::String(_) => true,
                Value::Array(items) => items.iter().all(Value::is_string),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SettingSpec {
    pub name: &'static str,
    pub kind: SettingKind,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActionSpec {
    pub keyword: &'static str,
    pub settings: &'static [SettingSpec],
}

impl ActionSpec {
    /// Check `settings` against the declared ones. Undeclared keys are
    /// ignored with a warning.
    pub fn check(&self, step: StepKind, settings: &Map<String, Value>) -> Result<()> {
        for spec in self.settings {
            match settings.get(spec.name) {
                None if spec.required => {
                    return Err(RenderwatchError::InvalidSetting {
                        step: step.to_string(),
                        setting: spec.name.to_string(),
                        reason: "missing".to_string(),
                    });
                }
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(RenderwatchError::InvalidSetting {
                        step: step.to_string(),
                        setting: spec.name.to_string(),
                        reason: format!("expected {}", spec.kind.as_str()),
                    });
                }
                _ => {}
            }
        }
        for key in settings.keys() {
            if key != "action" && !self.settings.iter().any(|s| s.name == key.as_str()) {
                tracing::warn!(step = %step, action = self.keyword, setting = %key, "ignoring unknown setting");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Telegram,
    Shell,
}

impl StepKind {
    pub fn all() -> &'static [StepKind] {
        &[StepKind::Telegram, StepKind::Shell]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Telegram => "telegram",
            StepKind::Shell => "shell",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            StepKind::Telegram => "send a message through a Telegram bot",
            StepKind::Shell => "run a local command",
        }
    }

    pub fn actions(self) -> &'static [ActionSpec] {
        match self {
            StepKind::Telegram => telegram::ACTIONS,
            StepKind::Shell => shell::ACTIONS,
        }
    }

    pub fn action(self, keyword: &str) -> Option<&'static ActionSpec> {
        self.actions().iter().find(|a| a.keyword == keyword)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = RenderwatchError;

    fn from_str(s: &str) -> Result<Self> {
        StepKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| RenderwatchError::UnknownStep(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// StepInstance
// ---------------------------------------------------------------------------

/// What a running step can see.
pub struct StepContext<'a> {
    pub hub: &'a EventHub,
    pub binding: &'a StepBinding,
    pub job: Option<&'a RenderJob>,
}

impl StepContext<'_> {
    pub fn setting(&self, name: &str) -> Option<&Value> {
        self.binding.settings.get(name)
    }

    pub fn required(&self, name: &str) -> Result<&Value> {
        self.setting(name).ok_or_else(|| RenderwatchError::InvalidSetting {
            step: self.binding.kind.to_string(),
            setting: name.to_string(),
            reason: "missing".to_string(),
        })
    }
}

#[derive(Debug)]
pub enum StepInstance {
    Telegram(TelegramStep),
    Shell(ShellStep),
}

impl StepInstance {
    /// Validate `kind` against its block in `config.steps`.
    pub fn validate(kind: StepKind, config: &Config) -> Result<Self> {
        match kind {
            StepKind::Telegram => Ok(StepInstance::Telegram(TelegramStep::validate(config)?)),
            StepKind::Shell => Ok(StepInstance::Shell(ShellStep::validate(config)?)),
        }
    }

    pub fn execute(&self, ctx: &StepContext<'_>) -> Result<()> {
        match self {
            StepInstance::Telegram(step) => step.execute(ctx),
            StepInstance::Shell(step) => step.execute(ctx),
        }
    }
}

// ---------------------------------------------------------------------------
// StepCache
// ---------------------------------------------------------------------------

/// One validation per step type. Failures are cached too, so a broken
/// credential is reported once rather than once per step.
#[derive(Default)]
pub struct StepCache {
    entries: HashMap<StepKind, Option<Rc<StepInstance>>>,
}

impl StepCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_validate(&mut self, kind: StepKind, config: &Config) -> Option<Rc<StepInstance>> {
        self.entries
            .entry(kind)
            .or_insert_with(|| match StepInstance::validate(kind, config) {
                Ok(instance) => {
                    tracing::debug!(step = %kind, "step validated");
                    Some(Rc::new(instance))
                }
                Err(e) => {
                    tracing::error!(step = %kind, error = %e, "step failed validation, its steps will be skipped");
                    None
                }
            })
            .clone()
    }

    pub fn is_cached(&self, kind: StepKind) -> bool {
        self.entries.contains_key(&kind)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
