//! Local command step.

use super::{ActionSpec, SettingKind, SettingSpec, StepContext};
use crate::config::Config;
use crate::error::{RenderwatchError, Result};
use crate::format::render_template;
use serde_json::Value;
use std::process::{Command, Stdio};

pub(super) const ACTIONS: &[ActionSpec] = &[ActionSpec {
    keyword: "run_cmd",
    settings: &[
        SettingSpec {
            name: "cmd",
            kind: SettingKind::StringOrList,
            required: true,
        },
        SettingSpec {
            name: "format_job_tokens",
            kind: SettingKind::Bool,
            required: false,
        },
    ],
}];

#[derive(Debug, Default)]
pub struct ShellStep;

impl ShellStep {
    /// Nothing to check: the shell step has no config.
    pub fn validate(_config: &Config) -> Result<Self> {
        Ok(ShellStep)
    }

    pub fn execute(&self, ctx: &StepContext<'_>) -> Result<()> {
        match ctx.binding.keyword {
            "run_cmd" => self.run_cmd(ctx),
            other => Err(RenderwatchError::StepFailed(format!(
                "shell has no action '{other}'"
            ))),
        }
    }

    fn run_cmd(&self, ctx: &StepContext<'_>) -> Result<()> {
        let mut args = command_args(ctx.required("cmd")?)?;
        let format_tokens = ctx
            .setting("format_job_tokens")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        if let (true, Some(job)) = (format_tokens, ctx.job) {
            let attributes = job.attributes();
            args = args
                .iter()
                .map(|arg| render_template(arg, &attributes))
                .collect::<Result<Vec<_>>>()?;
        }

        let (program, rest) = args
            .split_first()
            .ok_or_else(|| RenderwatchError::StepFailed("empty command".to_string()))?;

        tracing::debug!(program = %program, args = ?rest, "running command");
        let output = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RenderwatchError::StepFailed(format!("{program}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(program = %program, stdout = %stdout.trim_end(), stderr = %stderr.trim_end(), "command finished");

        if !output.status.success() {
            return Err(RenderwatchError::StepFailed(format!(
                "{program} exited with {}",
                output.status
            )));
        }
        Ok(())
    }
}

/// A string command splits on whitespace; a list is taken as is.
pub fn command_args(cmd: &Value) -> Result<Vec<String>> {
    match cmd {
        Value::String(s) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    RenderwatchError::StepFailed(format!("command argument {item} is not a string"))
                })
            })
            .collect(),
        other => Err(RenderwatchError::StepFailed(format!(
            "unrecognised command {other}"
        ))),
    }
}
