pub mod check;
pub mod poll;
pub mod run;
pub mod steps;
pub mod triggers;

use crate::root::Paths;
use anyhow::Context;
use renderwatch_core::action::{ActionDefinition, ActionsFile};
use renderwatch_core::config::Config;
use renderwatch_core::RenderwatchError;

pub(crate) fn load_config(paths: &Paths) -> anyhow::Result<Config> {
    Config::load(&paths.config).context("failed to load config")
}

/// A missing default actions file means "no actions"; a missing explicit one
/// is an error.
pub(crate) fn load_actions(paths: &Paths) -> anyhow::Result<Vec<ActionDefinition>> {
    match ActionsFile::load(&paths.actions) {
        Ok(file) => Ok(file.actions),
        Err(RenderwatchError::ActionsNotFound(path)) if !paths.actions_explicit => {
            tracing::warn!(path = %path, "no actions file, nothing will be triggered");
            Ok(Vec::new())
        }
        Err(e) => Err(e).context("failed to load actions"),
    }
}
