use crate::cmd::{load_actions, load_config};
use crate::output::{has_errors, print_json, print_warnings};
use crate::root::Paths;
use anyhow::Context;
use renderwatch_core::action::ActionBindingEngine;
use renderwatch_core::daemon::Daemon;
use renderwatch_core::event::EventHub;
use renderwatch_core::source;

pub fn run(paths: &Paths, once: bool, json: bool) -> anyhow::Result<()> {
    let config = load_config(paths)?;
    let warnings = config.validate();
    if has_errors(&warnings) {
        print_warnings(&warnings);
        anyhow::bail!("config validation found errors");
    }
    for w in &warnings {
        tracing::warn!("{}", w.message);
    }

    let definitions = load_actions(paths)?;
    let mut hub = EventHub::new();
    let mut engine = ActionBindingEngine::new(config.clone());
    let loaded = engine.load(&definitions, &mut hub);
    tracing::info!(loaded, declared = definitions.len(), "actions bound");

    let source = source::from_config(&config).context("failed to set up render queue source")?;
    let mut daemon = Daemon::new(&config, source, hub);

    if once {
        let summary = daemon
            .poll_once(chrono::Utc::now().timestamp())
            .context("poll failed")?;
        if json {
            print_json(&summary)?;
        } else {
            println!(
                "{} jobs: {} new, {} changed, {} removed",
                daemon.reconciler().len(),
                summary.created,
                summary.changed,
                summary.removed
            );
        }
        return Ok(());
    }

    daemon.run().context("stopped watching render queue")
}
