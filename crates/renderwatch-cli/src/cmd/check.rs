use crate::cmd::{load_actions, load_config};
use crate::output::{has_errors, left, print_json, print_table, print_warnings, right};
use crate::root::Paths;
use renderwatch_core::action::ActionBindingEngine;
use renderwatch_core::event::EventHub;
use serde::Serialize;

#[derive(Serialize)]
struct ActionReport {
    index: usize,
    name: String,
    status: &'static str,
    bindings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(paths: &Paths, json: bool) -> anyhow::Result<()> {
    let config = load_config(paths)?;
    let warnings = config.validate();
    let definitions = load_actions(paths)?;

    let mut hub = EventHub::new();
    let mut engine = ActionBindingEngine::new(config);
    let reports: Vec<ActionReport> = definitions
        .iter()
        .enumerate()
        .map(|(i, def)| {
            let index = i + 1;
            let (status, bindings, error) = match engine.bind(index, def, &mut hub) {
                Ok(Some(action)) => ("ok", action.bindings.len(), None),
                Ok(None) => ("disabled", 0, None),
                Err(e) => ("invalid", 0, Some(e.to_string())),
            };
            ActionReport {
                index,
                name: def.name.clone(),
                status,
                bindings,
                error,
            }
        })
        .collect();

    if json {
        print_json(&serde_json::json!({
            "config": paths.config,
            "warnings": warnings,
            "actions": reports,
        }))?;
    } else {
        if warnings.is_empty() {
            println!("Config is valid. No warnings.");
        } else {
            print_warnings(&warnings);
        }
        if reports.is_empty() {
            println!("No actions defined.");
        } else {
            let rows = reports
                .iter()
                .map(|r| {
                    vec![
                        r.index.to_string(),
                        r.name.clone(),
                        r.status.to_string(),
                        r.bindings.to_string(),
                        r.error.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(
                &[
                    right("#"),
                    left("ACTION"),
                    left("STATUS"),
                    right("BINDINGS"),
                    left("ERROR"),
                ],
                rows,
            );
        }
    }

    if has_errors(&warnings) {
        anyhow::bail!("config validation found errors");
    }
    let invalid = reports.iter().filter(|r| r.status == "invalid").count();
    if invalid > 0 {
        anyhow::bail!("{invalid} action(s) could not be loaded");
    }
    Ok(())
}
