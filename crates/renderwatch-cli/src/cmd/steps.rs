use crate::output::{left, print_json, print_table};
use renderwatch_core::step::{ActionSpec, StepKind};

pub fn run(json: bool) -> anyhow::Result<()> {
    if json {
        let list: Vec<_> = StepKind::all()
            .iter()
            .map(|k| {
                serde_json::json!({
                    "step": k.as_str(),
                    "description": k.description(),
                    "actions": k.actions(),
                })
            })
            .collect();
        return print_json(&list);
    }

    let mut rows = Vec::new();
    for kind in StepKind::all() {
        for action in kind.actions() {
            rows.push(vec![
                kind.as_str().to_string(),
                action.keyword.to_string(),
                settings_summary(action),
            ]);
        }
    }
    print_table(&[left("STEP"), left("ACTION"), left("SETTINGS")], rows);
    Ok(())
}

/// `chat_id: integer or string, message: string`; optional settings get a `?`.
fn settings_summary(action: &ActionSpec) -> String {
    action
        .settings
        .iter()
        .map(|s| {
            let mark = if s.required { "" } else { "?" };
            format!("{}{mark}: {}", s.name, s.kind.as_str())
        })
        .collect::<Vec<_>>()
        .join(", ")
}
