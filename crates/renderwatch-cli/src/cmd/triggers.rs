use crate::output::{left, print_json, print_table};
use renderwatch_core::event::{BusEvent, ResolveEvent};

pub fn run(json: bool) -> anyhow::Result<()> {
    let events = ResolveEvent::all();

    if json {
        let list: Vec<_> = events
            .iter()
            .map(|e| serde_json::json!({ "name": e.as_str(), "description": e.description() }))
            .collect();
        return print_json(&list);
    }

    let rows = events
        .iter()
        .map(|e| vec![e.as_str().to_string(), e.description().to_string()])
        .collect();
    print_table(&[left("TRIGGER"), left("DESCRIPTION")], rows);
    Ok(())
}
