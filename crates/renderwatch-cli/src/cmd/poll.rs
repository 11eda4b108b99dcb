use crate::cmd::load_config;
use crate::output::{left, print_json, print_table, right};
use crate::root::Paths;
use anyhow::Context;
use renderwatch_core::daemon::Daemon;
use renderwatch_core::event::EventHub;
use renderwatch_core::job::RenderJob;
use renderwatch_core::source;

pub fn run(paths: &Paths, json: bool) -> anyhow::Result<()> {
    let config = load_config(paths)?;
    let source = source::from_config(&config).context("failed to set up render queue source")?;
    let mut daemon = Daemon::new(&config, source, EventHub::new());
    daemon
        .poll_once(chrono::Utc::now().timestamp())
        .context("poll failed")?;

    let reconciler = daemon.reconciler();
    let jobs: Vec<&RenderJob> = reconciler.jobs().collect();

    if json {
        print_json(&serde_json::json!({
            "context": reconciler.context(),
            "jobs": jobs,
        }))?;
        return Ok(());
    }

    if let Some(ctx) = reconciler.context() {
        println!("Project:  {}", ctx.project);
        println!("Database: {}", ctx.database);
    }
    if jobs.is_empty() {
        println!("Render queue is empty.");
        return Ok(());
    }
    let rows = jobs
        .iter()
        .map(|job| {
            vec![
                job.short_id().to_string(),
                job.name.clone().unwrap_or_default(),
                job.timeline_name.clone().unwrap_or_default(),
                job.status.clone().unwrap_or_default(),
                job.completion_percent.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &[
            left("JOB"),
            left("NAME"),
            left("TIMELINE"),
            left("STATUS"),
            right("DONE"),
        ],
        rows,
    );
    Ok(())
}
