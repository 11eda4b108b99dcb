mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "renderwatch",
    about = "Watch a render queue and run actions when jobs change state",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: config.yml, searched upward from the current directory)
    #[arg(long, global = true, env = "RENDERWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Actions file (default: actions.yml next to the config)
    #[arg(long, global = true, env = "RENDERWATCH_ACTIONS")]
    actions: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the render queue and run bound actions
    Run {
        /// Poll once, run whatever fires, then exit
        #[arg(long)]
        once: bool,
    },

    /// Validate config and actions, including step credentials
    Check,

    /// Poll the render queue once and show its jobs
    Poll,

    /// List the events actions can be triggered by
    Triggers,

    /// List step types, their actions and settings
    Steps,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let paths = root::resolve_paths(cli.config.as_deref(), cli.actions.as_deref());

    let result = match cli.command {
        Commands::Run { once } => cmd::run::run(&paths, once, cli.json),
        Commands::Check => cmd::check::run(&paths, cli.json),
        Commands::Poll => cmd::poll::run(&paths, cli.json),
        Commands::Triggers => cmd::triggers::run(cli.json),
        Commands::Steps => cmd::steps::run(cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
