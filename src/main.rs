use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use syncore::{config, remote, worker};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "syncore",
    about = "Event-consolidation and sync-reconciliation core for a file-sync agent",
    version = VERSION
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start watching the configured sync root in the foreground
    Run {
        /// Path to config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Create a default config file if one doesn't already exist, and print its path
    Config {
        /// Path to config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print version and exit
    Version,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        None => {
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            std::process::exit(1);
        }
        Some(Commands::Version) => {
            println!("syncore {VERSION}");
            Ok(())
        }
        Some(Commands::Config { config }) => cmd_config(config),
        Some(Commands::Run { config }) => cmd_run(config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn setup_logging(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let level = match log_level {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARNING" => "warn",
        "ERROR" => "error",
        _ => "info",
    };

    let filter = EnvFilter::try_new(format!("syncore={level}")).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn cmd_config(config_arg: Option<PathBuf>) -> Result<()> {
    let path = config_arg.unwrap_or_else(config::default_config_path);
    if path.is_file() {
        println!("{}", path.display());
        return Ok(());
    }
    config::generate_default_config(&path).with_context(|| format!("failed to write default config to {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    println!("Edit 'sync_root', 'remote_base_url', and 'project_id' before running 'syncore run'.");
    Ok(())
}

fn cmd_run(config_arg: Option<PathBuf>) -> Result<()> {
    let cfg = match config::load_config(config_arg.as_deref()) {
        Ok(c) => c,
        Err(config::ConfigError::NoConfigFound) => {
            anyhow::bail!("No config file found. Run 'syncore config' to create one.");
        }
        Err(e) => return Err(e.into()),
    };
    setup_logging(&cfg.log_level);

    let auth_token = std::env::var("SYNCORE_AUTH_TOKEN").context("SYNCORE_AUTH_TOKEN environment variable is required to reach the remote API")?;
    let remote_api: Arc<dyn remote::RemoteApi> = Arc::new(remote::HttpRemoteApi::new(cfg.remote_base_url.clone(), auth_token));

    let mut background = worker::BackgroundWorker::new(cfg, remote_api);
    background.set_intervention_cb(prompt_intervention);
    background.set_notification_cb(print_notification);

    background.start().context("failed to start background worker")?;
    tracing::info!("syncore running, press ctrl-c to stop");

    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_handler.store(false, std::sync::atomic::Ordering::SeqCst);
    })
    .context("failed to install ctrl-c handler")?;

    #[cfg(unix)]
    let mut sighup_signals = {
        use signal_hook::iterator::Signals;
        Signals::new([signal_hook::consts::SIGHUP]).ok()
    };

    while running.load(std::sync::atomic::Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));

        #[cfg(unix)]
        if let Some(ref mut signals) = sighup_signals {
            for sig in signals.pending() {
                if sig == signal_hook::consts::SIGHUP {
                    tracing::info!("received SIGHUP, nudging an immediate sync cycle");
                    background.sync_now();
                }
            }
        }
    }

    background.stop();
    Ok(())
}

/// Default intervention policy for the CLI: prompt interactively on a
/// terminal, otherwise fall back to the queue's own recommendation so an
/// unattended run never blocks forever on stdin.
fn prompt_intervention(request: &syncore::callbacks::InterventionRequest) -> syncore::callbacks::InterventionResolution {
    use syncore::callbacks::{InterventionResolution, RecommendedAction};

    if !console_is_interactive() {
        return match request.recommended_action {
            RecommendedAction::KeepLocal => InterventionResolution::KeepLocal,
            RecommendedAction::KeepRemote => InterventionResolution::KeepRemote,
            RecommendedAction::KeepBoth => InterventionResolution::KeepBoth,
        };
    }

    let options = ["Keep local", "Keep remote", "Keep both", "Skip"];
    let default_idx = match request.recommended_action {
        RecommendedAction::KeepLocal => 0,
        RecommendedAction::KeepRemote => 1,
        RecommendedAction::KeepBoth => 2,
    };

    let choice = dialoguer::Select::new()
        .with_prompt(format!("Conflict at {}: local and remote have diverged", request.path))
        .items(&options)
        .default(default_idx)
        .interact_opt()
        .unwrap_or(None);

    match choice {
        Some(0) => InterventionResolution::KeepLocal,
        Some(1) => InterventionResolution::KeepRemote,
        Some(2) => InterventionResolution::KeepBoth,
        _ => InterventionResolution::Skip,
    }
}

fn console_is_interactive() -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal()
}

fn print_notification(notification: &syncore::callbacks::Notification) {
    println!("{notification}");
}
