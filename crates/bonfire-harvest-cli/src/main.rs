//! Bonfire Harvest command-line entry point.

mod logging;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use bonfire_harvest::config::parse_letters;
use bonfire_harvest::renderer::chromium::ChromiumRenderer;
use bonfire_harvest::{
    Credentials, EventBus, HarvestConfig, HarvestEvent, HarvestReport, Orchestrator, Renderer,
};

use scheduler::Schedule;

#[derive(Parser)]
#[command(
    name = "bonfire-harvest",
    about = "Harvest public procurement opportunities from Bonfire Hub agency portals",
    version
)]
struct Cli {
    /// JSON configuration file. Missing keys keep their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Portal account email.
    #[arg(long, env = "BONFIRE_EMAIL", global = true)]
    email: Option<String>,

    /// Portal account password.
    #[arg(long, env = "BONFIRE_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Target letters, e.g. "D,G,J,L".
    #[arg(long, global = true)]
    letters: Option<String>,

    /// Agencies kept per letter.
    #[arg(long, global = true)]
    agencies_per_letter: Option<usize>,

    /// Directory for the raw artifacts.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Show the browser window.
    #[arg(long, global = true)]
    headed: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Also write logs to this file, truncated at start.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one harvest (default).
    Scrape,

    /// Run the harvest repeatedly.
    Schedule {
        /// Hours between runs.
        #[arg(long, default_value_t = 24)]
        interval_hours: u64,

        /// Run a single time and exit.
        #[arg(long)]
        run_once: bool,
    },

    /// Print the effective configuration as JSON.
    Config,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   bonfire-harvest completions bash > ~/.local/share/bash-completion/completions/bonfire-harvest
    ///   bonfire-harvest completions zsh > ~/.zfunc/_bonfire-harvest
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    match cli.command.take().unwrap_or(Commands::Scrape) {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "bonfire-harvest", &mut std::io::stdout());
        }

        Commands::Config => {
            let config = load_config(&cli)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Scrape => {
            logging::init(&cli.log_level, cli.log_file.as_deref())?;
            let config = load_config(&cli)?;
            let credentials = credentials(&cli)?;

            let report = harvest(&config, &credentials).await?;
            print_summary(&config, &report);
            if report.is_empty() {
                eprintln!("No agencies were harvested.");
                std::process::exit(1);
            }
        }

        Commands::Schedule {
            interval_hours,
            run_once,
        } => {
            logging::init(&cli.log_level, cli.log_file.as_deref())?;
            let config = load_config(&cli)?;
            let credentials = credentials(&cli)?;
            if interval_hours == 0 {
                bail!("--interval-hours must be at least 1");
            }

            let mut schedule = Schedule::every_hours(interval_hours);
            schedule.run_once = run_once;
            info!(
                "scheduling harvest every {interval_hours}h{}",
                if run_once { " (single run)" } else { "" }
            );

            let shutdown = Arc::new(Notify::new());
            let shutdown_signal = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let ctrl_c = || async {
                    let _ = tokio::signal::ctrl_c().await;
                };
                scheduler::watch_interrupts(ctrl_c, shutdown_signal).await;
                warn!("second interrupt, exiting now");
                std::process::exit(130);
            });

            scheduler::run(&schedule, shutdown, || async {
                let report = harvest(&config, &credentials).await?;
                print_summary(&config, &report);
                if report.is_empty() {
                    warn!("run finished without harvesting any agency");
                }
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        }
    }

    Ok(())
}

/// Defaults, then the config file, then `BONFIRE_*`, then command-line flags.
fn load_config(cli: &Cli) -> Result<HarvestConfig> {
    let mut config = match &cli.config {
        Some(path) => HarvestConfig::from_file(path)?,
        None => HarvestConfig::default(),
    };
    config.apply_env();

    if let Some(letters) = &cli.letters {
        config.target_letters = parse_letters(letters);
    }
    if let Some(n) = cli.agencies_per_letter {
        config.agencies_per_letter = n;
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if cli.headed {
        config.headless = false;
    }

    config.validate()?;
    Ok(config)
}

fn credentials(cli: &Cli) -> Result<Credentials> {
    let credentials = Credentials::new(
        cli.email.clone().unwrap_or_default(),
        cli.password.clone().unwrap_or_default(),
    );
    if !credentials.is_complete() {
        bail!("credentials missing: pass --email/--password or set BONFIRE_EMAIL and BONFIRE_PASSWORD");
    }
    Ok(credentials)
}

/// Launch Chromium, run one harvest, and shut the browser down again.
async fn harvest(config: &HarvestConfig, credentials: &Credentials) -> Result<HarvestReport> {
    let renderer = ChromiumRenderer::launch(config)
        .await
        .context("failed to start the browser")?;
    let renderer: Arc<dyn Renderer> = Arc::new(renderer);

    let bus = EventBus::default();
    let progress = tokio::spawn(print_progress(bus.subscribe()));

    let result = Orchestrator::new(config.clone(), Arc::clone(&renderer))
        .with_events(bus)
        .run(credentials)
        .await;

    if let Err(e) = renderer.shutdown().await {
        warn!("browser shutdown failed: {e:#}");
    }
    let _ = progress.await;

    Ok(result?)
}

/// Print progress lines until the run's event bus is dropped.
async fn print_progress(mut rx: broadcast::Receiver<HarvestEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => report_event(&event),
            Err(RecvError::Lagged(n)) => debug!("progress printer skipped {n} events"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn report_event(event: &HarvestEvent) {
    match event {
        HarvestEvent::DiscoveryComplete {
            pages,
            agencies,
            reason,
        } => eprintln!("  discovery: {agencies} agencies from {pages} listing pages ({reason})"),
        HarvestEvent::AgencyHarvested {
            index,
            total,
            agency_name,
            open_count,
            past_count,
        } => eprintln!("  [{index}/{total}] {agency_name}: {open_count} open, {past_count} past"),
        HarvestEvent::FeedFailed {
            agency_name,
            feed,
            attempts,
        } => eprintln!("  ! {agency_name}: {feed} feed unavailable after {attempts} attempts"),
        other => debug!(
            "event: {}",
            serde_json::to_string(other).unwrap_or_default()
        ),
    }
}

fn print_summary(config: &HarvestConfig, report: &HarvestReport) {
    println!("Harvest summary");
    println!("  Agencies processed:  {}", report.agencies.len());
    println!("  Open opportunities:  {}", report.open_count());
    println!("  Past opportunities:  {}", report.past_count());
    println!(
        "  Listing pages:       {} ({})",
        report.pages_visited, report.stop
    );
    println!("  Elapsed:             {:.1}s", report.elapsed.as_secs_f64());
    println!("  Artifacts:           {}", config.output_dir.display());
}
