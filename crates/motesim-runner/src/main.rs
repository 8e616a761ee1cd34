//! motesim command line.

use clap::{Parser, Subcommand};
use motesim_runner::{scenario, RunReport, RunnerError, ScenarioConfig, Scheduler, SimTime};
use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "motesim", version, about = "Discrete-event sensor network simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scenario file.
    Run {
        /// Scenario YAML.
        scenario: PathBuf,

        /// Simulated milliseconds to run.
        #[arg(long, default_value_t = 10_000)]
        duration_ms: u64,

        /// Wall-clock sleep per simulated millisecond.
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Override the scenario's random seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Trace motes by name or ID (`beacon-1,mote:3`, `*`).
        #[arg(long)]
        trace: Option<String>,

        /// Log progress every N wall-clock seconds.
        #[arg(long)]
        stats_interval: Option<u64>,

        /// Print the report as JSON.
        #[arg(long, alias = "stats-json")]
        json: bool,
    },

    /// Parse and validate a scenario file.
    Check {
        /// Scenario YAML.
        scenario: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    motesim_metrics::describe_metrics();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), RunnerError> {
    match command {
        Command::Check { scenario } => {
            let config = ScenarioConfig::load(&scenario)?;
            println!(
                "{}: {} motes, medium {:?}",
                scenario.display(),
                config.motes.len(),
                config.medium.kind()
            );
            Ok(())
        }
        Command::Run {
            scenario,
            duration_ms,
            delay_ms,
            seed,
            trace,
            stats_interval,
            json,
        } => {
            let mut config = ScenarioConfig::load(&scenario)?;
            if let Some(seed) = seed {
                config.simulation.random_seed = seed;
            }
            if let Some(delay_ms) = delay_ms {
                config.simulation.delay_ms = delay_ms;
            }
            if trace.is_some() {
                config.simulation.trace = trace;
            }
            if stats_interval.is_some() {
                config.simulation.periodic_stats_interval_secs = stats_interval;
            }
            info!(
                "Running {} for {} ms with seed {}",
                scenario.display(),
                duration_ms,
                config.simulation.random_seed
            );

            let (simulation, motes) = scenario::build(&config)?;
            let mut scheduler = Scheduler::new(simulation)?;
            let control = scheduler.control().clone();
            if let Err(e) = ctrlc::set_handler(move || control.request_stop()) {
                warn!("Could not install Ctrl-C handler: {}", e);
            }

            // Events at the limit still run.
            let limit = SimTime::from_millis(duration_ms.saturating_sub(1));
            scheduler.start_until(Some(limit))?;
            let reason = scheduler.wait()?;
            let alerts = scheduler.watchdog_alerts();
            let simulation = scheduler.into_simulation()?;
            let Some(reason) = reason else {
                return Err(RunnerError::SchedulerPanicked);
            };
            let report = RunReport::collect(&simulation, &reason, &motes);

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, alerts);
            }
            if let motesim_runner::StopReason::Fault(e) = reason {
                return Err(e.into());
            }
            Ok(())
        }
    }
}

fn print_report(report: &RunReport, watchdog_alerts: u64) {
    println!("Stopped at {} ms: {}", report.end_time_ms, report.stop_reason);
    println!(
        "Events: {} ({} fine sweeps, {} coarse ticks, {} mote timers)",
        report.simulation.events_dispatched,
        report.simulation.fine_sweeps,
        report.simulation.coarse_ticks,
        report.simulation.mote_timers
    );
    println!(
        "Medium: {} transmissions, {} delivered, {} collisions",
        report.medium.transmissions, report.medium.packets_delivered, report.medium.collisions
    );
    if watchdog_alerts > 0 {
        println!("Watchdog alerts: {}", watchdog_alerts);
    }
    print_row("mote", "name", "kind", "sent", "received", "invalid");
    for mote in &report.motes {
        print_row(
            mote.id.0,
            mote.name.as_deref().unwrap_or("-"),
            format!("{:?}", mote.kind).to_lowercase(),
            mote.sent,
            mote.received,
            mote.invalid,
        );
    }
}

/// One line of the per-mote table.
fn print_row(
    mote: impl Display,
    name: impl Display,
    kind: impl Display,
    sent: impl Display,
    received: impl Display,
    invalid: impl Display,
) {
    println!(
        "{:<8} {:<16} {:<7} {:>6} {:>9} {:>8}",
        mote, name, kind, sent, received, invalid
    );
}
