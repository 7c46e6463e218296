//! Command-line front end for the ramp controller.
//!
//! DC-pair and HV ramps are subcommands of a single binary sharing one
//! safety policy and one ramp core. `check` validates a target against the
//! interlock table without touching any instrument.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use smu_ramp::adapters::{Adapter, VisaAdapter};
use smu_ramp::config::Settings;
use smu_ramp::instrument::{shared, MockChannel, RailId, SharedChannel, SmuChannel};
use smu_ramp::policy::{self, BiasTarget, DutVariant};
use smu_ramp::session::{BiasSession, RampOutcome, RampRequest};
use smu_ramp::telemetry::RampEvent;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smu_ramp", about = "Coordinated bias ramp control for SMU rails")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Chip under test (W8R4, W2R17 or W8R6); overrides the configuration.
    #[arg(long, global = true)]
    variant: Option<String>,

    /// Run against simulated instruments instead of hardware.
    #[arg(long, global = true)]
    mock: bool,

    /// Emit per-step samples as JSON lines instead of plain text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct StepArgs {
    /// Voltage increment between steps, volts.
    #[arg(long)]
    step: Option<f64>,

    /// Settle delay between steps, seconds.
    #[arg(long)]
    delay: Option<f64>,
}

#[derive(Subcommand)]
enum Command {
    /// Ramp the DC pair to the given magnitudes (HV is driven to zero).
    Dc {
        /// pwell magnitude, volts.
        #[arg(long)]
        pwell: f64,

        /// Absolute value of the psub-pwell difference, volts.
        #[arg(long)]
        psub: f64,

        #[command(flatten)]
        step_args: StepArgs,
    },
    /// Ramp the HV rail to the given magnitude (the DC pair is driven to zero).
    Hv {
        /// HV magnitude, volts.
        #[arg(long)]
        hv: f64,

        #[command(flatten)]
        step_args: StepArgs,
    },
    /// Validate a target against the safety policy without touching hardware.
    Check {
        /// HV magnitude, volts.
        #[arg(long, default_value_t = 0.0)]
        hv: f64,

        /// pwell magnitude, volts.
        #[arg(long, default_value_t = 0.0)]
        pwell: f64,

        /// Absolute value of the psub-pwell difference, volts.
        #[arg(long, default_value_t = 0.0)]
        psub: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings =
        Settings::load(cli.config.as_deref()).context("failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.application.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let variant = match &cli.variant {
        Some(name) => name
            .parse::<DutVariant>()
            .map_err(|e| anyhow::anyhow!(e))?,
        None => settings.ramp.variant,
    };

    let (target, step_args) = match cli.command {
        Command::Check { hv, pwell, psub } => {
            let target = BiasTarget { hv, pwell, psub };
            match policy::validate(&target, variant) {
                Ok(()) => {
                    println!("target is allowed on {variant}");
                    return Ok(());
                }
                Err(violation) => {
                    println!("target rejected: {violation}");
                    std::process::exit(1);
                }
            }
        }
        Command::Dc {
            pwell,
            psub,
            step_args,
        } => (BiasTarget::dc_pair(pwell, psub), step_args),
        Command::Hv { hv, step_args } => (BiasTarget::hv_only(hv), step_args),
    };

    let delay = match step_args.delay {
        Some(seconds) if !seconds.is_finite() || seconds < 0.0 => {
            bail!("--delay must be a non-negative number of seconds, got {seconds}");
        }
        Some(seconds) => Duration::from_secs_f64(seconds),
        None => settings.ramp.delay,
    };
    let request = RampRequest::new(target)
        .with_step(step_args.step.unwrap_or(settings.ramp.step))
        .with_delay(delay);

    let session = if cli.mock {
        info!("using simulated instruments");
        mock_session(variant)
    } else {
        visa_session(&settings, variant).await?
    };

    let mut events = session.subscribe();
    let json = cli.json;
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event, json);
        }
    });

    let outcome = session.ramp(&request).await?;
    // Dropping the session closes the event stream, letting the printer
    // drain whatever is still buffered before exiting.
    drop(session);
    let _ = printer.await;

    match outcome {
        RampOutcome::Completed(reports) => {
            println!("Voltage ramp completed.");
            for report in reports {
                println!(
                    "{}: {:.1} V, {:.2e} A",
                    report.rail, report.level, report.current
                );
            }
            Ok(())
        }
        RampOutcome::Rejected(violation) => {
            bail!("ramp rejected: {violation}");
        }
    }
}

fn print_event(event: &RampEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    match event {
        RampEvent::RailStarted { rail, to, .. } => {
            println!("Ramping {rail} to {to} V");
        }
        RampEvent::Step(sample) => {
            println!(
                "{}: {:.1} V, {:.2e} A",
                sample.rail, sample.level, sample.current
            );
        }
        RampEvent::RailCompleted { rail, level } => {
            println!("{rail} resting at {level} V");
        }
    }
}

fn mock_session(variant: DutVariant) -> BiasSession {
    BiasSession::new(
        shared(MockChannel::new(RailId::Hv)),
        shared(MockChannel::new(RailId::Pwell)),
        shared(MockChannel::new(RailId::Psub)),
        variant,
    )
}

async fn visa_session(settings: &Settings, variant: DutVariant) -> Result<BiasSession> {
    let hv = connect_channel(
        RailId::Hv,
        &settings.instruments.hv_resource,
        settings.instruments.io_timeout,
    )
    .await?;
    let pwell = connect_channel(
        RailId::Pwell,
        &settings.instruments.pwell_resource,
        settings.instruments.io_timeout,
    )
    .await?;
    let psub = connect_channel(
        RailId::Psub,
        &settings.instruments.psub_resource,
        settings.instruments.io_timeout,
    )
    .await?;
    Ok(BiasSession::new(hv, pwell, psub, variant))
}

async fn connect_channel(
    rail: RailId,
    resource: &str,
    timeout: Duration,
) -> Result<SharedChannel> {
    let mut adapter = VisaAdapter::new(resource).with_timeout(timeout);
    adapter
        .connect()
        .await
        .with_context(|| format!("failed to connect {rail} at {resource}"))?;
    info!(rail = %rail, adapter = %adapter.info(), "connected");
    Ok(shared(SmuChannel::new(rail.name(), rail, adapter)))
}
