//! Gripper actuation daemon
//!
//! Reads one JSON gripper command per line on stdin, drives it to a
//! terminal outcome, and reports results as JSON events on stdout.
//! Ctrl-C preempts an in-flight actuation; a second Ctrl-C while idle
//! shuts the daemon down.

use anyhow::{Context, Result};
use clap::Parser;
use manipd::events::{output_event, ErrorEvent, GripperEvent, RequestEvent};
use manipd::{DaemonConfig, GripperCommand, GripperService, ManipService, SimGripperChannel};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gripperd")]
#[command(about = "Manipulator gripper actuation daemon")]
#[command(version)]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Place a simulated object of this width in the closing path
    #[arg(long)]
    object: Option<f64>,
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("MANIPD_CONFIG").ok())
            .unwrap_or_else(|| "config/default_config.yaml".to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = args.get_config_path();

    info!("Starting gripper daemon");
    info!("Configuration file: {}", config_path);

    let config = DaemonConfig::load_from_path(&config_path)
        .context("Failed to load daemon configuration")?;

    let channel = Arc::new(SimGripperChannel::spawn(
        config.gripper.open_position(),
        args.object,
        Duration::from_secs_f64(config.gripper.feedback_period()),
    ));
    let progress = ManipService::progress_from_config(&config);
    let service = Arc::new(GripperService::new(
        config.gripper.clone(),
        channel,
        progress,
    )?);

    info!("Gripper daemon ready, reading commands from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut request_id: u64 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("stdin closed, shutting down");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                request_id += 1;

                let command: GripperCommand = match serde_json::from_str(line) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!("Rejected request {}: {}", request_id, e);
                        output_event(&ErrorEvent::rejected(
                            request_id,
                            &format!("invalid gripper command: {}", e),
                        ));
                        continue;
                    }
                };

                output_event(&RequestEvent::accepted(request_id, "gripper command accepted"));
                run_actuation(&service, request_id, command).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    info!("Gripper daemon shut down");
    Ok(())
}

/// Drive one actuation to a terminal outcome, preempting on Ctrl-C.
async fn run_actuation(service: &Arc<GripperService>, request_id: u64, command: GripperCommand) {
    let actuation = service.actuate(command);
    tokio::pin!(actuation);

    let outcome = loop {
        tokio::select! {
            outcome = &mut actuation => break outcome,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, preempting actuation");
                service.cancel();
            }
        }
    };

    match outcome {
        Ok(outcome) => output_event(&GripperEvent::finished(request_id, outcome)),
        Err(e) => output_event(&ErrorEvent::rejected(request_id, &e.to_string())),
    }
}
