//! Combined manipulator daemon
//!
//! Reads one JSON move-then-grasp request per line on stdin, runs the
//! trajectory and, on success, the gripper actuation, and reports the
//! combined result as JSON events on stdout. Ctrl-C preempts whichever
//! phase is active; a second Ctrl-C while idle shuts the daemon down.

use anyhow::{Context, Result};
use clap::Parser;
use manipd::events::{output_event, CombinedEvent, ErrorEvent, RequestEvent};
use manipd::types::CombinedRequest;
use manipd::{DaemonConfig, ManipService, SimArmChannel, SimGripperChannel};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "manipd")]
#[command(about = "Combined manipulator move-then-grasp daemon")]
#[command(version)]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Place a simulated object of this width in the gripper closing path
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

    info!("Starting combined manipulator daemon");
    info!("Configuration file: {}", config_path);

    let config = DaemonConfig::load_from_path(&config_path)
        .context("Failed to load daemon configuration")?;

    let arm_channel = Arc::new(SimArmChannel::spawn(
        config.arm.joint_count,
        Duration::from_secs_f64(config.arm.feedback_period()),
    ));
    let gripper_channel = Arc::new(SimGripperChannel::spawn(
        config.gripper.open_position(),
        args.object,
        Duration::from_secs_f64(config.gripper.feedback_period()),
    ));
    let progress = ManipService::progress_from_config(&config);
    let service = ManipService::new(&config, arm_channel, gripper_channel, progress)?;

    info!("Combined daemon ready, reading move-then-grasp requests from stdin");

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

                let request: CombinedRequest = match serde_json::from_str(line) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Rejected request {}: {}", request_id, e);
                        output_event(&ErrorEvent::rejected(
                            request_id,
                            &format!("invalid combined request: {}", e),
                        ));
                        continue;
                    }
                };

                output_event(&RequestEvent::accepted(request_id, "combined request accepted"));
                run_combined(&service, request_id, request).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    info!("Combined daemon shut down");
    Ok(())
}

/// Drive one combined request to a terminal result, preempting the active
/// phase on Ctrl-C.
async fn run_combined(service: &ManipService, request_id: u64, request: CombinedRequest) {
    let operation = service.move_then_grasp(request.trajectory, request.gripper);
    tokio::pin!(operation);

    let result = loop {
        tokio::select! {
            result = &mut operation => break result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, preempting combined operation");
                service.coordinator().cancel();
            }
        }
    };

    match result {
        Ok(result) => output_event(&CombinedEvent::finished(request_id, result)),
        Err(e) => output_event(&ErrorEvent::rejected(request_id, &e.to_string())),
    }
}
