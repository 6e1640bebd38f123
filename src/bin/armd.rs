//! Arm motion daemon
//!
//! Reads one JSON trajectory per line on stdin, streams it to the arm
//! driver, and reports results as JSON events on stdout. Ctrl-C preempts
//! an in-flight motion; a second Ctrl-C while idle shuts the daemon down.

use anyhow::{Context, Result};
use clap::Parser;
use manipd::events::{output_event, ErrorEvent, MotionEvent, RequestEvent};
use manipd::{DaemonConfig, ManipService, SimArmChannel, Trajectory, TrajectoryDispatcher};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "armd")]
#[command(about = "Manipulator arm trajectory daemon")]
#[command(version)]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long)]
    config: Option<String>,
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

    info!("Starting arm daemon");
    info!("Configuration file: {}", config_path);

    let config = DaemonConfig::load_from_path(&config_path)
        .context("Failed to load daemon configuration")?;

    let channel = Arc::new(SimArmChannel::spawn(
        config.arm.joint_count,
        Duration::from_secs_f64(config.arm.feedback_period()),
    ));
    let progress = ManipService::progress_from_config(&config);
    let dispatcher = Arc::new(TrajectoryDispatcher::new(
        config.arm.clone(),
        channel,
        progress,
    )?);

    info!("Arm daemon ready, reading trajectories from stdin");

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

                let trajectory: Trajectory = match serde_json::from_str(line) {
                    Ok(trajectory) => trajectory,
                    Err(e) => {
                        warn!("Rejected request {}: {}", request_id, e);
                        output_event(&ErrorEvent::rejected(
                            request_id,
                            &format!("invalid trajectory: {}", e),
                        ));
                        continue;
                    }
                };

                output_event(&RequestEvent::accepted(request_id, "trajectory accepted"));
                run_trajectory(&dispatcher, request_id, trajectory).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    info!("Arm daemon shut down");
    Ok(())
}

/// Drive one trajectory to a terminal result, preempting on Ctrl-C.
async fn run_trajectory(
    dispatcher: &Arc<TrajectoryDispatcher>,
    request_id: u64,
    trajectory: Trajectory,
) {
    let execution = dispatcher.execute(trajectory);
    tokio::pin!(execution);

    let result = loop {
        tokio::select! {
            result = &mut execution => break result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, preempting motion");
                dispatcher.cancel();
            }
        }
    };

    match result {
        Ok(result) => output_event(&MotionEvent::finished(request_id, result)),
        Err(e) => output_event(&ErrorEvent::rejected(request_id, &e.to_string())),
    }
}
