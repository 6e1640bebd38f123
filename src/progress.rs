//! Progress observer abstraction
//!
//! Trait-based interface for publishing execution progress to any observer
//! (console, IPC bridge, test probe) without coupling the state machines to
//! a transport.

use crate::types::{FeedbackSample, GripperOutcome, MotionResult};
use async_trait::async_trait;
use serde::Serialize;

/// Waypoint dispatch progress for observers
#[derive(Debug, Clone, Serialize)]
pub struct WaypointProgress {
    pub index: usize,
    pub total: usize,
    pub time_from_start: f64,
}

/// Trait for publishing execution progress.
///
/// All methods are best-effort from the state machines' point of view: a
/// failing observer never changes the outcome of an execution.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    /// A trajectory passed validation and streaming began
    async fn motion_started(&self, waypoints: usize) -> anyhow::Result<()>;

    /// One waypoint was released to the channel
    async fn waypoint_dispatched(&self, progress: &WaypointProgress) -> anyhow::Result<()>;

    /// The trajectory reached a terminal state
    async fn motion_finished(&self, result: &MotionResult) -> anyhow::Result<()>;

    /// A gripper actuation command was issued
    async fn grasp_started(&self, target: f64, effort: f64) -> anyhow::Result<()>;

    /// A gripper feedback sample was consumed
    async fn grasp_feedback(&self, sample: &FeedbackSample) -> anyhow::Result<()> {
        let _ = sample;
        Ok(())
    }

    /// The actuation reached a terminal outcome
    async fn grasp_finished(&self, outcome: &GripperOutcome) -> anyhow::Result<()>;
}

/// Discards all progress. Used when no observer is desired.
#[derive(Debug, Clone)]
pub struct NoOpProgress;

#[async_trait]
impl ProgressPublisher for NoOpProgress {
    async fn motion_started(&self, _waypoints: usize) -> anyhow::Result<()> {
        Ok(())
    }

    async fn waypoint_dispatched(&self, _progress: &WaypointProgress) -> anyhow::Result<()> {
        Ok(())
    }

    async fn motion_finished(&self, _result: &MotionResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn grasp_started(&self, _target: f64, _effort: f64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn grasp_finished(&self, _outcome: &GripperOutcome) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Prints progress to stdout as JSON lines, for debugging.
#[derive(Debug, Clone)]
pub struct ConsoleProgress {
    pub pretty_print: bool,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            pretty_print: false,
        }
    }

    pub fn pretty() -> Self {
        Self { pretty_print: true }
    }

    fn print<T: Serialize>(&self, label: &str, data: &T) -> anyhow::Result<()> {
        if self.pretty_print {
            println!("[{}] {}", label, serde_json::to_string_pretty(data)?);
        } else {
            println!("[{}] {}", label, serde_json::to_string(data)?);
        }
        Ok(())
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressPublisher for ConsoleProgress {
    async fn motion_started(&self, waypoints: usize) -> anyhow::Result<()> {
        self.print("MOTION", &serde_json::json!({ "started": waypoints }))
    }

    async fn waypoint_dispatched(&self, progress: &WaypointProgress) -> anyhow::Result<()> {
        self.print("WAYPOINT", progress)
    }

    async fn motion_finished(&self, result: &MotionResult) -> anyhow::Result<()> {
        self.print("MOTION", result)
    }

    async fn grasp_started(&self, target: f64, effort: f64) -> anyhow::Result<()> {
        self.print(
            "GRASP",
            &serde_json::json!({ "target": target, "effort": effort }),
        )
    }

    async fn grasp_feedback(&self, sample: &FeedbackSample) -> anyhow::Result<()> {
        self.print("GRASP", sample)
    }

    async fn grasp_finished(&self, outcome: &GripperOutcome) -> anyhow::Result<()> {
        self.print("GRASP", outcome)
    }
}
