//! Configuration loading for the manipulator daemons

use crate::{ManipError, Result};
use serde::{Deserialize, Serialize};
use std::fs;

/// How the arm controller accepts motion commands.
///
/// Selected at configuration time; the dispatcher branches once on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Controller accepts the whole trajectory as a single goal
    WholeGoal,
    /// Controller requires waypoints released one by one in time order
    PointByPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub arm: ArmConfig,
    pub gripper: GripperConfig,
    pub publishing: Option<PublishingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmConfig {
    /// Degree-of-freedom count; every waypoint must match
    pub joint_count: usize,
    pub streaming_mode: Option<StreamingMode>,
    /// Seconds the dispatcher may run ahead of real time
    pub lookahead_horizon_s: Option<f64>,
    /// Max allowed |measured - commanded| per joint, radians
    pub tracking_tolerance_rad: Option<f64>,
    /// How far behind schedule the driver may fall before abort
    pub schedule_slip_tolerance_s: Option<f64>,
    /// Extra wall-clock time allowed after the last waypoint is due
    pub completion_grace_s: Option<f64>,
    /// Expected driver feedback period; bounds cancellation latency
    pub feedback_period_s: Option<f64>,
    /// How long to wait for the motion-stopped acknowledgment after a stop
    pub stop_ack_timeout_s: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GripperConfig {
    /// Physical position of the fully-open state
    pub open_position: Option<f64>,
    /// Physical position of the fully-closed state
    pub closed_position: Option<f64>,
    /// Device effort/force rating; MoveTo requests above this are rejected
    pub max_effort: Option<f64>,
    /// Effort used for Open/Close and MoveTo without an explicit limit
    pub default_effort: Option<f64>,
    /// Convergence tolerance for Reached classification
    pub position_tolerance: Option<f64>,
    pub actuation_timeout_s: Option<f64>,
    pub feedback_period_s: Option<f64>,
    pub stop_ack_timeout_s: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingConfig {
    pub progress_events: Option<bool>,
    pub pretty: Option<bool>,
}

impl DaemonConfig {
    pub fn load_from_path(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ManipError::Config(format!("Failed to read {}: {}", path, e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: DaemonConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.arm.joint_count == 0 {
            return Err(ManipError::Config("joint_count must be positive".to_string()));
        }
        if self.gripper.max_effort() <= 0.0 {
            return Err(ManipError::Config("max_effort must be positive".to_string()));
        }
        Ok(())
    }

    pub fn publishing(&self) -> PublishingConfig {
        self.publishing.clone().unwrap_or_default()
    }
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            joint_count: 6,
            streaming_mode: Some(StreamingMode::PointByPoint),
            lookahead_horizon_s: Some(0.5),
            tracking_tolerance_rad: Some(0.1),
            schedule_slip_tolerance_s: Some(0.5),
            completion_grace_s: Some(2.0),
            feedback_period_s: Some(0.1),
            stop_ack_timeout_s: Some(2.0),
        }
    }
}

impl ArmConfig {
    pub fn streaming_mode(&self) -> StreamingMode {
        self.streaming_mode.unwrap_or(StreamingMode::PointByPoint)
    }

    pub fn lookahead_horizon(&self) -> f64 {
        self.lookahead_horizon_s.unwrap_or(0.5)
    }

    pub fn tracking_tolerance(&self) -> f64 {
        self.tracking_tolerance_rad.unwrap_or(0.1)
    }

    pub fn schedule_slip_tolerance(&self) -> f64 {
        self.schedule_slip_tolerance_s.unwrap_or(0.5)
    }

    pub fn completion_grace(&self) -> f64 {
        self.completion_grace_s.unwrap_or(2.0)
    }

    pub fn feedback_period(&self) -> f64 {
        self.feedback_period_s.unwrap_or(0.1)
    }

    pub fn stop_ack_timeout(&self) -> f64 {
        self.stop_ack_timeout_s.unwrap_or(2.0)
    }
}

impl Default for GripperConfig {
    fn default() -> Self {
        Self {
            open_position: Some(0.085),
            closed_position: Some(0.0),
            max_effort: Some(40.0),
            default_effort: Some(10.0),
            position_tolerance: Some(0.005),
            actuation_timeout_s: Some(5.0),
            feedback_period_s: Some(0.1),
            stop_ack_timeout_s: Some(2.0),
        }
    }
}

impl GripperConfig {
    pub fn open_position(&self) -> f64 {
        self.open_position.unwrap_or(0.085)
    }

    pub fn closed_position(&self) -> f64 {
        self.closed_position.unwrap_or(0.0)
    }

    /// Lower bound of the physical range
    pub fn range_min(&self) -> f64 {
        self.open_position().min(self.closed_position())
    }

    /// Upper bound of the physical range
    pub fn range_max(&self) -> f64 {
        self.open_position().max(self.closed_position())
    }

    pub fn max_effort(&self) -> f64 {
        self.max_effort.unwrap_or(40.0)
    }

    pub fn default_effort(&self) -> f64 {
        self.default_effort.unwrap_or(10.0)
    }

    pub fn position_tolerance(&self) -> f64 {
        self.position_tolerance.unwrap_or(0.005)
    }

    pub fn actuation_timeout(&self) -> f64 {
        self.actuation_timeout_s.unwrap_or(5.0)
    }

    pub fn feedback_period(&self) -> f64 {
        self.feedback_period_s.unwrap_or(0.1)
    }

    pub fn stop_ack_timeout(&self) -> f64 {
        self.stop_ack_timeout_s.unwrap_or(2.0)
    }
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            progress_events: Some(true),
            pretty: Some(false),
        }
    }
}

impl PublishingConfig {
    pub fn progress_events(&self) -> bool {
        self.progress_events.unwrap_or(true)
    }

    pub fn pretty(&self) -> bool {
        self.pretty.unwrap_or(false)
    }
}
