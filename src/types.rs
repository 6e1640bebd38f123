//! Core data model for arm trajectories and gripper actuation

use crate::{ManipError, Result};
use serde::{Deserialize, Serialize};

/// One timestamped joint-position target within a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Joint angles in radians, one per degree of freedom
    pub positions: Vec<f64>,
    /// Optional joint velocities in rad/s
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocities: Option<Vec<f64>>,
    /// Seconds from trajectory start at which this waypoint is due
    pub time_from_start: f64,
}

impl Waypoint {
    pub fn new(positions: Vec<f64>, time_from_start: f64) -> Self {
        Self {
            positions,
            velocities: None,
            time_from_start,
        }
    }
}

/// Ordered sequence of waypoints describing arm motion over time.
///
/// Owned exclusively by the dispatcher for the duration of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub points: Vec<Waypoint>,
}

impl Trajectory {
    pub fn new(points: Vec<Waypoint>) -> Self {
        Self { points }
    }

    /// Validate the whole trajectory before anything is sent.
    ///
    /// Checks: non-empty, time-from-start strictly increasing starting above
    /// zero, and joint counts consistent with the configured arm. A failure
    /// here means zero commands have reached the channel.
    pub fn validate(&self, joint_count: usize) -> Result<()> {
        if self.points.is_empty() {
            return Err(ManipError::Validation("trajectory is empty".to_string()));
        }

        let mut previous_time = 0.0;
        for (index, point) in self.points.iter().enumerate() {
            if point.positions.len() != joint_count {
                return Err(ManipError::Validation(format!(
                    "waypoint {} has {} joints, arm has {}",
                    index,
                    point.positions.len(),
                    joint_count
                )));
            }

            if let Some(velocities) = &point.velocities {
                if velocities.len() != joint_count {
                    return Err(ManipError::Validation(format!(
                        "waypoint {} has {} velocities, arm has {} joints",
                        index,
                        velocities.len(),
                        joint_count
                    )));
                }
            }

            if point.time_from_start <= previous_time {
                return Err(ManipError::Validation(format!(
                    "waypoint {} time {:.3}s is not after {:.3}s",
                    index, point.time_from_start, previous_time
                )));
            }
            previous_time = point.time_from_start;
        }

        Ok(())
    }

    /// Total scheduled duration of the trajectory in seconds
    pub fn duration(&self) -> f64 {
        self.points.last().map(|p| p.time_from_start).unwrap_or(0.0)
    }
}

/// Why an in-flight motion was aborted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// Transport to the driver failed mid-execution. Never auto-retried.
    ConnectionLost,
    /// Measured position deviated from commanded beyond tolerance
    TrackingError { deviation: f64 },
    /// The driver fell behind the waypoint schedule beyond tolerance
    Stall,
    /// The driver reported a fault of its own
    Driver { message: String },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::ConnectionLost => write!(f, "connection lost"),
            AbortReason::TrackingError { deviation } => {
                write!(f, "tracking error ({:.4} rad)", deviation)
            }
            AbortReason::Stall => write!(f, "driver fell behind schedule"),
            AbortReason::Driver { message } => write!(f, "driver fault: {}", message),
        }
    }
}

/// Tagged state of an in-flight trajectory.
///
/// Exactly one trajectory may be Streaming per arm instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Streaming,
    Succeeded,
    Aborted(AbortReason),
    Preempted,
}

/// Terminal result of one trajectory execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MotionResult {
    Succeeded,
    Aborted(AbortReason),
    Preempted,
}

impl MotionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, MotionResult::Succeeded)
    }
}

/// A single gripper actuation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GripperCommand {
    /// Move to the configured fully-open position
    Open,
    /// Move to the configured fully-closed position
    Close,
    /// Move to an explicit position with an optional effort limit
    MoveTo {
        position: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        effort: Option<f64>,
    },
}

/// Terminal outcome of one gripper actuation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GripperOutcome {
    /// Converged to the target within tolerance and stationary
    Reached { position: f64 },
    /// Motion stopped short of the target. Expected when gripping an
    /// object smaller than full closure, so not an error.
    Stalled { position: f64 },
    /// No terminal condition within the configured timeout. The actuator
    /// has been commanded to stop before this is reported.
    TimedOut,
    Aborted { reason: String },
}

/// Immutable state snapshot pushed by a driver.
///
/// Consumed, never mutated, by the dispatcher and gripper service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSample {
    /// Measured positions, one per controlled joint/finger
    pub positions: Vec<f64>,
    /// Unix epoch seconds when the driver emitted the sample
    pub timestamp: f64,
    /// Whether the device is still moving
    pub in_motion: bool,
    /// Actuator stall / force-limit flag (gripper drivers only)
    #[serde(default)]
    pub stalled: bool,
}

impl FeedbackSample {
    pub fn new(positions: Vec<f64>, timestamp: f64, in_motion: bool) -> Self {
        Self {
            positions,
            timestamp,
            in_motion,
            stalled: false,
        }
    }
}

/// One combined move-then-grasp request, as accepted by the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRequest {
    pub trajectory: Trajectory,
    pub gripper: GripperCommand,
}

/// Result of a combined move-then-grasp request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "combined", rename_all = "snake_case")]
pub enum CombinedResult {
    /// Motion succeeded and the grasp ran to a terminal outcome
    Completed { grasp: GripperOutcome },
    /// Motion did not succeed; the gripper command was never issued
    MotionFailed { motion: MotionResult },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waypoint(t: f64) -> Waypoint {
        Waypoint::new(vec![0.0; 6], t)
    }

    #[test]
    fn valid_trajectory_passes() {
        let trajectory = Trajectory::new(vec![waypoint(1.0), waypoint(2.0), waypoint(3.0)]);
        assert!(trajectory.validate(6).is_ok());
        assert_eq!(trajectory.duration(), 3.0);
    }

    #[test]
    fn empty_trajectory_rejected() {
        let trajectory = Trajectory::new(vec![]);
        assert!(matches!(
            trajectory.validate(6),
            Err(ManipError::Validation(_))
        ));
    }

    #[test]
    fn non_increasing_time_rejected() {
        let trajectory = Trajectory::new(vec![waypoint(1.0), waypoint(1.0)]);
        assert!(matches!(
            trajectory.validate(6),
            Err(ManipError::Validation(_))
        ));

        let trajectory = Trajectory::new(vec![waypoint(2.0), waypoint(1.0)]);
        assert!(trajectory.validate(6).is_err());
    }

    #[test]
    fn zero_start_time_rejected() {
        let trajectory = Trajectory::new(vec![waypoint(0.0), waypoint(1.0)]);
        assert!(trajectory.validate(6).is_err());
    }

    #[test]
    fn joint_count_mismatch_rejected() {
        let trajectory = Trajectory::new(vec![Waypoint::new(vec![0.0; 5], 1.0)]);
        assert!(trajectory.validate(6).is_err());
    }

    #[test]
    fn velocity_count_mismatch_rejected() {
        let mut point = waypoint(1.0);
        point.velocities = Some(vec![0.0; 3]);
        let trajectory = Trajectory::new(vec![point]);
        assert!(trajectory.validate(6).is_err());
    }

    #[test]
    fn combined_request_parses_from_json() {
        let request: CombinedRequest = serde_json::from_str(
            r#"{
                "trajectory": {"points": [{"positions": [0.0, 0.0, 0.0, 0.0, 0.0, 0.0], "time_from_start": 1.0}]},
                "gripper": {"mode": "close"}
            }"#,
        )
        .unwrap();

        assert_eq!(request.trajectory.points.len(), 1);
        assert_eq!(request.gripper, GripperCommand::Close);
        assert!(request.trajectory.validate(6).is_ok());
    }

    #[test]
    fn gripper_command_json_round_trip() {
        let command: GripperCommand =
            serde_json::from_str(r#"{"mode":"move_to","position":0.02,"effort":5.0}"#).unwrap();
        assert_eq!(
            command,
            GripperCommand::MoveTo {
                position: 0.02,
                effort: Some(5.0)
            }
        );

        let command: GripperCommand = serde_json::from_str(r#"{"mode":"close"}"#).unwrap();
        assert_eq!(command, GripperCommand::Close);
    }
}
