//! Simulated arm and gripper drivers
//!
//! Loopback channels backed by a spawned driver task with first-order
//! position dynamics. These stand in for the external motion-controller
//! and actuator drivers so the daemons can run end to end without
//! hardware, and they back the integration-style tests.

use crate::{
    channel::{ActuatorCommand, ArmCommand, CommandChannel},
    events::current_timestamp,
    types::{FeedbackSample, Waypoint},
    ManipError, Result,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};
use tracing::info;

const POSITION_EPSILON: f64 = 1e-4;

/// Simulated arm motion driver.
///
/// Tracks the most recent waypoint (or steps through a whole-trajectory
/// goal on schedule) at a bounded joint speed and publishes feedback
/// samples every period.
pub struct SimArmChannel {
    command_tx: mpsc::Sender<ArmCommand>,
    feedback_rx: Mutex<Option<mpsc::Receiver<FeedbackSample>>>,
}

impl SimArmChannel {
    pub fn spawn(joint_count: usize, feedback_period: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (feedback_tx, feedback_rx) = mpsc::channel(64);

        tokio::spawn(run_arm_sim(
            joint_count,
            feedback_period,
            command_rx,
            feedback_tx,
        ));
        info!("Simulated arm driver started ({} joints)", joint_count);

        Self {
            command_tx,
            feedback_rx: Mutex::new(Some(feedback_rx)),
        }
    }
}

#[async_trait]
impl CommandChannel<ArmCommand> for SimArmChannel {
    async fn send(&self, command: ArmCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ManipError::ConnectionLost("simulated arm driver stopped".to_string()))
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<FeedbackSample>> {
        self.feedback_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ManipError::Channel("feedback stream already taken".to_string()))
    }

    fn is_connected(&self) -> bool {
        !self.command_tx.is_closed()
    }
}

async fn run_arm_sim(
    joint_count: usize,
    feedback_period: Duration,
    mut command_rx: mpsc::Receiver<ArmCommand>,
    feedback_tx: mpsc::Sender<FeedbackSample>,
) {
    let max_speed = 4.0; // rad/s per joint
    let dt = feedback_period.as_secs_f64();
    let mut positions = vec![0.0; joint_count];
    let mut target: Option<Vec<f64>> = None;
    let mut goal_queue: VecDeque<Waypoint> = VecDeque::new();
    let mut goal_started: Option<Instant> = None;
    let mut ticker = time::interval(feedback_period);

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(ArmCommand::Point(point)) => {
                    target = Some(point.positions);
                }
                Some(ArmCommand::Goal(trajectory)) => {
                    goal_queue = trajectory.points.into();
                    goal_started = Some(Instant::now());
                }
                Some(ArmCommand::Stop) => {
                    target = None;
                    goal_queue.clear();
                    goal_started = None;
                }
                None => return,
            },
            _ = ticker.tick() => {
                // Promote goal waypoints as their scheduled times come due.
                if let Some(started) = goal_started {
                    let elapsed = started.elapsed().as_secs_f64();
                    while goal_queue
                        .front()
                        .map(|p| p.time_from_start <= elapsed)
                        .unwrap_or(false)
                    {
                        if let Some(point) = goal_queue.pop_front() {
                            target = Some(point.positions);
                        }
                    }
                }

                let mut in_motion = false;
                if let Some(target) = &target {
                    for (position, goal) in positions.iter_mut().zip(target.iter()) {
                        let delta = goal - *position;
                        let step = delta.clamp(-max_speed * dt, max_speed * dt);
                        *position += step;
                        if (goal - *position).abs() > POSITION_EPSILON {
                            in_motion = true;
                        }
                    }
                }

                let sample = FeedbackSample::new(positions.clone(), current_timestamp(), in_motion);
                if feedback_tx.send(sample).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Simulated gripper actuator driver.
///
/// Moves one finger position toward the commanded target at a bounded
/// speed. When an object is placed in the closing path the fingers stop
/// on it and the stall flag is raised, mirroring a force-limited grasp.
pub struct SimGripperChannel {
    command_tx: mpsc::Sender<ActuatorCommand>,
    feedback_rx: Mutex<Option<mpsc::Receiver<FeedbackSample>>>,
}

impl SimGripperChannel {
    pub fn spawn(start_position: f64, object_at: Option<f64>, feedback_period: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (feedback_tx, feedback_rx) = mpsc::channel(64);

        tokio::spawn(run_gripper_sim(
            start_position,
            object_at,
            feedback_period,
            command_rx,
            feedback_tx,
        ));
        match object_at {
            Some(width) => info!("Simulated gripper driver started (object width {:.4})", width),
            None => info!("Simulated gripper driver started (no object)"),
        }

        Self {
            command_tx,
            feedback_rx: Mutex::new(Some(feedback_rx)),
        }
    }
}

#[async_trait]
impl CommandChannel<ActuatorCommand> for SimGripperChannel {
    async fn send(&self, command: ActuatorCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ManipError::ConnectionLost("simulated gripper driver stopped".to_string()))
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<FeedbackSample>> {
        self.feedback_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ManipError::Channel("feedback stream already taken".to_string()))
    }

    fn is_connected(&self) -> bool {
        !self.command_tx.is_closed()
    }
}

async fn run_gripper_sim(
    start_position: f64,
    object_at: Option<f64>,
    feedback_period: Duration,
    mut command_rx: mpsc::Receiver<ActuatorCommand>,
    feedback_tx: mpsc::Sender<FeedbackSample>,
) {
    let speed = 0.1; // position units per second
    let dt = feedback_period.as_secs_f64();
    let mut position = start_position;
    let mut target: Option<f64> = None;
    let mut ticker = time::interval(feedback_period);

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(ActuatorCommand::Move { position: goal, .. }) => target = Some(goal),
                Some(ActuatorCommand::Stop) => target = None,
                None => return,
            },
            _ = ticker.tick() => {
                let mut in_motion = false;
                let mut stalled = false;

                if let Some(goal) = target {
                    let delta = goal - position;
                    let step = delta.clamp(-speed * dt, speed * dt);
                    position += step;

                    // Closing onto an object: the fingers stop on contact.
                    if let Some(obstacle) = object_at {
                        if goal < obstacle && position < obstacle {
                            position = obstacle;
                            stalled = true;
                        }
                    }

                    in_motion = !stalled && (goal - position).abs() > POSITION_EPSILON;
                }

                let sample = FeedbackSample {
                    positions: vec![position],
                    timestamp: current_timestamp(),
                    in_motion,
                    stalled,
                };
                if feedback_tx.send(sample).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArmConfig, GripperConfig};
    use crate::dispatcher::TrajectoryDispatcher;
    use crate::gripper::GripperService;
    use crate::progress::NoOpProgress;
    use crate::types::{GripperCommand, GripperOutcome, MotionResult, Trajectory, Waypoint};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn dispatcher_completes_trajectory_against_sim_arm() {
        let channel = Arc::new(SimArmChannel::spawn(6, Duration::from_millis(50)));
        let config = ArmConfig {
            joint_count: 6,
            feedback_period_s: Some(0.05),
            // The sim tracks at full joint speed rather than riding the
            // interpolated schedule, so give it headroom.
            tracking_tolerance_rad: Some(0.5),
            ..ArmConfig::default()
        };
        let dispatcher =
            TrajectoryDispatcher::new(config, channel, Arc::new(NoOpProgress)).unwrap();

        let trajectory = Trajectory::new(vec![
            Waypoint::new(vec![0.2; 6], 0.5),
            Waypoint::new(vec![0.4; 6], 1.0),
        ]);

        let result = dispatcher.execute(trajectory).await.unwrap();
        assert_eq!(result, MotionResult::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn grasp_against_sim_object_stalls() {
        let channel = Arc::new(SimGripperChannel::spawn(
            0.085,
            Some(0.03),
            Duration::from_millis(50),
        ));
        let config = GripperConfig {
            feedback_period_s: Some(0.05),
            ..GripperConfig::default()
        };
        let service = GripperService::new(config, channel, Arc::new(NoOpProgress)).unwrap();

        let outcome = service.actuate(GripperCommand::Close).await.unwrap();
        assert_eq!(outcome, GripperOutcome::Stalled { position: 0.03 });
    }

    #[tokio::test(start_paused = true)]
    async fn grasp_without_object_reaches_close() {
        let channel = Arc::new(SimGripperChannel::spawn(
            0.085,
            None,
            Duration::from_millis(50),
        ));
        let config = GripperConfig {
            feedback_period_s: Some(0.05),
            ..GripperConfig::default()
        };
        let service = GripperService::new(config, channel, Arc::new(NoOpProgress)).unwrap();

        let outcome = service.actuate(GripperCommand::Close).await.unwrap();
        assert!(matches!(outcome, GripperOutcome::Reached { .. }));
    }
}
