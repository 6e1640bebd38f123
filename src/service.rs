//! High-level service wrapper
//!
//! Wires the dispatcher, gripper service and coordinator from a daemon
//! configuration so embedding applications get one handle for the whole
//! manipulator, regardless of which channel implementations sit behind it.

use crate::{
    channel::{ActuatorCommand, ArmCommand, CommandChannel},
    config::DaemonConfig,
    coordinator::Coordinator,
    dispatcher::TrajectoryDispatcher,
    gripper::GripperService,
    progress::{ConsoleProgress, NoOpProgress, ProgressPublisher},
    sim::{SimArmChannel, SimGripperChannel},
    types::{CombinedResult, GripperCommand, GripperOutcome, MotionResult, Trajectory},
    Result,
};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct ManipService {
    dispatcher: Arc<TrajectoryDispatcher>,
    gripper: Arc<GripperService>,
    coordinator: Arc<Coordinator>,
}

impl ManipService {
    /// Build the service on top of caller-supplied channels.
    pub fn new(
        config: &DaemonConfig,
        arm_channel: Arc<dyn CommandChannel<ArmCommand>>,
        gripper_channel: Arc<dyn CommandChannel<ActuatorCommand>>,
        progress: Arc<dyn ProgressPublisher>,
    ) -> Result<Self> {
        let dispatcher = Arc::new(TrajectoryDispatcher::new(
            config.arm.clone(),
            arm_channel,
            progress.clone(),
        )?);
        let gripper = Arc::new(GripperService::new(
            config.gripper.clone(),
            gripper_channel,
            progress,
        )?);
        let coordinator = Arc::new(Coordinator::new(dispatcher.clone(), gripper.clone()));

        info!("Manipulator service initialized");
        Ok(Self {
            dispatcher,
            gripper,
            coordinator,
        })
    }

    /// Build the service against the simulated drivers.
    pub fn with_sim(config: &DaemonConfig) -> Result<Self> {
        let arm_channel = Arc::new(SimArmChannel::spawn(
            config.arm.joint_count,
            Duration::from_secs_f64(config.arm.feedback_period()),
        ));
        let gripper_channel = Arc::new(SimGripperChannel::spawn(
            config.gripper.open_position(),
            None,
            Duration::from_secs_f64(config.gripper.feedback_period()),
        ));
        let progress = Self::progress_from_config(config);
        Self::new(config, arm_channel, gripper_channel, progress)
    }

    /// Observer implied by the publishing section of the config
    pub fn progress_from_config(config: &DaemonConfig) -> Arc<dyn ProgressPublisher> {
        let publishing = config.publishing();
        if publishing.progress_events() {
            if publishing.pretty() {
                Arc::new(ConsoleProgress::pretty())
            } else {
                Arc::new(ConsoleProgress::new())
            }
        } else {
            Arc::new(NoOpProgress)
        }
    }

    pub fn dispatcher(&self) -> &Arc<TrajectoryDispatcher> {
        &self.dispatcher
    }

    pub fn gripper(&self) -> &Arc<GripperService> {
        &self.gripper
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub async fn execute(&self, trajectory: Trajectory) -> Result<MotionResult> {
        self.dispatcher.execute(trajectory).await
    }

    pub async fn actuate(&self, command: GripperCommand) -> Result<GripperOutcome> {
        self.gripper.actuate(command).await
    }

    pub async fn move_then_grasp(
        &self,
        trajectory: Trajectory,
        command: GripperCommand,
    ) -> Result<CombinedResult> {
        self.coordinator.move_then_grasp(trajectory, command).await
    }
}
