//! Move-then-grasp coordination
//!
//! Thin composition layer over the dispatcher and the gripper service.
//! Sequencing contract: the gripper command is only issued after the
//! trajectory reports Succeeded; any non-success motion outcome
//! short-circuits the combined operation. Cancellation is forwarded to
//! whichever phase is active.

use crate::{
    dispatcher::TrajectoryDispatcher,
    gripper::GripperService,
    types::{CombinedResult, GripperCommand, Trajectory},
    Result,
};
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Motion,
    Grasp,
}

pub struct Coordinator {
    dispatcher: Arc<TrajectoryDispatcher>,
    gripper: Arc<GripperService>,
    phase: Mutex<Phase>,
}

impl Coordinator {
    pub fn new(dispatcher: Arc<TrajectoryDispatcher>, gripper: Arc<GripperService>) -> Self {
        Self {
            dispatcher,
            gripper,
            phase: Mutex::new(Phase::Idle),
        }
    }

    /// Execute the trajectory, then actuate the gripper on motion success.
    ///
    /// The arm and gripper channels stay in their own mutual-exclusion
    /// domains; this only serializes the two flows.
    pub async fn move_then_grasp(
        &self,
        trajectory: Trajectory,
        command: GripperCommand,
    ) -> Result<CombinedResult> {
        *self.phase.lock().unwrap() = Phase::Motion;
        let motion = match self.dispatcher.execute(trajectory).await {
            Ok(motion) => motion,
            Err(e) => {
                *self.phase.lock().unwrap() = Phase::Idle;
                return Err(e);
            }
        };

        if !motion.is_success() {
            info!("Motion phase did not succeed, skipping grasp");
            *self.phase.lock().unwrap() = Phase::Idle;
            return Ok(CombinedResult::MotionFailed { motion });
        }

        *self.phase.lock().unwrap() = Phase::Grasp;
        let grasp = match self.gripper.actuate(command).await {
            Ok(grasp) => grasp,
            Err(e) => {
                *self.phase.lock().unwrap() = Phase::Idle;
                return Err(e);
            }
        };

        *self.phase.lock().unwrap() = Phase::Idle;
        Ok(CombinedResult::Completed { grasp })
    }

    /// Cancel the combined operation: the trajectory while in the motion
    /// phase, the gripper preempt path while in the grasp phase.
    pub fn cancel(&self) {
        match *self.phase.lock().unwrap() {
            Phase::Motion => self.dispatcher.cancel(),
            Phase::Grasp => self.gripper.cancel(),
            Phase::Idle => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mock::MockChannel;
    use crate::channel::{ActuatorCommand, ArmCommand, CommandChannel};
    use crate::config::{ArmConfig, GripperConfig};
    use crate::progress::NoOpProgress;
    use crate::types::{CombinedResult, FeedbackSample, GripperOutcome, Waypoint};
    use tokio::time::{self, Duration};

    struct Fixture {
        coordinator: Arc<Coordinator>,
        arm: Arc<MockChannel<ArmCommand>>,
        gripper: Arc<MockChannel<ActuatorCommand>>,
    }

    fn fixture() -> Fixture {
        let arm = Arc::new(MockChannel::new());
        let gripper = Arc::new(MockChannel::new());

        let arm_config = ArmConfig {
            joint_count: 6,
            feedback_period_s: Some(0.05),
            completion_grace_s: Some(1.0),
            ..ArmConfig::default()
        };
        let gripper_config = GripperConfig {
            actuation_timeout_s: Some(2.0),
            feedback_period_s: Some(0.05),
            ..GripperConfig::default()
        };

        let dispatcher = Arc::new(
            TrajectoryDispatcher::new(
                arm_config,
                arm.clone() as Arc<dyn CommandChannel<ArmCommand>>,
                Arc::new(NoOpProgress),
            )
            .unwrap(),
        );
        let service = Arc::new(
            GripperService::new(
                gripper_config,
                gripper.clone() as Arc<dyn CommandChannel<ActuatorCommand>>,
                Arc::new(NoOpProgress),
            )
            .unwrap(),
        );

        Fixture {
            coordinator: Arc::new(Coordinator::new(dispatcher, service)),
            arm,
            gripper,
        }
    }

    fn trajectory() -> Trajectory {
        Trajectory::new(vec![
            Waypoint::new(vec![0.0; 6], 0.5),
            Waypoint::new(vec![0.0; 6], 1.0),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn grasp_runs_only_after_motion_succeeds() {
        let f = fixture();

        let handle = {
            let coordinator = f.coordinator.clone();
            tokio::spawn(
                async move { coordinator.move_then_grasp(trajectory(), GripperCommand::Close).await },
            )
        };

        // Motion phase: both waypoints released, arm reports stationary at
        // the final target.
        time::sleep(Duration::from_secs_f64(1.1)).await;
        f.arm.push(FeedbackSample::new(vec![0.0; 6], 0.0, false)).await;

        // Grasp phase: fingers stop on an object.
        time::sleep(Duration::from_millis(100)).await;
        f.gripper.push(FeedbackSample::new(vec![0.05], 0.0, true)).await;
        f.gripper.push(FeedbackSample::new(vec![0.03], 0.0, false)).await;

        let result = handle.await.unwrap().unwrap();
        assert_eq!(
            result,
            CombinedResult::Completed {
                grasp: GripperOutcome::Stalled { position: 0.03 }
            }
        );
        assert_eq!(f.arm.sent().len(), 2);
        assert_eq!(f.gripper.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_motion_never_issues_gripper_command() {
        let f = fixture();
        f.arm.disconnect();

        let result = f
            .coordinator
            .move_then_grasp(trajectory(), GripperCommand::Close)
            .await
            .unwrap();

        assert!(matches!(result, CombinedResult::MotionFailed { .. }));
        assert!(f.gripper.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_in_motion_phase_preempts_trajectory() {
        let f = fixture();

        let handle = {
            let coordinator = f.coordinator.clone();
            tokio::spawn(
                async move { coordinator.move_then_grasp(trajectory(), GripperCommand::Close).await },
            )
        };

        time::sleep(Duration::from_millis(50)).await;
        f.coordinator.cancel();
        f.arm.push(FeedbackSample::new(vec![0.0; 6], 0.0, true)).await;
        f.arm.push(FeedbackSample::new(vec![0.0; 6], 0.0, false)).await;

        let result = handle.await.unwrap().unwrap();
        assert_eq!(
            result,
            CombinedResult::MotionFailed {
                motion: crate::types::MotionResult::Preempted
            }
        );
        assert!(f.gripper.sent().is_empty());
    }
}
