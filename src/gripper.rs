//! Gripper actuation service
//!
//! Owns the state machine for one grasp/release action: validate, issue the
//! actuation command once, consume actuator feedback, and classify the
//! terminal outcome. A stall short of the target is the expected result of
//! gripping an object smaller than full closure and is reported as a valid
//! outcome, never an error. Every return path leaves the actuator in a
//! known non-moving state.

use crate::{
    channel::{ActuatorCommand, CommandChannel},
    config::GripperConfig,
    progress::ProgressPublisher,
    types::{FeedbackSample, GripperCommand, GripperOutcome},
    ManipError, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};
use tracing::{error, info, warn};

pub struct GripperService {
    config: GripperConfig,
    channel: Arc<dyn CommandChannel<ActuatorCommand>>,
    /// Holding the feedback stream is the gripper's exclusive ownership
    /// token; `try_lock` failure means an actuation is outstanding.
    feedback: tokio::sync::Mutex<mpsc::Receiver<FeedbackSample>>,
    busy: AtomicBool,
    cancel_requested: AtomicBool,
    progress: Arc<dyn ProgressPublisher>,
}

impl GripperService {
    pub fn new(
        config: GripperConfig,
        channel: Arc<dyn CommandChannel<ActuatorCommand>>,
        progress: Arc<dyn ProgressPublisher>,
    ) -> Result<Self> {
        let feedback = channel.subscribe()?;
        Ok(Self {
            config,
            channel,
            feedback: tokio::sync::Mutex::new(feedback),
            busy: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            progress,
        })
    }

    pub fn is_actuating(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }

    /// Request early termination of the outstanding actuation.
    ///
    /// Cooperative: observed by the actuation-wait loop within one feedback
    /// period. The actuator is stopped and the call returns Aborted.
    pub fn cancel(&self) {
        if self.busy.load(Ordering::Relaxed) {
            info!("Gripper actuation cancellation requested");
            self.cancel_requested.store(true, Ordering::Relaxed);
        }
    }

    /// Issue one actuation and suspend until a terminal outcome.
    ///
    /// Concurrency policy is reject: a second call while one is outstanding
    /// returns `ManipError::AlreadyActuating`. Callers wanting
    /// preempt-and-restart cancel explicitly first.
    pub async fn actuate(&self, command: GripperCommand) -> Result<GripperOutcome> {
        let (target, effort) = self.resolve(&command)?;

        let mut feedback = self
            .feedback
            .try_lock()
            .map_err(|_| ManipError::AlreadyActuating)?;
        self.busy.store(true, Ordering::Relaxed);
        self.cancel_requested.store(false, Ordering::Relaxed);

        // Samples from a previous actuation belong to that command, not
        // this one.
        while feedback.try_recv().is_ok() {}

        info!(
            "Actuating gripper: target {:.4}, effort limit {:.1}",
            target, effort
        );

        let outcome = match self
            .channel
            .send(ActuatorCommand::Move {
                position: target,
                effort,
            })
            .await
        {
            Ok(()) => {
                let _ = self.progress.grasp_started(target, effort).await;
                self.await_outcome(&mut feedback, target).await
            }
            Err(e) => {
                error!("Failed to send actuation command: {}", e);
                GripperOutcome::Aborted {
                    reason: "connection lost".to_string(),
                }
            }
        };

        match &outcome {
            GripperOutcome::Reached { position } => {
                info!("Gripper reached target (position {:.4})", position)
            }
            GripperOutcome::Stalled { position } => {
                info!("Gripper stalled at {:.4} (object detected)", position)
            }
            GripperOutcome::TimedOut => warn!("Gripper actuation timed out"),
            GripperOutcome::Aborted { reason } => warn!("Gripper actuation aborted: {}", reason),
        }
        let _ = self.progress.grasp_finished(&outcome).await;

        self.busy.store(false, Ordering::Relaxed);
        Ok(outcome)
    }

    /// Map a request onto a physical target and validate it against the
    /// device range and effort rating. No side effect on failure.
    fn resolve(&self, command: &GripperCommand) -> Result<(f64, f64)> {
        match command {
            GripperCommand::Open => Ok((self.config.open_position(), self.config.default_effort())),
            GripperCommand::Close => {
                Ok((self.config.closed_position(), self.config.default_effort()))
            }
            GripperCommand::MoveTo { position, effort } => {
                let (min, max) = (self.config.range_min(), self.config.range_max());
                if *position < min || *position > max {
                    return Err(ManipError::Validation(format!(
                        "target {:.4} outside physical range [{:.4}, {:.4}]",
                        position, min, max
                    )));
                }
                let effort = effort.unwrap_or_else(|| self.config.default_effort());
                if effort <= 0.0 || effort > self.config.max_effort() {
                    return Err(ManipError::Validation(format!(
                        "effort {:.1} outside device rating (0, {:.1}]",
                        effort,
                        self.config.max_effort()
                    )));
                }
                Ok((*position, effort))
            }
        }
    }

    /// Poll feedback until a terminal condition, the timeout, or a cancel.
    async fn await_outcome(
        &self,
        feedback: &mut mpsc::Receiver<FeedbackSample>,
        target: f64,
    ) -> GripperOutcome {
        let deadline = Instant::now() + Duration::from_secs_f64(self.config.actuation_timeout());
        let period = Duration::from_secs_f64(self.config.feedback_period());
        let tolerance = self.config.position_tolerance();
        let mut motion_observed = false;
        let mut start_position: Option<f64> = None;

        loop {
            if self.cancel_requested.load(Ordering::Relaxed) {
                self.stop_and_confirm(feedback).await;
                return GripperOutcome::Aborted {
                    reason: "preempted by caller".to_string(),
                };
            }
            if Instant::now() > deadline {
                // Timeout resolves to a terminal state; the actuator is
                // stopped before the caller hears about it.
                self.stop_and_confirm(feedback).await;
                return GripperOutcome::TimedOut;
            }

            match time::timeout(period, feedback.recv()).await {
                Ok(Some(sample)) => {
                    let _ = self.progress.grasp_feedback(&sample).await;
                    let position = sample.positions.first().copied().unwrap_or(target);
                    let origin = *start_position.get_or_insert(position);

                    if sample.in_motion {
                        motion_observed = true;
                        continue;
                    }
                    if (position - target).abs() <= tolerance {
                        return GripperOutcome::Reached { position };
                    }
                    if sample.stalled
                        || motion_observed
                        || (position - origin).abs() > tolerance
                    {
                        // Stationary short of the target after moving away
                        // from the first observed position, or the driver
                        // raised its stall flag: contact. Motion counts even
                        // when the driver never reported an in-motion sample.
                        return GripperOutcome::Stalled { position };
                    }
                    // Still stationary at the start position; motion has
                    // not begun yet.
                }
                Ok(None) => {
                    error!("Gripper feedback stream closed mid-actuation");
                    let _ = self.channel.send(ActuatorCommand::Stop).await;
                    return GripperOutcome::Aborted {
                        reason: "connection lost".to_string(),
                    };
                }
                Err(_) => {
                    if !self.channel.is_connected() {
                        let _ = self.channel.send(ActuatorCommand::Stop).await;
                        return GripperOutcome::Aborted {
                            reason: "connection lost".to_string(),
                        };
                    }
                }
            }
        }
    }

    /// Send one stop command and drain feedback until the actuator reports
    /// motionless or the acknowledgment window closes.
    async fn stop_and_confirm(&self, feedback: &mut mpsc::Receiver<FeedbackSample>) {
        if self.channel.send(ActuatorCommand::Stop).await.is_err() {
            return;
        }
        let deadline = Instant::now() + Duration::from_secs_f64(self.config.stop_ack_timeout());
        let period = Duration::from_secs_f64(self.config.feedback_period());
        loop {
            if Instant::now() > deadline {
                warn!("Gripper stop not acknowledged within timeout");
                return;
            }
            match time::timeout(period, feedback.recv()).await {
                Ok(Some(sample)) if !sample.in_motion => return,
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(_) => {}
            }
        }
    }
}
