//! Trajectory dispatcher - streams joint trajectories to the arm driver
//!
//! Owns the state machine for one in-flight trajectory: full validation
//! before anything is sent, time-ordered waypoint release bounded by the
//! look-ahead horizon, tracking and schedule-slip supervision from driver
//! feedback, and cooperative cancellation that is acknowledged by the
//! driver before the call returns.

use crate::{
    channel::{ArmCommand, CommandChannel},
    config::{ArmConfig, StreamingMode},
    progress::{ProgressPublisher, WaypointProgress},
    types::{AbortReason, ExecutionState, FeedbackSample, MotionResult, Trajectory},
    ManipError, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};
use tracing::{error, info, warn};

pub struct TrajectoryDispatcher {
    config: ArmConfig,
    channel: Arc<dyn CommandChannel<ArmCommand>>,
    /// Feedback stream doubles as the execution guard: holding it means
    /// holding the arm's exclusive ownership token.
    feedback: tokio::sync::Mutex<mpsc::Receiver<FeedbackSample>>,
    state: Mutex<ExecutionState>,
    cancel_requested: AtomicBool,
    progress: Arc<dyn ProgressPublisher>,
}

impl TrajectoryDispatcher {
    pub fn new(
        config: ArmConfig,
        channel: Arc<dyn CommandChannel<ArmCommand>>,
        progress: Arc<dyn ProgressPublisher>,
    ) -> Result<Self> {
        let feedback = channel.subscribe()?;
        Ok(Self {
            config,
            channel,
            feedback: tokio::sync::Mutex::new(feedback),
            state: Mutex::new(ExecutionState::Idle),
            cancel_requested: AtomicBool::new(false),
            progress,
        })
    }

    /// Current execution state, observable by callers
    pub fn state(&self) -> ExecutionState {
        self.state.lock().unwrap().clone()
    }

    /// Request early termination of the in-flight trajectory.
    ///
    /// Cooperative: the streaming loop observes the request at the next
    /// feedback sample or look-ahead tick, sends a stop command and waits
    /// for the driver's motion-stopped acknowledgment. Meaningless outside
    /// the Streaming state.
    pub fn cancel(&self) {
        if matches!(*self.state.lock().unwrap(), ExecutionState::Streaming) {
            info!("Trajectory cancellation requested");
            self.cancel_requested.store(true, Ordering::Relaxed);
        }
    }

    /// Stream a full trajectory and suspend until a terminal state.
    ///
    /// Malformed trajectories are rejected atomically before any command
    /// reaches the channel. A second call while one is streaming returns
    /// `ManipError::AlreadyStreaming`; callers must cancel first.
    pub async fn execute(&self, trajectory: Trajectory) -> Result<MotionResult> {
        trajectory.validate(self.config.joint_count)?;

        let mut feedback = self
            .feedback
            .try_lock()
            .map_err(|_| ManipError::AlreadyStreaming)?;

        self.cancel_requested.store(false, Ordering::Relaxed);
        *self.state.lock().unwrap() = ExecutionState::Streaming;

        // Drop samples left over from a previous execution so the ordering
        // invariant holds: feedback consumed here belongs to this command.
        while feedback.try_recv().is_ok() {}

        info!(
            "Executing trajectory: {} waypoints over {:.2}s ({:?})",
            trajectory.points.len(),
            trajectory.duration(),
            self.config.streaming_mode()
        );
        let _ = self.progress.motion_started(trajectory.points.len()).await;

        let result = match self.config.streaming_mode() {
            StreamingMode::WholeGoal => self.run_goal(&mut feedback, &trajectory).await,
            StreamingMode::PointByPoint => self.run_stream(&mut feedback, &trajectory).await,
        };

        *self.state.lock().unwrap() = match &result {
            MotionResult::Succeeded => ExecutionState::Succeeded,
            MotionResult::Aborted(reason) => ExecutionState::Aborted(reason.clone()),
            MotionResult::Preempted => ExecutionState::Preempted,
        };

        match &result {
            MotionResult::Succeeded => info!("Trajectory succeeded"),
            MotionResult::Aborted(reason) => warn!("Trajectory aborted: {}", reason),
            MotionResult::Preempted => info!("Trajectory preempted"),
        }
        let _ = self.progress.motion_finished(&result).await;

        *self.state.lock().unwrap() = ExecutionState::Idle;
        Ok(result)
    }

    /// Whole-trajectory-goal controllers: hand over once, then monitor.
    async fn run_goal(
        &self,
        feedback: &mut mpsc::Receiver<FeedbackSample>,
        trajectory: &Trajectory,
    ) -> MotionResult {
        let started = Instant::now();
        if let Err(e) = self.channel.send(ArmCommand::Goal(trajectory.clone())).await {
            error!("Failed to hand over trajectory goal: {}", e);
            return MotionResult::Aborted(AbortReason::ConnectionLost);
        }
        self.await_completion(feedback, trajectory, started).await
    }

    /// Point-by-point controllers: release waypoints in time order, never
    /// running ahead of real time by more than the look-ahead horizon.
    async fn run_stream(
        &self,
        feedback: &mut mpsc::Receiver<FeedbackSample>,
        trajectory: &Trajectory,
    ) -> MotionResult {
        let started = Instant::now();
        let lookahead = Duration::from_secs_f64(self.config.lookahead_horizon());
        let slip = Duration::from_secs_f64(self.config.schedule_slip_tolerance());
        let total = trajectory.points.len();

        for (index, point) in trajectory.points.iter().enumerate() {
            let due = started + Duration::from_secs_f64(point.time_from_start);
            let release_at = due.checked_sub(lookahead).unwrap_or(started);

            // Hold until inside the look-ahead window, consuming feedback
            // while waiting.
            loop {
                if self.cancel_requested.load(Ordering::Relaxed) {
                    return self.preempt(feedback).await;
                }
                if Instant::now() >= release_at {
                    break;
                }
                tokio::select! {
                    sample = feedback.recv() => match sample {
                        Some(sample) => {
                            if let Some(result) =
                                self.supervise(feedback, &sample, trajectory, started).await
                            {
                                return result;
                            }
                        }
                        None => {
                            error!("Feedback stream closed mid-trajectory");
                            return MotionResult::Aborted(AbortReason::ConnectionLost);
                        }
                    },
                    _ = time::sleep_until(release_at) => {}
                }
            }

            // Never send a waypoint whose scheduled time has already passed
            // beyond the slip tolerance: the driver has fallen behind.
            if Instant::now() > due + slip {
                warn!(
                    "Waypoint {} due at {:.2}s is past the slip tolerance",
                    index, point.time_from_start
                );
                self.stop_best_effort(feedback).await;
                return MotionResult::Aborted(AbortReason::Stall);
            }

            if !self.channel.is_connected() {
                return MotionResult::Aborted(AbortReason::ConnectionLost);
            }
            if let Err(e) = self.channel.send(ArmCommand::Point(point.clone())).await {
                error!("Failed to send waypoint {}: {}", index, e);
                return MotionResult::Aborted(AbortReason::ConnectionLost);
            }

            let _ = self
                .progress
                .waypoint_dispatched(&WaypointProgress {
                    index,
                    total,
                    time_from_start: point.time_from_start,
                })
                .await;
        }

        self.await_completion(feedback, trajectory, started).await
    }

    /// Monitor feedback until the arm is stationary at the final waypoint,
    /// the deadline passes, or a fault condition fires.
    async fn await_completion(
        &self,
        feedback: &mut mpsc::Receiver<FeedbackSample>,
        trajectory: &Trajectory,
        started: Instant,
    ) -> MotionResult {
        let Some(final_point) = trajectory.points.last() else {
            return MotionResult::Succeeded;
        };
        let deadline = started
            + Duration::from_secs_f64(final_point.time_from_start)
            + Duration::from_secs_f64(self.config.completion_grace());
        let period = Duration::from_secs_f64(self.config.feedback_period());

        loop {
            if self.cancel_requested.load(Ordering::Relaxed) {
                return self.preempt(feedback).await;
            }
            if Instant::now() > deadline {
                warn!("No completion acknowledgment within grace period");
                self.stop_best_effort(feedback).await;
                return MotionResult::Aborted(AbortReason::Stall);
            }

            match time::timeout(period, feedback.recv()).await {
                Ok(Some(sample)) => {
                    if !sample.in_motion
                        && max_deviation(&sample.positions, &final_point.positions)
                            <= self.config.tracking_tolerance()
                    {
                        return MotionResult::Succeeded;
                    }
                    if let Some(result) =
                        self.supervise(feedback, &sample, trajectory, started).await
                    {
                        return result;
                    }
                }
                Ok(None) => {
                    error!("Feedback stream closed while awaiting completion");
                    return MotionResult::Aborted(AbortReason::ConnectionLost);
                }
                Err(_) => {
                    if !self.channel.is_connected() {
                        return MotionResult::Aborted(AbortReason::ConnectionLost);
                    }
                }
            }
        }
    }

    /// Compare a feedback sample against the commanded reference at the
    /// current point of the schedule. Returns a terminal result when the
    /// deviation exceeds tolerance.
    async fn supervise(
        &self,
        feedback: &mut mpsc::Receiver<FeedbackSample>,
        sample: &FeedbackSample,
        trajectory: &Trajectory,
        started: Instant,
    ) -> Option<MotionResult> {
        let elapsed = started.elapsed().as_secs_f64();
        let reference = commanded_reference(trajectory, elapsed)?;

        let deviation = max_deviation(&sample.positions, &reference);
        if deviation > self.config.tracking_tolerance() {
            warn!(
                "Tracking error: {:.4} rad deviation at t={:.2}s",
                deviation, elapsed
            );
            self.stop_best_effort(feedback).await;
            return Some(MotionResult::Aborted(AbortReason::TrackingError {
                deviation,
            }));
        }
        None
    }

    /// Cancel path: send stop and observe the driver's motion-stopped
    /// acknowledgment before reporting Preempted.
    async fn preempt(&self, feedback: &mut mpsc::Receiver<FeedbackSample>) -> MotionResult {
        info!("Cancel observed, stopping arm driver");
        if self.channel.send(ArmCommand::Stop).await.is_err() {
            return MotionResult::Aborted(AbortReason::ConnectionLost);
        }

        let deadline = Instant::now() + Duration::from_secs_f64(self.config.stop_ack_timeout());
        let period = Duration::from_secs_f64(self.config.feedback_period());
        loop {
            if Instant::now() > deadline {
                warn!("Stop command not acknowledged within timeout");
                return MotionResult::Aborted(AbortReason::Driver {
                    message: "stop not acknowledged".to_string(),
                });
            }
            match time::timeout(period, feedback.recv()).await {
                Ok(Some(sample)) if !sample.in_motion => return MotionResult::Preempted,
                Ok(Some(_)) => {}
                Ok(None) => return MotionResult::Aborted(AbortReason::ConnectionLost),
                Err(_) => {}
            }
        }
    }

    /// Fault path: instruct the driver to stop and drain feedback until
    /// motion ceases or the acknowledgment window closes.
    async fn stop_best_effort(&self, feedback: &mut mpsc::Receiver<FeedbackSample>) {
        if self.channel.send(ArmCommand::Stop).await.is_err() {
            return;
        }
        let deadline = Instant::now() + Duration::from_secs_f64(self.config.stop_ack_timeout());
        let period = Duration::from_secs_f64(self.config.feedback_period());
        loop {
            if Instant::now() > deadline {
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

/// Commanded joint positions at `elapsed` seconds into the schedule:
/// linear interpolation between the surrounding waypoints, the final
/// waypoint once the schedule has run out, and no reference before the
/// first waypoint is due.
fn commanded_reference(trajectory: &Trajectory, elapsed: f64) -> Option<Vec<f64>> {
    let first = trajectory.points.first()?;
    if elapsed < first.time_from_start {
        return None;
    }

    let mut previous = first;
    for point in &trajectory.points {
        if point.time_from_start >= elapsed {
            let span = point.time_from_start - previous.time_from_start;
            if span <= f64::EPSILON {
                return Some(point.positions.clone());
            }
            let alpha = (elapsed - previous.time_from_start) / span;
            return Some(
                previous
                    .positions
                    .iter()
                    .zip(&point.positions)
                    .map(|(a, b)| a + (b - a) * alpha)
                    .collect(),
            );
        }
        previous = point;
    }
    trajectory.points.last().map(|p| p.positions.clone())
}

fn max_deviation(measured: &[f64], commanded: &[f64]) -> f64 {
    measured
        .iter()
        .zip(commanded.iter())
        .map(|(m, c)| (m - c).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mock::MockChannel;
    use crate::progress::NoOpProgress;
    use crate::types::Waypoint;

    fn test_config() -> ArmConfig {
        ArmConfig {
            joint_count: 6,
            streaming_mode: Some(StreamingMode::PointByPoint),
            lookahead_horizon_s: Some(0.5),
            tracking_tolerance_rad: Some(0.1),
            schedule_slip_tolerance_s: Some(0.5),
            completion_grace_s: Some(2.0),
            feedback_period_s: Some(0.05),
            stop_ack_timeout_s: Some(1.0),
        }
    }

    fn dispatcher_with(
        config: ArmConfig,
    ) -> (Arc<TrajectoryDispatcher>, Arc<MockChannel<ArmCommand>>) {
        let channel = Arc::new(MockChannel::new());
        let dispatcher = TrajectoryDispatcher::new(
            config,
            channel.clone() as Arc<dyn CommandChannel<ArmCommand>>,
            Arc::new(NoOpProgress),
        )
        .unwrap();
        (Arc::new(dispatcher), channel)
    }

    fn trajectory(times: &[f64]) -> Trajectory {
        Trajectory::new(
            times
                .iter()
                .map(|&t| Waypoint::new(vec![0.0; 6], t))
                .collect(),
        )
    }

    fn sample_at(positions: Vec<f64>, in_motion: bool) -> FeedbackSample {
        FeedbackSample::new(positions, 0.0, in_motion)
    }

    #[tokio::test(start_paused = true)]
    async fn on_time_trajectory_succeeds_with_exact_sends() {
        let (dispatcher, channel) = dispatcher_with(test_config());
        let trajectory = trajectory(&[1.0, 2.0, 3.0]);

        let handle = {
            let dispatcher = dispatcher.clone();
            let trajectory = trajectory.clone();
            tokio::spawn(async move { dispatcher.execute(trajectory).await })
        };

        // Let all three waypoints go out, then report the arm stationary at
        // the final target.
        time::sleep(Duration::from_secs_f64(3.1)).await;
        channel.push(sample_at(vec![0.0; 6], false)).await;

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, MotionResult::Succeeded);

        let sent = channel.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent
            .iter()
            .all(|command| matches!(command, ArmCommand::Point(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn waypoints_released_in_order_within_lookahead() {
        let (dispatcher, channel) = dispatcher_with(test_config());
        let times = [1.0, 2.0, 3.0];
        let trajectory = trajectory(&times);
        let started = Instant::now();

        let handle = {
            let dispatcher = dispatcher.clone();
            let trajectory = trajectory.clone();
            tokio::spawn(async move { dispatcher.execute(trajectory).await })
        };

        time::sleep(Duration::from_secs_f64(3.1)).await;
        channel.push(sample_at(vec![0.0; 6], false)).await;
        handle.await.unwrap().unwrap();

        let sent = channel.sent_timed();
        assert_eq!(sent.len(), 3);
        for (i, (command, at)) in sent.iter().enumerate() {
            assert!(matches!(command, ArmCommand::Point(_)));
            let earliest = started + Duration::from_secs_f64(times[i] - 0.5);
            assert!(
                *at >= earliest,
                "waypoint {} released ahead of the look-ahead horizon",
                i
            );
            if i > 0 {
                assert!(sent[i - 1].1 <= *at);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_trajectories_rejected_with_zero_commands() {
        let (dispatcher, channel) = dispatcher_with(test_config());

        for bad in [
            trajectory(&[]),
            trajectory(&[2.0, 1.0]),
            Trajectory::new(vec![Waypoint::new(vec![0.0; 4], 1.0)]),
        ] {
            let result = dispatcher.execute(bad).await;
            assert!(matches!(result, Err(ManipError::Validation(_))));
        }
        assert!(channel.sent().is_empty());
        assert_eq!(dispatcher.state(), ExecutionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_streaming_stops_and_preempts() {
        let (dispatcher, channel) = dispatcher_with(test_config());
        let trajectory = trajectory(&[1.0, 2.0, 3.0]);

        let handle = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.execute(trajectory).await })
        };

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dispatcher.state(), ExecutionState::Streaming);
        dispatcher.cancel();
        // First sample wakes the streaming loop so it observes the cancel
        // flag; the second is the driver's motion-stopped acknowledgment.
        channel.push(sample_at(vec![0.0; 6], true)).await;
        channel.push(sample_at(vec![0.0; 6], false)).await;

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, MotionResult::Preempted);
        assert!(channel
            .sent()
            .iter()
            .any(|command| matches!(command, ArmCommand::Stop)));
    }

    #[tokio::test(start_paused = true)]
    async fn tracking_deviation_aborts_with_stop() {
        let mut config = test_config();
        config.lookahead_horizon_s = Some(0.0);
        let (dispatcher, channel) = dispatcher_with(config);
        let trajectory = trajectory(&[0.2]);

        let handle = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.execute(trajectory).await })
        };

        // Past the waypoint's due time the measured state is far off target.
        time::sleep(Duration::from_millis(300)).await;
        channel.push(sample_at(vec![2.0; 6], true)).await;
        channel.push(sample_at(vec![2.0; 6], false)).await;

        let result = handle.await.unwrap().unwrap();
        assert!(matches!(
            result,
            MotionResult::Aborted(AbortReason::TrackingError { .. })
        ));
        assert!(channel
            .sent()
            .iter()
            .any(|command| matches!(command, ArmCommand::Stop)));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_aborts_without_retry() {
        let (dispatcher, channel) = dispatcher_with(test_config());
        channel.disconnect();

        let result = dispatcher.execute(trajectory(&[1.0])).await.unwrap();
        assert_eq!(result, MotionResult::Aborted(AbortReason::ConnectionLost));
        assert!(channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_execute_rejected_while_streaming() {
        let (dispatcher, channel) = dispatcher_with(test_config());

        let handle = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.execute(trajectory(&[1.0, 2.0])).await })
        };
        time::sleep(Duration::from_millis(50)).await;

        let second = dispatcher.execute(trajectory(&[1.0])).await;
        assert!(matches!(second, Err(ManipError::AlreadyStreaming)));

        dispatcher.cancel();
        channel.push(sample_at(vec![0.0; 6], true)).await;
        channel.push(sample_at(vec![0.0; 6], false)).await;
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, MotionResult::Preempted);
    }

    #[tokio::test(start_paused = true)]
    async fn whole_goal_mode_sends_single_goal() {
        let mut config = test_config();
        config.streaming_mode = Some(StreamingMode::WholeGoal);
        let (dispatcher, channel) = dispatcher_with(config);
        let trajectory = trajectory(&[1.0, 2.0]);

        let handle = {
            let dispatcher = dispatcher.clone();
            let trajectory = trajectory.clone();
            tokio::spawn(async move { dispatcher.execute(trajectory).await })
        };

        time::sleep(Duration::from_secs_f64(2.1)).await;
        channel.push(sample_at(vec![0.0; 6], false)).await;

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, MotionResult::Succeeded);

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], ArmCommand::Goal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_grace_exceeded_reports_stall() {
        let mut config = test_config();
        config.completion_grace_s = Some(0.5);
        let (dispatcher, channel) = dispatcher_with(config);

        // No feedback ever arrives: the driver never confirms completion.
        let result = dispatcher.execute(trajectory(&[0.2])).await.unwrap();
        assert_eq!(result, MotionResult::Aborted(AbortReason::Stall));
        assert!(channel
            .sent()
            .iter()
            .any(|command| matches!(command, ArmCommand::Stop)));
    }
}
