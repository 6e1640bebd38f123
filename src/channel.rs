//! Command channel adapter - the transport seam to the device drivers
//!
//! A channel is responsible only for transport: deliver commands, hand out
//! the driver's feedback stream, and surface disconnection as an error
//! instead of silently dropping commands. It never interprets command
//! semantics; that belongs to the dispatcher and the gripper service.

use crate::types::{FeedbackSample, Trajectory, Waypoint};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Commands accepted by an arm motion driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ArmCommand {
    /// Whole trajectory handed over as a single goal
    Goal(Trajectory),
    /// One waypoint released in time order
    Point(Waypoint),
    /// Stop motion immediately, holding the current position
    Stop,
}

/// Commands accepted by a gripper actuator driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ActuatorCommand {
    /// Move the fingers toward a position with a bounded effort
    Move { position: f64, effort: f64 },
    /// Stop actuation immediately
    Stop,
}

/// Transport abstraction to one device driver.
///
/// Feedback delivery order matches the driver's emission order: samples are
/// pushed into a single-consumer queue and the owning state machine awaits
/// the next sample rather than being re-entered from arbitrary call stacks.
#[async_trait]
pub trait CommandChannel<C: Send + 'static>: Send + Sync {
    /// Deliver one command to the driver.
    ///
    /// Returns `ManipError::ConnectionLost` when the transport is down;
    /// commands are never dropped silently.
    async fn send(&self, command: C) -> Result<()>;

    /// Take the feedback stream. Single-consumer: the receiver is handed
    /// out once, further calls return `ManipError::Channel`.
    fn subscribe(&self) -> Result<mpsc::Receiver<FeedbackSample>>;

    fn is_connected(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording channel with scripted feedback, shared by the state
    //! machine tests.

    use super::*;
    use crate::ManipError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    pub(crate) struct MockChannel<C> {
        sent: Mutex<Vec<(C, Instant)>>,
        feedback_tx: mpsc::Sender<FeedbackSample>,
        feedback_rx: Mutex<Option<mpsc::Receiver<FeedbackSample>>>,
        connected: AtomicBool,
        fail_sends: AtomicBool,
    }

    impl<C> MockChannel<C> {
        pub(crate) fn new() -> Self {
            let (feedback_tx, feedback_rx) = mpsc::channel(64);
            Self {
                sent: Mutex::new(Vec::new()),
                feedback_tx,
                feedback_rx: Mutex::new(Some(feedback_rx)),
                connected: AtomicBool::new(true),
                fail_sends: AtomicBool::new(false),
            }
        }

        /// Script one feedback sample from the fake driver
        pub(crate) async fn push(&self, sample: FeedbackSample) {
            self.feedback_tx
                .send(sample)
                .await
                .expect("feedback receiver dropped");
        }

        pub(crate) fn disconnect(&self) {
            self.connected.store(false, Ordering::Relaxed);
            self.fail_sends.store(true, Ordering::Relaxed);
        }

        pub(crate) fn sent(&self) -> Vec<C>
        where
            C: Clone,
        {
            self.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }

        /// Commands together with the instant they were accepted
        pub(crate) fn sent_timed(&self) -> Vec<(C, Instant)>
        where
            C: Clone,
        {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<C: Send + Sync + Clone + 'static> CommandChannel<C> for MockChannel<C> {
        async fn send(&self, command: C) -> Result<()> {
            if self.fail_sends.load(Ordering::Relaxed) {
                return Err(ManipError::ConnectionLost("mock transport down".to_string()));
            }
            self.sent.lock().unwrap().push((command, Instant::now()));
            Ok(())
        }

        fn subscribe(&self) -> Result<mpsc::Receiver<FeedbackSample>> {
            self.feedback_rx
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| ManipError::Channel("feedback stream already taken".to_string()))
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }
    }
}
