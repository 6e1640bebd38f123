//! manipd - Manipulator motion and grasp coordination library
//!
//! Coordinates a robotic manipulator arm and an attached gripper: a
//! trajectory dispatcher streams joint-space trajectories to the arm's
//! motion controller, a gripper service exposes open/close/grip actuation
//! as a suspend-until-terminal request, and a coordinator sequences
//! combined move-then-grasp operations. Transport to the drivers sits
//! behind the `CommandChannel` trait so the library stays IPC-agnostic.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use manipd::{DaemonConfig, ManipService, Trajectory, Waypoint, GripperCommand};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DaemonConfig::load_from_path("config/default_config.yaml")?;
//!     let service = ManipService::with_sim(&config)?;
//!
//!     let trajectory = Trajectory::new(vec![
//!         Waypoint::new(vec![0.0, -1.2, 1.0, 0.0, 1.57, 0.0], 1.0),
//!         Waypoint::new(vec![0.3, -1.0, 1.1, 0.0, 1.57, 0.0], 2.0),
//!     ]);
//!     let result = service.move_then_grasp(trajectory, GripperCommand::Close).await?;
//!     println!("Combined result: {:?}", result);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **ManipService**: high-level wrapper wiring everything from config
//! - **TrajectoryDispatcher**: the streaming state machine for arm motion
//! - **GripperService**: the grasp/release actuation state machine
//! - **Coordinator**: move-then-grasp sequencing
//! - **CommandChannel**: transport seam to the drivers
//! - **ProgressPublisher**: transport-agnostic progress observer

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod gripper;
pub mod progress;
pub mod service;
pub mod sim;
pub mod types;

// High-level exports for easy usage
pub use config::{ArmConfig, DaemonConfig, GripperConfig, PublishingConfig, StreamingMode};
pub use coordinator::Coordinator;
pub use dispatcher::TrajectoryDispatcher;
pub use error::{ManipError, Result};
pub use gripper::GripperService;
pub use service::ManipService;
pub use types::{
    AbortReason, CombinedRequest, CombinedResult, ExecutionState, FeedbackSample, GripperCommand,
    GripperOutcome, MotionResult, Trajectory, Waypoint,
};

// Core component exports for advanced usage
pub use channel::{ActuatorCommand, ArmCommand, CommandChannel};
pub use progress::{ConsoleProgress, NoOpProgress, ProgressPublisher, WaypointProgress};
pub use sim::{SimArmChannel, SimGripperChannel};
