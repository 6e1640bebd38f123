//! JSON event output for the daemons
//!
//! Structured JSON lines on stdout for request status, progress, and
//! errors, consumable by external tools. Logs go to stderr; stdout carries
//! only these events.

use crate::types::{CombinedResult, GripperOutcome, MotionResult};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current timestamp as f64 seconds since UNIX epoch, microsecond precision
pub fn current_timestamp() -> f64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    (timestamp * 1_000_000.0).round() / 1_000_000.0
}

/// Status event for one accepted request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Sequence number of the request within this daemon run
    pub request_id: u64,
    pub message: String,
}

/// Terminal result of a motion request
#[derive(Debug, Clone, Serialize)]
pub struct MotionEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub request_id: u64,
    #[serde(flatten)]
    pub result: MotionResult,
}

/// Terminal outcome of a gripper request
#[derive(Debug, Clone, Serialize)]
pub struct GripperEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub request_id: u64,
    #[serde(flatten)]
    pub outcome: GripperOutcome,
}

/// Terminal result of a combined move-then-grasp request
#[derive(Debug, Clone, Serialize)]
pub struct CombinedEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub request_id: u64,
    #[serde(flatten)]
    pub result: CombinedResult,
}

/// Error or rejection event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub error: String,
}

impl RequestEvent {
    pub fn accepted(request_id: u64, message: &str) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "request_accepted".to_string(),
            request_id,
            message: message.to_string(),
        }
    }
}

impl MotionEvent {
    pub fn finished(request_id: u64, result: MotionResult) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "motion_result".to_string(),
            request_id,
            result,
        }
    }
}

impl GripperEvent {
    pub fn finished(request_id: u64, outcome: GripperOutcome) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "gripper_result".to_string(),
            request_id,
            outcome,
        }
    }
}

impl CombinedEvent {
    pub fn finished(request_id: u64, result: CombinedResult) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "combined_result".to_string(),
            request_id,
            result,
        }
    }
}

impl ErrorEvent {
    pub fn new(error: &str, request_id: Option<u64>) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "error".to_string(),
            request_id,
            error: error.to_string(),
        }
    }

    pub fn rejected(request_id: u64, error: &str) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "request_rejected".to_string(),
            request_id: Some(request_id),
            error: error.to_string(),
        }
    }
}

/// Output a JSON event to stdout
pub fn output_event<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{}", json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AbortReason;

    #[test]
    fn motion_event_serializes_flat() {
        let event = MotionEvent::finished(
            3,
            MotionResult::Aborted(AbortReason::TrackingError { deviation: 0.2 }),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"request_id\":3"));
        assert!(json.contains("\"result\":\"aborted\""));
        assert!(json.contains("tracking_error"));
    }

    #[test]
    fn combined_event_serializes_flat() {
        let event = CombinedEvent::finished(
            7,
            CombinedResult::Completed {
                grasp: GripperOutcome::Stalled { position: 0.03 },
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"combined_result\""));
        assert!(json.contains("\"combined\":\"completed\""));
        assert!(json.contains("\"outcome\":\"stalled\""));
    }

    #[test]
    fn timestamp_has_bounded_precision() {
        let t = current_timestamp();
        assert!(t > 1_600_000_000.0);
        let rounded = (t * 1_000_000.0).round() / 1_000_000.0;
        assert_eq!(t, rounded);
    }
}
