//! Line-delimited JSON wire protocol between the pool and its workers
//!
//! One JSON object per line, UTF-8, over stdin/stdout. Unknown message
//! types are tolerated on both sides: the worker drops them, the pool skips
//! them until it sees what it was waiting for.

use serde::{Deserialize, Serialize};

use crate::PoolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

/// Result metadata reported by the worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Wall-clock seconds the worker spent on the task.
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub tokens_consumed: u64,
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Emitted once by the worker when it is ready to accept tasks.
    Ready,
    Task {
        task_id: String,
        task_data: serde_json::Value,
    },
    Result {
        task_id: String,
        status: TaskStatus,
        #[serde(default)]
        output: serde_json::Value,
        #[serde(default)]
        metadata: ResultMetadata,
        #[serde(default)]
        confidence: f64,
        #[serde(default)]
        resources_used: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    Heartbeat,
    Shutdown,
    /// Anything this side does not understand.
    #[serde(other)]
    Unknown,
}

impl WireMessage {
    pub fn to_line(&self) -> Result<String, PoolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> Result<Self, PoolError> {
        serde_json::from_str(line).map_err(|e| {
            PoolError::CommunicationError(format!("malformed wire message: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_message_uses_the_wire_shape() {
        let message = WireMessage::Task {
            task_id: "t-1".to_string(),
            task_data: serde_json::json!({"kind": "analysis"}),
        };
        let line = message.to_line().unwrap();
        assert!(line.contains(r#""type":"task""#));
        assert!(line.contains(r#""task_id":"t-1""#));
    }

    #[test]
    fn result_roundtrips_with_defaults() {
        let line = r#"{"type":"result","task_id":"t-1","status":"completed","output":{"ok":true}}"#;
        match WireMessage::from_line(line).unwrap() {
            WireMessage::Result {
                task_id,
                status,
                output,
                metadata,
                ..
            } => {
                assert_eq!(task_id, "t-1");
                assert_eq!(status, TaskStatus::Completed);
                assert_eq!(output["ok"], serde_json::json!(true));
                assert_eq!(metadata.tokens_consumed, 0);
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn unknown_message_types_are_tolerated() {
        let message = WireMessage::from_line(r#"{"type":"telemetry","cpu":0.5}"#).unwrap();
        assert!(matches!(message, WireMessage::Unknown));
    }

    #[test]
    fn malformed_lines_are_communication_errors() {
        assert!(matches!(
            WireMessage::from_line("not json"),
            Err(PoolError::CommunicationError(_))
        ));
    }

    #[test]
    fn control_messages_are_bare() {
        assert_eq!(
            WireMessage::Heartbeat.to_line().unwrap(),
            r#"{"type":"heartbeat"}"#
        );
        assert_eq!(
            WireMessage::Shutdown.to_line().unwrap(),
            r#"{"type":"shutdown"}"#
        );
    }
}
