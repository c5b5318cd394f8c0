//! JSON payloads exchanged between the edge, the agent and the trial log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::Context;
use crate::outcome::FailureCode;
use crate::theta::Theta;

/// Where a returned theta came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThetaSource {
    /// Best historical theta for the context (exploit).
    Best,
    /// Fresh Gaussian sample (explore).
    Sampled,
}

/// Response of `GET /v1/learn/next`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextThetaResponse {
    pub theta_id: String,
    pub theta: Theta,
    pub skill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ThetaSource>,
}

/// Body of `POST /v1/learn/report`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub theta_id: String,
    pub context: Context,
    pub theta: Theta,
    pub outcome: bool,
    #[serde(default)]
    pub metrics: Map<String, Value>,
    #[serde(default)]
    pub failure_code: Option<FailureCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChessMoveRequest {
    pub fen: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChessSource {
    Online,
    Stockfish,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChessMoveResponse {
    pub uci: String,
    pub source: ChessSource,
}

/// One line of the edge's JSON-lines trial log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_id: String,
    pub theta_id: String,
    pub context: Context,
    pub theta: Theta,
    pub outcome: bool,
    #[serde(default)]
    pub metrics: Map<String, Value>,
    #[serde(default)]
    pub failure_code: Option<FailureCode>,
    /// Filled in by the logger when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::RetryableFailure;

    #[test]
    fn report_accepts_minimal_body() {
        let body = r#"{"theta_id":"t1","context":{"square":"a2"},"theta":{},"outcome":false}"#;
        let req: ReportRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.context.piece_class, "unknown");
        assert!(req.metrics.is_empty());
        assert!(req.failure_code.is_none());
    }

    #[test]
    fn report_carries_failure_code() {
        let body = r#"{"theta_id":"t1","context":{},"theta":{},"outcome":false,
                       "failure_code":"PICK_NO_CHANGE","metrics":{"attempts":2}}"#;
        let req: ReportRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.failure_code, Some(RetryableFailure::PickNoChange.into()));
        assert_eq!(req.metrics["attempts"], 2);
    }

    #[test]
    fn report_rejects_unknown_failure_code() {
        let body = r#"{"theta_id":"t1","context":{},"theta":{},"outcome":false,
                       "failure_code":"GRIPPER_ON_FIRE"}"#;
        assert!(serde_json::from_str::<ReportRequest>(body).is_err());
    }

    #[test]
    fn next_response_without_source_parses() {
        let body = r#"{"theta_id":"t9","theta":{"dx_mm":1.0},"skill":"pick"}"#;
        let resp: NextThetaResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.skill, "pick");
        assert!(resp.source.is_none());
    }
}
