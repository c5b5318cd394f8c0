//! Skill outcomes and the closed fault set.
//!
//! A skill that ran but did not achieve its physical goal returns
//! [`SkillOutcome::Failed`]; a hardware, protocol or safety problem aborts
//! the skill with a [`Fault`], which the orchestrator converts into a
//! [`FailureCode`] via [`Fault::failure_code`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures caused by perception or physical uncertainty. The same skill
/// call may be re-attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryableFailure {
    PickNoChange,
    PlaceNoChange,
    VisionLowConf,
}

/// Failures that end the current skill call immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalFailure {
    LimitViolation,
    /// Recovery runs, but the call still terminates.
    GrblAlarm,
    Timeout,
    Unknown,
}

/// Operator-facing failure code, serialized as e.g. `"VISION_LOW_CONF"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FailureCode {
    Retryable(RetryableFailure),
    Terminal(TerminalFailure),
}

impl FailureCode {
    pub const fn is_retryable(self) -> bool {
        matches!(self, FailureCode::Retryable(_))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::Retryable(RetryableFailure::PickNoChange) => "PICK_NO_CHANGE",
            FailureCode::Retryable(RetryableFailure::PlaceNoChange) => "PLACE_NO_CHANGE",
            FailureCode::Retryable(RetryableFailure::VisionLowConf) => "VISION_LOW_CONF",
            FailureCode::Terminal(TerminalFailure::LimitViolation) => "LIMIT_VIOLATION",
            FailureCode::Terminal(TerminalFailure::GrblAlarm) => "GRBL_ALARM",
            FailureCode::Terminal(TerminalFailure::Timeout) => "TIMEOUT",
            FailureCode::Terminal(TerminalFailure::Unknown) => "UNKNOWN",
        }
    }
}

impl From<RetryableFailure> for FailureCode {
    fn from(f: RetryableFailure) -> Self {
        FailureCode::Retryable(f)
    }
}

impl From<TerminalFailure> for FailureCode {
    fn from(f: TerminalFailure) -> Self {
        FailureCode::Terminal(f)
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown failure code '{s}'"))
    }
}

/// Result of one skill execution. Always produced, never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OutcomeRecord", into = "OutcomeRecord")]
pub enum SkillOutcome {
    Succeeded,
    Failed(FailureCode),
}

impl SkillOutcome {
    pub fn failed(code: impl Into<FailureCode>) -> Self {
        SkillOutcome::Failed(code.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SkillOutcome::Succeeded)
    }

    pub fn failure_code(&self) -> Option<FailureCode> {
        match self {
            SkillOutcome::Succeeded => None,
            SkillOutcome::Failed(code) => Some(*code),
        }
    }

    /// `true` when the orchestrator should attempt the skill again.
    pub fn is_retryable(&self) -> bool {
        self.failure_code().is_some_and(FailureCode::is_retryable)
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct OutcomeRecord {
    success: bool,
    #[serde(default)]
    failure_code: Option<FailureCode>,
}

impl From<OutcomeRecord> for SkillOutcome {
    fn from(r: OutcomeRecord) -> Self {
        match (r.success, r.failure_code) {
            (true, _) => SkillOutcome::Succeeded,
            (false, Some(code)) => SkillOutcome::Failed(code),
            (false, None) => SkillOutcome::failed(TerminalFailure::Unknown),
        }
    }
}

impl From<SkillOutcome> for OutcomeRecord {
    fn from(o: SkillOutcome) -> Self {
        OutcomeRecord {
            success: o.is_success(),
            failure_code: o.failure_code(),
        }
    }
}

/// Hardware, protocol and safety faults that abort a skill attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Fault {
    #[error("motion controller is not connected")]
    NotConnected,
    #[error("controller alarm: {0}")]
    Alarm(String),
    #[error("controller error: {0}")]
    Protocol(String),
    #[error("timed out waiting for controller acknowledgement")]
    Timeout,
    #[error("workspace limit violated: {0}")]
    LimitViolation(String),
    #[error("serial I/O failure: {0}")]
    Io(String),
    #[error("camera failure: {0}")]
    Camera(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Fault {
    /// Failure code reported for a skill aborted by this fault.
    pub fn failure_code(&self) -> FailureCode {
        match self {
            Fault::LimitViolation(_) => TerminalFailure::LimitViolation.into(),
            Fault::Alarm(_) => TerminalFailure::GrblAlarm.into(),
            Fault::Timeout => TerminalFailure::Timeout.into(),
            Fault::Protocol(_)
            | Fault::NotConnected
            | Fault::Io(_)
            | Fault::Camera(_)
            | Fault::InvalidInput(_) => TerminalFailure::Unknown.into(),
        }
    }
}
