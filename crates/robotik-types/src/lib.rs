//! Shared domain types for the Robotik skill-learning stack.
//!
//! Everything that crosses a crate or process boundary lives here: the
//! [`Theta`] parameter vector, the [`Context`] partition key, the failure
//! taxonomy ([`FailureCode`], [`SkillOutcome`], [`Fault`]) and the JSON wire
//! types exchanged between the edge and the learning agent.

pub mod context;
pub mod error;
pub mod outcome;
pub mod theta;
pub mod wire;

pub use context::{Context, Square, SquareError};
pub use error::ConfigError;
pub use outcome::{FailureCode, Fault, RetryableFailure, SkillOutcome, TerminalFailure};
pub use theta::{Bounds, Theta, ThetaClamps, ThetaField, default_theta_clamps};
pub use wire::{
    ChessMoveRequest, ChessMoveResponse, ChessSource, NextThetaResponse, ReportRequest,
    StatusResponse, ThetaSource, TrialRecord,
};
