//! `robotik-runtime` – the edge process.
//!
//! # Modules
//!
//! - [`config`] – [`EdgeConfig`][config::EdgeConfig]: typed `edge.toml`.
//! - [`skills`] – pick, place, capture and reset as G-code plus vision
//!   verification.
//! - [`observer`] – [`BoardObserver`][observer::BoardObserver]: cameras,
//!   pose and occupancy behind one
//!   [`OccupancySource`][robotik_perception::OccupancySource].
//! - [`orchestrator`] – [`EdgeCore`][orchestrator::EdgeCore]: owns the
//!   hardware and runs skills under the retry and alarm-recovery policy.
//! - [`agent_client`] – blocking HTTP client for the learning agent.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing].

pub mod agent_client;
pub mod config;
pub mod observer;
pub mod orchestrator;
pub mod skills;
pub mod telemetry;

pub use agent_client::{AgentClient, AgentClientError, LearningAgent};
pub use config::EdgeConfig;
pub use observer::BoardObserver;
pub use orchestrator::{EdgeCore, EdgeError, EdgeState};
pub use skills::{Skill, SkillContext, square_to_xy};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
