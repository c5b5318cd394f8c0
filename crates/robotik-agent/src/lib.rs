//! `robotik-agent` – the learning service.
//!
//! Hands out theta for a context, records trial outcomes and adapts the
//! per-context search. Also proxies chess move requests.
//!
//! # Modules
//!
//! - [`config`] – [`AgentConfig`][config::AgentConfig]: typed `agent.toml`.
//! - [`auth`] – [`PskAuth`][auth::PskAuth]: pre-shared-key header check.
//! - [`optimizer`] – [`Optimizer`][optimizer::Optimizer]: explore/exploit
//!   Gaussian search with per-context serialized state.
//! - [`chess`] – [`ChessEngine`][chess::ChessEngine]: online service with a
//!   UCI engine fallback.
//! - [`server`] – axum [`router`][server::router] over an explicit
//!   [`AppState`][server::AppState].

pub mod auth;
pub mod chess;
pub mod config;
pub mod optimizer;
pub mod server;

pub use auth::PskAuth;
pub use chess::{ChessEngine, ChessError};
pub use config::AgentConfig;
pub use optimizer::{Optimizer, OptimizerState, Proposal};
pub use server::{AgentError, ApiError, AppState, StatsResponse, router, serve};
