//! `robotik-memory` – persistence.
//!
//! # Modules
//!
//! - [`trial_store`] – [`TrialStore`][trial_store::TrialStore]: SQLite (WAL)
//!   store of trials and theta sets with derived performance, owned by the
//!   learning agent.
//! - [`trial_log`] – [`TrialLogger`][trial_log::TrialLogger]: the edge's
//!   local JSON-lines trial log and evidence-image ring.

pub mod trial_log;
pub mod trial_store;

pub use trial_log::{LoggerError, TrialLogger};
pub use trial_store::{
    BestTheta, StoreError, ThetaPerformance, ThetaSet, Trial, TrialStats, TrialStore,
};
