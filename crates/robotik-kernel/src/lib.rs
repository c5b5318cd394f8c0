//! `robotik-kernel` – Safety envelope
//!
//! The layer every physical move passes through. It does not plan; it bounds.
//!
//! - [`safety::clamp_theta`] bounds learned parameters to configured ranges.
//! - [`safety::check_workspace`] rejects targets outside the reachable box.
//! - [`safety::enforce_feedrate`] caps requested feedrates.

pub mod safety;

pub use safety::{WorkspaceBounds, check_workspace, clamp_theta, enforce_feedrate};
