//! Safety envelope: theta clamping, workspace bounds and feedrate caps.
//!
//! Everything here is pure. [`check_workspace`] must run for every target
//! before the corresponding move is handed to the motion driver; it is the
//! last guard against a bad theta or a bad calibration.

use robotik_types::{Bounds, ConfigError, Fault, Theta, ThetaClamps};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Reachable Cartesian box of the mechanism, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceBounds {
    pub x_mm: Bounds,
    pub y_mm: Bounds,
    pub z_mm: Bounds,
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        Self {
            x_mm: Bounds::new(0.0, 300.0),
            y_mm: Bounds::new(0.0, 300.0),
            z_mm: Bounds::new(0.0, 200.0),
        }
    }
}

impl WorkspaceBounds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.x_mm.validate("safety.workspace.x_mm")?;
        self.y_mm.validate("safety.workspace.y_mm")?;
        self.z_mm.validate("safety.workspace.z_mm")
    }
}

/// Copy of `theta` with every field that has an entry in `clamps` bounded
/// to its interval. Unbounded fields pass through unchanged.
pub fn clamp_theta(theta: &Theta, clamps: &ThetaClamps) -> Theta {
    let mut out = *theta;
    for (field, bounds) in clamps {
        out.set(*field, bounds.clamp(theta.get(*field)));
    }
    out
}

/// Fail with [`Fault::LimitViolation`] if any axis of `(x, y, z)` lies
/// outside `bounds`.
pub fn check_workspace(x: f64, y: f64, z: f64, bounds: &WorkspaceBounds) -> Result<(), Fault> {
    for (axis, value, limit) in [
        ("x", x, bounds.x_mm),
        ("y", y, bounds.y_mm),
        ("z", z, bounds.z_mm),
    ] {
        if !limit.contains(value) {
            warn!(axis, value, low = limit.low, high = limit.high, "workspace violation");
            return Err(Fault::LimitViolation(format!(
                "{axis}={value:.3} outside [{}, {}]",
                limit.low, limit.high
            )));
        }
    }
    Ok(())
}

/// `min(requested, max)`.
pub fn enforce_feedrate(requested: f64, max: f64) -> f64 {
    requested.min(max)
}
