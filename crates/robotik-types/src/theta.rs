//! [`Theta`] – the tunable parameter vector attached to every skill execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Names of the ten theta components, in canonical vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThetaField {
    DxMm,
    DyMm,
    DzPickMm,
    DzPlaceMm,
    YawDeg,
    VApproach,
    VLift,
    VPlace,
    DwellCloseMs,
    DwellReleaseMs,
}

impl ThetaField {
    /// All fields in vector order.
    pub const ALL: [ThetaField; Theta::DIM] = [
        ThetaField::DxMm,
        ThetaField::DyMm,
        ThetaField::DzPickMm,
        ThetaField::DzPlaceMm,
        ThetaField::YawDeg,
        ThetaField::VApproach,
        ThetaField::VLift,
        ThetaField::VPlace,
        ThetaField::DwellCloseMs,
        ThetaField::DwellReleaseMs,
    ];

    /// Wire name of the field, e.g. `"dz_pick_mm"`.
    pub fn name(self) -> &'static str {
        match self {
            ThetaField::DxMm => "dx_mm",
            ThetaField::DyMm => "dy_mm",
            ThetaField::DzPickMm => "dz_pick_mm",
            ThetaField::DzPlaceMm => "dz_place_mm",
            ThetaField::YawDeg => "yaw_deg",
            ThetaField::VApproach => "v_approach",
            ThetaField::VLift => "v_lift",
            ThetaField::VPlace => "v_place",
            ThetaField::DwellCloseMs => "dwell_close_ms",
            ThetaField::DwellReleaseMs => "dwell_release_ms",
        }
    }
}

impl std::fmt::Display for ThetaField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Skill parameters: XY/Z offsets, yaw, feedrates and gripper dwell times.
///
/// Missing fields deserialize to their defaults, so `{}` is a valid theta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theta {
    pub dx_mm: f64,
    pub dy_mm: f64,
    pub dz_pick_mm: f64,
    pub dz_place_mm: f64,
    pub yaw_deg: f64,
    /// Feedrate (mm/min) for the approach and descent moves of a pick.
    pub v_approach: f64,
    /// Feedrate (mm/min) for the retract after grasp or release.
    pub v_lift: f64,
    /// Feedrate (mm/min) for the approach and descent moves of a place.
    pub v_place: f64,
    pub dwell_close_ms: f64,
    pub dwell_release_ms: f64,
}

impl Default for Theta {
    fn default() -> Self {
        Self {
            dx_mm: 0.0,
            dy_mm: 0.0,
            dz_pick_mm: 0.0,
            dz_place_mm: 0.0,
            yaw_deg: 0.0,
            v_approach: 1500.0,
            v_lift: 1500.0,
            v_place: 1500.0,
            dwell_close_ms: 200.0,
            dwell_release_ms: 200.0,
        }
    }
}

impl Theta {
    /// Number of components in the vector.
    pub const DIM: usize = 10;

    pub fn get(&self, field: ThetaField) -> f64 {
        match field {
            ThetaField::DxMm => self.dx_mm,
            ThetaField::DyMm => self.dy_mm,
            ThetaField::DzPickMm => self.dz_pick_mm,
            ThetaField::DzPlaceMm => self.dz_place_mm,
            ThetaField::YawDeg => self.yaw_deg,
            ThetaField::VApproach => self.v_approach,
            ThetaField::VLift => self.v_lift,
            ThetaField::VPlace => self.v_place,
            ThetaField::DwellCloseMs => self.dwell_close_ms,
            ThetaField::DwellReleaseMs => self.dwell_release_ms,
        }
    }

    pub fn set(&mut self, field: ThetaField, value: f64) {
        let slot = match field {
            ThetaField::DxMm => &mut self.dx_mm,
            ThetaField::DyMm => &mut self.dy_mm,
            ThetaField::DzPickMm => &mut self.dz_pick_mm,
            ThetaField::DzPlaceMm => &mut self.dz_place_mm,
            ThetaField::YawDeg => &mut self.yaw_deg,
            ThetaField::VApproach => &mut self.v_approach,
            ThetaField::VLift => &mut self.v_lift,
            ThetaField::VPlace => &mut self.v_place,
            ThetaField::DwellCloseMs => &mut self.dwell_close_ms,
            ThetaField::DwellReleaseMs => &mut self.dwell_release_ms,
        };
        *slot = value;
    }

    /// Flatten into a vector ordered as [`ThetaField::ALL`].
    pub fn to_array(&self) -> [f64; Theta::DIM] {
        ThetaField::ALL.map(|f| self.get(f))
    }

    /// Inverse of [`Theta::to_array`].
    pub fn from_array(values: [f64; Theta::DIM]) -> Self {
        let mut theta = Theta::default();
        for (field, value) in ThetaField::ALL.into_iter().zip(values) {
            theta.set(field, value);
        }
        theta
    }
}

/// Closed interval `[low, high]`, written as a two-element array in config
/// files and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Bounds {
    pub low: f64,
    pub high: f64,
}

impl Bounds {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Bound `value` into the interval.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.low).min(self.high)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }

    /// Reject non-finite or inverted intervals.
    pub fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if !self.low.is_finite() || !self.high.is_finite() {
            return Err(ConfigError::invalid(field, "bounds must be finite"));
        }
        if self.low > self.high {
            return Err(ConfigError::invalid(
                field,
                format!("low {} exceeds high {}", self.low, self.high),
            ));
        }
        Ok(())
    }
}

impl From<[f64; 2]> for Bounds {
    fn from([low, high]: [f64; 2]) -> Self {
        Self { low, high }
    }
}

impl From<Bounds> for [f64; 2] {
    fn from(b: Bounds) -> Self {
        [b.low, b.high]
    }
}

/// Per-field clamp table. Fields without an entry are unbounded.
pub type ThetaClamps = BTreeMap<ThetaField, Bounds>;

/// The stock clamp table shipped with both the edge and the agent.
pub fn default_theta_clamps() -> ThetaClamps {
    use ThetaField::*;
    BTreeMap::from([
        (DxMm, Bounds::new(-2.0, 2.0)),
        (DyMm, Bounds::new(-2.0, 2.0)),
        (DzPickMm, Bounds::new(-2.0, 2.0)),
        (DzPlaceMm, Bounds::new(-2.0, 2.0)),
        (YawDeg, Bounds::new(-5.0, 5.0)),
        (VApproach, Bounds::new(300.0, 2000.0)),
        (VLift, Bounds::new(300.0, 2000.0)),
        (VPlace, Bounds::new(300.0, 2000.0)),
        (DwellCloseMs, Bounds::new(100.0, 800.0)),
        (DwellReleaseMs, Bounds::new(100.0, 800.0)),
    ])
}
