//! Motion skills.
//!
//! A skill turns a [`Context`] and a clamped [`Theta`] into G-code, then asks
//! the vision verifier whether the board changed the way it should. Every
//! target is checked against the workspace before the first move is sent, so
//! a rejected skill leaves the machine where it was.
//!
//! | skill     | verifies                      |
//! |-----------|-------------------------------|
//! | `pick`    | target square becomes empty   |
//! | `place`   | target square becomes occupied|
//! | `capture` | pick, then place at graveyard |
//! | `reset`   | nothing; recovers the machine |

mod capture;
mod pick;
mod place;
mod reset;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use robotik_hal::{Gripper, MotionDriver};
use robotik_perception::{OccupancySource, Verifier};
use robotik_types::{Context, Fault, SkillOutcome, Square, TerminalFailure, Theta};

use crate::config::{EdgeConfig, RobotBoardCorners};

pub use capture::capture;
pub use pick::pick;
pub use place::place;
pub use reset::reset;

/// The skills the edge can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skill {
    Pick,
    Place,
    Capture,
    Reset,
}

impl Skill {
    pub const ALL: [Skill; 4] = [Skill::Pick, Skill::Place, Skill::Capture, Skill::Reset];

    pub fn name(self) -> &'static str {
        match self {
            Skill::Pick => "pick",
            Skill::Place => "place",
            Skill::Capture => "capture",
            Skill::Reset => "reset",
        }
    }

    pub fn run(
        self,
        ctx: &mut SkillContext<'_>,
        context: &Context,
        theta: &Theta,
    ) -> Result<SkillOutcome, Fault> {
        match self {
            Skill::Pick => pick(ctx, context, theta),
            Skill::Place => place(ctx, context, theta),
            Skill::Capture => capture(ctx, context, theta),
            Skill::Reset => reset(ctx, context, theta),
        }
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Skill {
    type Err = Fault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Skill::ALL
            .into_iter()
            .find(|skill| skill.name() == s)
            .ok_or_else(|| Fault::InvalidInput(format!("unknown skill {s:?}")))
    }
}

/// Everything a skill may touch during one attempt.
pub struct SkillContext<'a> {
    pub config: &'a EdgeConfig,
    pub driver: &'a mut MotionDriver,
    pub gripper: &'a mut Gripper,
    pub vision: &'a mut dyn OccupancySource,
    pub verifier: Verifier,
}

impl SkillContext<'_> {
    pub fn square_to_xy(&self, square: Square) -> [f64; 2] {
        square_to_xy(square, &self.config.calibration.robot_board)
    }

    fn move_xyz(&mut self, x: f64, y: f64, z: f64, feed: f64) -> Result<(), Fault> {
        let cmd = format!("G0 X{x:.3} Y{y:.3} Z{z:.3} F{feed:.1}");
        self.driver.send_line(&cmd, true).map(drop)
    }

    fn move_z(&mut self, z: f64, feed: f64) -> Result<(), Fault> {
        let cmd = format!("G0 Z{z:.3} F{feed:.1}");
        self.driver.send_line(&cmd, true).map(drop)
    }
}

/// Bilinear map from a square to robot XY using the four calibrated corners.
///
/// Files run a→h along the `a1→h1` edge and ranks 1→8 along `a1→a8`.
pub fn square_to_xy(square: Square, corners: &RobotBoardCorners) -> [f64; 2] {
    let span = f64::from(robotik_types::context::BOARD_CELLS - 1);
    let u = f64::from(square.file) / span;
    let v = f64::from(square.rank) / span;
    let w = [
        (1.0 - u) * (1.0 - v),
        u * (1.0 - v),
        (1.0 - u) * v,
        u * v,
    ];
    let pts = [corners.a1, corners.h1, corners.a8, corners.h8];
    let mut out = [0.0; 2];
    for (weight, p) in w.iter().zip(pts.iter()) {
        out[0] += weight * p[0];
        out[1] += weight * p[1];
    }
    out
}

/// The square a skill acts on, or `None` when the context carries none.
fn target_square(context: &Context) -> Result<Option<Square>, Fault> {
    context
        .square
        .as_deref()
        .map(|label| {
            label
                .parse::<Square>()
                .map_err(|e| Fault::InvalidInput(e.to_string()))
        })
        .transpose()
}

fn missing_square(skill: Skill) -> SkillOutcome {
    tracing::warn!(%skill, "context has no square");
    SkillOutcome::failed(TerminalFailure::Unknown)
}

fn dwell(ms: f64) {
    if ms > 0.0 {
        std::thread::sleep(Duration::from_secs_f64(ms / 1000.0));
    }
}
