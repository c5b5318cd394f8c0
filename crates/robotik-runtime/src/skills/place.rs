use robotik_kernel::{check_workspace, enforce_feedrate};
use robotik_types::{Context, Fault, SkillOutcome, Square, Theta};
use tracing::info;

use super::{Skill, SkillContext, dwell, missing_square, target_square};

/// Lower the held piece onto the context's square and release it.
pub fn place(
    ctx: &mut SkillContext<'_>,
    context: &Context,
    theta: &Theta,
) -> Result<SkillOutcome, Fault> {
    match target_square(context)? {
        Some(square) => place_square(ctx, square, theta),
        None => Ok(missing_square(Skill::Place)),
    }
}

pub(super) fn place_square(
    ctx: &mut SkillContext<'_>,
    square: Square,
    theta: &Theta,
) -> Result<SkillOutcome, Fault> {
    let skills = &ctx.config.skills;
    let safety = &ctx.config.safety;
    let [bx, by] = ctx.square_to_xy(square);
    let (x, y) = (bx + theta.dx_mm, by + theta.dy_mm);
    let safe_z = skills.safe_z_mm;
    let place_z = skills.place_z_mm + theta.dz_place_mm;
    let feed = enforce_feedrate(theta.v_place, safety.max_feedrate_mm_min);
    let lift = enforce_feedrate(theta.v_lift, safety.max_feedrate_mm_min);

    check_workspace(x, y, safe_z, &safety.workspace)?;
    check_workspace(x, y, place_z, &safety.workspace)?;

    info!(%square, x, y, z = place_z, "place");
    ctx.move_z(safe_z, feed)?;
    ctx.move_xyz(x, y, safe_z, feed)?;
    ctx.move_z(place_z, feed)?;
    ctx.gripper.open(&mut *ctx.driver)?;
    dwell(theta.dwell_release_ms);
    ctx.move_z(safe_z, lift)?;

    let verifier = ctx.verifier;
    verifier.verify_place(&mut *ctx.vision, &square.to_string())
}

#[cfg(test)]
mod tests {
    use robotik_hal::{Gripper, SimLink};

    use super::*;
    use crate::skills::testing::{board, config, driver, quick_theta, verifier};

    #[test]
    fn place_opens_gripper_at_place_height() {
        let cfg = config();
        let link = SimLink::new();
        let mut driver = driver(&link);
        let mut gripper = Gripper::new(true, Some("M5".into()), Some("M3 S1000".into()));
        let mut vision = board(true);
        let mut ctx = SkillContext {
            config: &cfg,
            driver: &mut driver,
            gripper: &mut gripper,
            vision: &mut vision,
            verifier: verifier(&cfg),
        };
        let theta = Theta {
            dz_place_mm: 1.0,
            v_place: 800.0,
            ..quick_theta()
        };
        let context = Context::for_square("a1".parse().unwrap());
        let outcome = place(&mut ctx, &context, &theta).unwrap();
        assert!(outcome.is_success());

        let written = link.written();
        let descend = written.iter().position(|l| l == "G0 Z7.000 F800.0").unwrap();
        let release = written.iter().position(|l| l == "M5").unwrap();
        assert!(descend < release);
        assert_eq!(written.last().unwrap(), "G0 Z80.000 F1500.0");
    }

    #[test]
    fn empty_square_after_place_is_retryable() {
        let cfg = config();
        let link = SimLink::new();
        let mut driver = driver(&link);
        let mut gripper = Gripper::disabled();
        let mut vision = board(false);
        let mut ctx = SkillContext {
            config: &cfg,
            driver: &mut driver,
            gripper: &mut gripper,
            vision: &mut vision,
            verifier: verifier(&cfg),
        };
        let context = Context::for_square("c3".parse().unwrap());
        let outcome = place(&mut ctx, &context, &quick_theta()).unwrap();
        assert!(outcome.is_retryable());
    }
}
