use robotik_kernel::{check_workspace, enforce_feedrate};
use robotik_types::{Context, Fault, SkillOutcome, Square, Theta};
use tracing::info;

use super::{Skill, SkillContext, dwell, missing_square, target_square};

/// Grasp the piece on the context's square and lift it clear.
pub fn pick(
    ctx: &mut SkillContext<'_>,
    context: &Context,
    theta: &Theta,
) -> Result<SkillOutcome, Fault> {
    match target_square(context)? {
        Some(square) => pick_square(ctx, square, theta),
        None => Ok(missing_square(Skill::Pick)),
    }
}

pub(super) fn pick_square(
    ctx: &mut SkillContext<'_>,
    square: Square,
    theta: &Theta,
) -> Result<SkillOutcome, Fault> {
    let skills = &ctx.config.skills;
    let safety = &ctx.config.safety;
    let [bx, by] = ctx.square_to_xy(square);
    let (x, y) = (bx + theta.dx_mm, by + theta.dy_mm);
    let safe_z = skills.safe_z_mm;
    let pick_z = skills.pick_z_mm + theta.dz_pick_mm;
    let approach = enforce_feedrate(theta.v_approach, safety.max_feedrate_mm_min);
    let lift = enforce_feedrate(theta.v_lift, safety.max_feedrate_mm_min);

    check_workspace(x, y, safe_z, &safety.workspace)?;
    check_workspace(x, y, pick_z, &safety.workspace)?;

    info!(%square, x, y, z = pick_z, yaw = theta.yaw_deg, "pick");
    ctx.move_z(safe_z, approach)?;
    ctx.move_xyz(x, y, safe_z, approach)?;
    ctx.move_z(pick_z, approach)?;
    ctx.gripper.close(&mut *ctx.driver)?;
    dwell(theta.dwell_close_ms);
    ctx.move_z(safe_z, lift)?;

    let verifier = ctx.verifier;
    verifier.verify_pick(&mut *ctx.vision, &square.to_string())
}
