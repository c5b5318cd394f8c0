use robotik_kernel::check_workspace;
use robotik_types::{Context, Fault, SkillOutcome, Theta};
use tracing::info;

use super::SkillContext;

/// Return the machine to a known state: unlock, optionally home, open the
/// gripper, rise to safe Z and park.
pub fn reset(
    ctx: &mut SkillContext<'_>,
    _context: &Context,
    _theta: &Theta,
) -> Result<SkillOutcome, Fault> {
    let skills = &ctx.config.skills;
    let [px, py] = skills.park_xy_mm;
    let safe_z = skills.safe_z_mm;
    let feed = skills
        .feedrate_mm_min
        .min(ctx.config.safety.max_feedrate_mm_min);
    let home = ctx.config.recovery.home_on_unlock;
    check_workspace(px, py, safe_z, &ctx.config.safety.workspace)?;

    info!(home, "reset");
    ctx.driver.unlock()?;
    if home {
        ctx.driver.home()?;
    }
    ctx.gripper.open(&mut *ctx.driver)?;
    ctx.move_z(safe_z, feed)?;
    ctx.move_xyz(px, py, safe_z, feed)?;
    Ok(SkillOutcome::Succeeded)
}
