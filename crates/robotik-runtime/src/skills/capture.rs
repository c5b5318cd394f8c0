use robotik_types::{Context, Fault, SkillOutcome, Square, Theta};
use tracing::info;

use super::pick::pick_square;
use super::place::place_square;
use super::{Skill, SkillContext, missing_square, target_square};

/// Remove the piece on the context's square to the graveyard square.
///
/// The place half only runs when the pick verified.
pub fn capture(
    ctx: &mut SkillContext<'_>,
    context: &Context,
    theta: &Theta,
) -> Result<SkillOutcome, Fault> {
    let Some(square) = target_square(context)? else {
        return Ok(missing_square(Skill::Capture));
    };
    let graveyard: Square = ctx
        .config
        .skills
        .graveyard_square
        .parse()
        .map_err(|e: robotik_types::SquareError| Fault::InvalidInput(e.to_string()))?;

    let picked = pick_square(ctx, square, theta)?;
    if !picked.is_success() {
        return Ok(picked);
    }
    info!(from = %square, to = %graveyard, "capture");
    place_square(ctx, graveyard, theta)
}
