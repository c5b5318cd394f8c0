//! Interactive robot↔board corner calibration.
//!
//! Jog the tool over the centre of a1, a8, h1 and h8, enter the machine XY
//! for each, and the result is written back to the edge config.

use colored::Colorize;
use robotik_runtime::config::RobotBoardCorners;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

/// Parse `"x y"` or `"x, y"` into millimetres.
pub fn parse_xy(raw: &str) -> Option<[f64; 2]> {
    let mut parts = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .map(str::parse::<f64>);
    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    if parts.next().is_some() || !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some([x, y])
}

/// Prompt for each corner, keeping the current value on empty input.
///
/// Returns `Ok(None)` when the operator aborts with Ctrl-C or Ctrl-D.
pub fn prompt_corners(
    current: RobotBoardCorners,
) -> Result<Option<RobotBoardCorners>, ReadlineError> {
    let mut rl = DefaultEditor::new()?;
    let mut corners = current;
    println!("  Enter machine X Y (mm) at each corner square centre.");
    let fields: [(&str, &mut [f64; 2]); 4] = [
        ("a1", &mut corners.a1),
        ("a8", &mut corners.a8),
        ("h1", &mut corners.h1),
        ("h8", &mut corners.h8),
    ];
    for (label, slot) in fields {
        loop {
            let prompt = format!("  {} [{} {}]: ", label.bold(), slot[0], slot[1]);
            match rl.readline(&prompt) {
                Ok(line) if line.trim().is_empty() => break,
                Ok(line) => match parse_xy(&line) {
                    Some(xy) => {
                        *slot = xy;
                        break;
                    }
                    None => println!("  {}", "expected two numbers, e.g. `12.5 40`".yellow()),
                },
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
    Ok(Some(corners))
}

/// Reject calibrations where two corners coincide.
pub fn check_corners(c: &RobotBoardCorners) -> Result<(), String> {
    let pts = [("a1", c.a1), ("a8", c.a8), ("h1", c.h1), ("h8", c.h8)];
    for (i, (na, a)) in pts.iter().enumerate() {
        for (nb, b) in &pts[i + 1..] {
            if (a[0] - b[0]).hypot(a[1] - b[1]) < 1.0 {
                return Err(format!("{na} and {nb} are less than 1 mm apart"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_space_and_comma_pairs() {
        assert_eq!(parse_xy("12.5 40"), Some([12.5, 40.0]));
        assert_eq!(parse_xy(" -3,7 "), Some([-3.0, 7.0]));
        assert_eq!(parse_xy("1, 2"), Some([1.0, 2.0]));
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert_eq!(parse_xy(""), None);
        assert_eq!(parse_xy("5"), None);
        assert_eq!(parse_xy("1 2 3"), None);
        assert_eq!(parse_xy("x 2"), None);
        assert_eq!(parse_xy("inf 2"), None);
    }

    #[test]
    fn coincident_corners_are_rejected() {
        let mut c = RobotBoardCorners::default();
        check_corners(&c).unwrap();
        c.h8 = c.a8;
        assert!(check_corners(&c).unwrap_err().contains("a8"));
    }
}
