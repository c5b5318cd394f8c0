//! [`Verifier`] – polls occupancy until a cell reaches the expected state.

use std::time::Duration;

use robotik_types::{Fault, RetryableFailure, SkillOutcome};
use tracing::debug;

use crate::occupancy::OccupancyMap;

/// Anything that can produce a fresh occupancy observation.
pub trait OccupancySource {
    fn observe(&mut self) -> Result<OccupancyMap, Fault>;
}

impl<F> OccupancySource for F
where
    F: FnMut() -> Result<OccupancyMap, Fault>,
{
    fn observe(&mut self) -> Result<OccupancyMap, Fault> {
        self()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Verifier {
    pub retries: u32,
    pub delay: Duration,
    pub min_confidence: f64,
}

impl Verifier {
    pub fn new(retries: u32, delay: Duration, min_confidence: f64) -> Self {
        Self {
            retries,
            delay,
            min_confidence,
        }
    }

    /// Poll up to `retries + 1` times for `cell` to read `expected_occupied`.
    ///
    /// Observations below `min_confidence` are discarded. Exhausting all
    /// attempts yields `VISION_LOW_CONF`. Faults from the source abort.
    pub fn verify_square(
        &self,
        source: &mut dyn OccupancySource,
        cell: &str,
        expected_occupied: bool,
    ) -> Result<SkillOutcome, Fault> {
        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            let map = source.observe()?;
            if map.confidence >= self.min_confidence {
                let observed = map.is_occupied(cell);
                debug!(cell, attempt, ?observed, expected_occupied, "occupancy check");
                if observed == Some(expected_occupied) {
                    return Ok(SkillOutcome::Succeeded);
                }
            } else {
                debug!(cell, attempt, confidence = map.confidence, "low-confidence observation discarded");
            }
            if attempt < attempts {
                std::thread::sleep(self.delay);
            }
        }
        Ok(SkillOutcome::failed(RetryableFailure::VisionLowConf))
    }

    /// The picked cell should now be empty.
    pub fn verify_pick(&self, source: &mut dyn OccupancySource, cell: &str) -> Result<SkillOutcome, Fault> {
        self.verify_square(source, cell, false)
    }

    /// The target cell should now be occupied.
    pub fn verify_place(&self, source: &mut dyn OccupancySource, cell: &str) -> Result<SkillOutcome, Fault> {
        self.verify_square(source, cell, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn map(cell: &str, occupied: bool, confidence: f64) -> OccupancyMap {
        OccupancyMap {
            cells: BTreeMap::from([(cell.to_string(), occupied)]),
            confidence,
        }
    }

    fn verifier(retries: u32) -> Verifier {
        Verifier::new(retries, Duration::ZERO, 0.6)
    }

    #[test]
    fn succeeds_once_expected_state_is_seen() {
        let mut polls = 0;
        let mut source = || -> Result<OccupancyMap, Fault> {
            polls += 1;
            Ok(map("a2", polls < 3, 1.0))
        };
        let out = verifier(2).verify_pick(&mut source, "a2").unwrap();
        assert_eq!(out, SkillOutcome::Succeeded);
        assert_eq!(polls, 3);
    }

    #[test]
    fn low_confidence_exhausts_attempts() {
        let mut polls = 0;
        let mut source = || -> Result<OccupancyMap, Fault> {
            polls += 1;
            Ok(map("a2", false, 0.5))
        };
        let out = verifier(2).verify_pick(&mut source, "a2").unwrap();
        assert_eq!(out.failure_code().map(|c| c.as_str()), Some("VISION_LOW_CONF"));
        assert_eq!(polls, 3);
    }

    #[test]
    fn persistent_mismatch_reports_vision_low_conf() {
        let mut source = || -> Result<OccupancyMap, Fault> { Ok(map("c3", false, 1.0)) };
        let out = verifier(0).verify_place(&mut source, "c3").unwrap();
        assert!(out.is_retryable());
    }

    #[test]
    fn missing_cell_never_matches() {
        let mut source = || -> Result<OccupancyMap, Fault> {
            Ok(OccupancyMap { cells: BTreeMap::new(), confidence: 1.0 })
        };
        assert!(!verifier(1).verify_pick(&mut source, "a2").unwrap().is_success());
    }

    #[test]
    fn source_fault_aborts() {
        let mut source = || -> Result<OccupancyMap, Fault> { Err(Fault::Camera("unplugged".into())) };
        assert!(matches!(
            verifier(2).verify_pick(&mut source, "a2"),
            Err(Fault::Camera(_))
        ));
    }
}
