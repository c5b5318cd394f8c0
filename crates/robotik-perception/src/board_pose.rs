//! Board pose from four fiducial markers.
//!
//! The four expected marker ids sit at the board corners, in order:
//! `(0, 0)`, `(B, 0)`, `(B, B)`, `(0, B)` in board millimetres, with
//! `B = 8 * square_size_mm`. Marker detection itself is pluggable through
//! [`MarkerDetector`] so that any fiducial backend can feed the pose.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::frame::GrayFrame;
use crate::homography::Homography;

/// Cells per board edge.
pub const BOARD_CELLS: usize = 8;

/// Fiducial dictionary the detector should search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerDictionary {
    #[serde(rename = "DICT_4X4_50")]
    Dict4x4_50,
    #[serde(rename = "DICT_4X4_100")]
    Dict4x4_100,
    #[serde(rename = "DICT_5X5_100")]
    Dict5x5_100,
    #[serde(rename = "DICT_6X6_250")]
    Dict6x6_250,
}

/// One detected marker: its id and four image-space corners.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerDetection {
    pub id: u32,
    pub corners: [[f64; 2]; 4],
}

impl MarkerDetection {
    /// Mean of the four corners.
    pub fn center(&self) -> [f64; 2] {
        let (sx, sy) = self
            .corners
            .iter()
            .fold((0.0, 0.0), |(sx, sy), c| (sx + c[0], sy + c[1]));
        [sx / 4.0, sy / 4.0]
    }
}

/// A fiducial marker detector.
pub trait MarkerDetector: Send {
    fn detect(&mut self, frame: &GrayFrame, dictionary: MarkerDictionary) -> Vec<MarkerDetection>;
}

/// Detector for rigs without a fiducial backend; the configured homography
/// is then the only pose source.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMarkers;

impl MarkerDetector for NoMarkers {
    fn detect(&mut self, _frame: &GrayFrame, _dictionary: MarkerDictionary) -> Vec<MarkerDetection> {
        Vec::new()
    }
}

/// Returns a fixed set of detections regardless of the frame.
#[derive(Debug, Default, Clone)]
pub struct FixedMarkers(pub Vec<MarkerDetection>);

impl MarkerDetector for FixedMarkers {
    fn detect(&mut self, _frame: &GrayFrame, _dictionary: MarkerDictionary) -> Vec<MarkerDetection> {
        self.0.clone()
    }
}

/// Mapping between image pixels and board millimetres.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardPose {
    pub image_to_board: Homography,
    pub board_to_image: Homography,
    /// Marker centres the pose was fitted to (empty for calibrated poses).
    pub image_points: Vec<[f64; 2]>,
    /// Fraction of expected markers found, in `[0, 1]`.
    pub confidence: f64,
}

impl BoardPose {
    /// Pose from a stored image→board calibration.
    pub fn from_calibration(image_to_board: Homography) -> Option<Self> {
        Some(Self {
            board_to_image: image_to_board.inverse()?,
            image_to_board,
            image_points: Vec::new(),
            confidence: 1.0,
        })
    }
}

/// Detect the board pose in `frame`.
///
/// Returns `None` unless all four expected markers are visible.
pub fn detect_board_pose(
    frame: &GrayFrame,
    detector: &mut dyn MarkerDetector,
    dictionary: MarkerDictionary,
    expected_ids: &[u32],
    square_size_mm: f64,
) -> Option<BoardPose> {
    let expected = expected_ids.get(..4)?;
    let detections = detector.detect(frame, dictionary);
    let centers: Vec<[f64; 2]> = expected
        .iter()
        .filter_map(|id| detections.iter().find(|d| d.id == *id).map(MarkerDetection::center))
        .collect();
    let found = centers.len();
    debug!(found, seen = detections.len(), "board markers");
    let image_points: [[f64; 2]; 4] = centers.try_into().ok()?;

    let edge = BOARD_CELLS as f64 * square_size_mm;
    let board_points = [[0.0, 0.0], [edge, 0.0], [edge, edge], [0.0, edge]];
    let image_to_board = Homography::from_points(&image_points, &board_points)?;
    let board_to_image = image_to_board.inverse()?;
    Some(BoardPose {
        image_to_board,
        board_to_image,
        image_points: image_points.to_vec(),
        confidence: found as f64 / 4.0,
    })
}
