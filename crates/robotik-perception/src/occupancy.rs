//! Per-cell occupancy from background differencing.
//!
//! Each of the 64 cells is projected from board millimetres into the image
//! through [`BoardPose::board_to_image`]; the mean absolute grey-level
//! difference against the stored background inside that quadrilateral
//! decides whether the cell holds a piece.

use std::collections::BTreeMap;

use robotik_types::Square;
use tracing::warn;

use crate::board_pose::BoardPose;
use crate::frame::GrayFrame;

/// Occupied/empty state per cell label plus one confidence for the map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OccupancyMap {
    pub cells: BTreeMap<String, bool>,
    pub confidence: f64,
}

impl OccupancyMap {
    pub fn is_occupied(&self, cell: &str) -> Option<bool> {
        self.cells.get(cell).copied()
    }
}

/// Background-difference occupancy classifier.
pub struct OccupancyDetector {
    square_size_mm: f64,
    threshold: f64,
    pose: Option<BoardPose>,
    background: Option<GrayFrame>,
}

impl OccupancyDetector {
    pub fn new(square_size_mm: f64, threshold: f64) -> Self {
        Self {
            square_size_mm,
            threshold,
            pose: None,
            background: None,
        }
    }

    pub fn set_pose(&mut self, pose: BoardPose) {
        self.pose = Some(pose);
    }

    pub fn pose(&self) -> Option<&BoardPose> {
        self.pose.as_ref()
    }

    pub fn has_background(&self) -> bool {
        self.background.is_some()
    }

    /// Store `frame` as the empty-board reference.
    pub fn update_background(&mut self, frame: GrayFrame) {
        self.background = Some(frame);
    }

    pub fn clear_background(&mut self) {
        self.background = None;
    }

    /// Classify every cell. Without a pose or background the map is empty
    /// with confidence 0.
    pub fn classify(&self, frame: &GrayFrame) -> OccupancyMap {
        let (Some(pose), Some(background)) = (&self.pose, &self.background) else {
            return OccupancyMap::default();
        };
        if !frame.same_shape(background) {
            warn!(
                frame_w = frame.width,
                frame_h = frame.height,
                bg_w = background.width,
                bg_h = background.height,
                "frame does not match background size"
            );
            return OccupancyMap::default();
        }
        if !frame.is_complete() || !background.is_complete() {
            warn!(
                frame_len = frame.pixels.len(),
                bg_len = background.pixels.len(),
                "frame buffer does not match its size"
            );
            return OccupancyMap::default();
        }
        let cells = Square::all()
            .map(|sq| {
                let score = self.cell_score(pose, background, frame, sq);
                (sq.to_string(), score > self.threshold)
            })
            .collect();
        OccupancyMap {
            cells,
            confidence: pose.confidence,
        }
    }

    fn cell_score(&self, pose: &BoardPose, background: &GrayFrame, frame: &GrayFrame, sq: Square) -> f64 {
        let s = self.square_size_mm;
        let x0 = f64::from(sq.file) * s;
        let y0 = f64::from(sq.rank) * s;
        let corners = [[x0, y0], [x0 + s, y0], [x0 + s, y0 + s], [x0, y0 + s]];
        let mut polygon = [[0.0; 2]; 4];
        for (dst, c) in polygon.iter_mut().zip(corners) {
            match pose.board_to_image.apply(c) {
                Some(p) => *dst = p.map(f64::round),
                None => return 0.0,
            }
        }
        mean_abs_diff(&polygon, background, frame)
    }
}

/// Mean |frame - background| over the pixels inside the convex quad, or 0
/// when the quad covers no pixel.
fn mean_abs_diff(polygon: &[[f64; 2]; 4], background: &GrayFrame, frame: &GrayFrame) -> f64 {
    let (min_x, max_x, min_y, max_y) = polygon.iter().fold(
        (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
        |(a, b, c, d), p| (a.min(p[0]), b.max(p[0]), c.min(p[1]), d.max(p[1])),
    );
    let last_x = frame.width as f64 - 1.0;
    let last_y = frame.height as f64 - 1.0;
    if max_x < 0.0 || max_y < 0.0 || min_x > last_x || min_y > last_y {
        return 0.0;
    }
    let (x_lo, x_hi) = (min_x.max(0.0) as usize, max_x.min(last_x) as usize);
    let (y_lo, y_hi) = (min_y.max(0.0) as usize, max_y.min(last_y) as usize);

    let mut sum = 0u64;
    let mut count = 0u64;
    for y in y_lo..=y_hi {
        for x in x_lo..=x_hi {
            if inside_convex(polygon, [x as f64, y as f64]) {
                sum += u64::from(frame.get(x, y).abs_diff(background.get(x, y)));
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Point-in-convex-polygon, boundary inclusive, either winding.
fn inside_convex(polygon: &[[f64; 2]; 4], p: [f64; 2]) -> bool {
    let mut sign = 0.0f64;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let cross = (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0]);
        if cross == 0.0 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homography::Homography;

    /// 1 px per mm, board origin at image origin.
    fn unit_pose() -> BoardPose {
        BoardPose::from_calibration(Homography::identity()).unwrap()
    }

    fn paint_cell(frame: &mut GrayFrame, file: usize, rank: usize, size: usize, value: u8) {
        for y in rank * size..(rank + 1) * size {
            for x in file * size..(file + 1) * size {
                frame.pixels[y * frame.width + x] = value;
            }
        }
    }

    #[test]
    fn no_pose_and_no_background_is_empty() {
        let det = OccupancyDetector::new(10.0, 18.0);
        let map = det.classify(&GrayFrame::filled(80, 80, 0));
        assert!(map.cells.is_empty());
        assert_eq!(map.confidence, 0.0);
    }

    #[test]
    fn pose_without_background_is_empty() {
        let mut det = OccupancyDetector::new(10.0, 18.0);
        det.set_pose(unit_pose());
        assert_eq!(det.classify(&GrayFrame::filled(80, 80, 0)), OccupancyMap::default());
    }

    #[test]
    fn changed_cell_is_occupied() {
        let mut det = OccupancyDetector::new(10.0, 18.0);
        det.set_pose(unit_pose());
        det.update_background(GrayFrame::filled(80, 80, 50));
        let mut frame = GrayFrame::filled(80, 80, 50);
        paint_cell(&mut frame, 4, 3, 10, 200);
        let map = det.classify(&frame);
        assert_eq!(map.cells.len(), 64);
        assert_eq!(map.confidence, 1.0);
        assert_eq!(map.is_occupied("e4"), Some(true));
        assert_eq!(map.is_occupied("a1"), Some(false));
        assert_eq!(map.cells.values().filter(|v| **v).count(), 1);
    }

    #[test]
    fn small_noise_stays_below_threshold() {
        let mut det = OccupancyDetector::new(10.0, 18.0);
        det.set_pose(unit_pose());
        det.update_background(GrayFrame::filled(80, 80, 50));
        let map = det.classify(&GrayFrame::filled(80, 80, 60));
        assert!(map.cells.values().all(|v| !v));
    }

    #[test]
    fn mismatched_frame_size_is_empty() {
        let mut det = OccupancyDetector::new(10.0, 18.0);
        det.set_pose(unit_pose());
        det.update_background(GrayFrame::filled(80, 80, 50));
        assert!(det.classify(&GrayFrame::filled(40, 40, 50)).cells.is_empty());
    }

    #[test]
    fn short_frame_buffer_is_empty() {
        let mut det = OccupancyDetector::new(10.0, 18.0);
        det.set_pose(unit_pose());
        det.update_background(GrayFrame::filled(80, 80, 50));
        let short = GrayFrame::new(80, 80, vec![50; 100]);
        assert_eq!(det.classify(&short), OccupancyMap::default());
    }

    #[test]
    fn projected_corners_round_to_nearest_pixel() {
        // 0.96 px per mm: a1 spans x 0..9.6 and b1 spans x 9.6..19.2.
        // Rounded, column 9 belongs to a1 only.
        let inv = 1.0 / 0.96;
        let image_to_board = Homography([[inv, 0.0, 0.0], [0.0, inv, 0.0], [0.0, 0.0, 1.0]]);
        let mut det = OccupancyDetector::new(10.0, 18.0);
        det.set_pose(BoardPose::from_calibration(image_to_board).unwrap());
        det.update_background(GrayFrame::filled(80, 80, 0));
        let mut frame = GrayFrame::filled(80, 80, 0);
        for y in 0..10 {
            frame.pixels[y * 80 + 9] = 255;
        }
        let map = det.classify(&frame);
        assert_eq!(map.is_occupied("a1"), Some(true));
        assert_eq!(map.is_occupied("b1"), Some(false));
    }

    #[test]
    fn cells_outside_image_score_zero() {
        let mut det = OccupancyDetector::new(10.0, 18.0);
        det.set_pose(unit_pose());
        det.update_background(GrayFrame::filled(20, 20, 0));
        let map = det.classify(&GrayFrame::filled(20, 20, 255));
        assert_eq!(map.is_occupied("a1"), Some(true));
        assert_eq!(map.is_occupied("h8"), Some(false));
    }
}
