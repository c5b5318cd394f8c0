//! [`BoardObserver`]: the edge's live [`OccupancySource`].
//!
//! Each observation grabs the board frame, refreshes the pose from markers
//! (falling back to the calibrated homography), captures the background on
//! first use and classifies every cell against it.

use robotik_hal::CameraRig;
use robotik_perception::{
    BoardPose, GrayFrame, MarkerDetector, MarkerDictionary, OccupancyDetector, OccupancyMap,
    OccupancySource, detect_board_pose,
};
use robotik_types::Fault;
use tracing::{debug, info};

use crate::config::VisionConfig;

pub struct BoardObserver {
    cameras: CameraRig,
    detector: Box<dyn MarkerDetector>,
    occupancy: OccupancyDetector,
    dictionary: MarkerDictionary,
    marker_ids: Vec<u32>,
    square_size_mm: f64,
    fallback: Option<BoardPose>,
    last_frame: Option<GrayFrame>,
}

impl BoardObserver {
    pub fn new(cameras: CameraRig, detector: Box<dyn MarkerDetector>, vision: &VisionConfig) -> Self {
        let fallback = vision
            .board_pose
            .homography
            .and_then(BoardPose::from_calibration);
        Self {
            cameras,
            detector,
            occupancy: OccupancyDetector::new(
                vision.board.square_size_mm,
                vision.occupancy.threshold,
            ),
            dictionary: vision.aruco.dict,
            marker_ids: vision.aruco.ids.clone(),
            square_size_mm: vision.board.square_size_mm,
            fallback,
            last_frame: None,
        }
    }

    pub fn open(&mut self) -> Result<(), Fault> {
        self.cameras.open_all()
    }

    pub fn close(&mut self) {
        self.cameras.close_all();
    }

    pub fn cameras_mut(&mut self) -> &mut CameraRig {
        &mut self.cameras
    }

    /// Most recent board frame, used as trial evidence.
    pub fn last_frame(&self) -> Option<&GrayFrame> {
        self.last_frame.as_ref()
    }

    /// Current pose, if any source has produced one yet.
    pub fn pose(&self) -> Option<&BoardPose> {
        self.occupancy.pose()
    }

    /// Drop the stored background; the next observation recaptures it.
    pub fn reset_background(&mut self, frame: Option<GrayFrame>) {
        match frame {
            Some(f) => self.occupancy.update_background(f),
            None => self.occupancy.clear_background(),
        }
    }

    fn refresh_pose(&mut self, frame: &GrayFrame) {
        let detected = detect_board_pose(
            frame,
            self.detector.as_mut(),
            self.dictionary,
            &self.marker_ids,
            self.square_size_mm,
        );
        match detected {
            Some(pose) => {
                debug!(confidence = pose.confidence, "board pose from markers");
                self.occupancy.set_pose(pose);
            }
            None => {
                if let Some(pose) = &self.fallback {
                    self.occupancy.set_pose(pose.clone());
                }
            }
        }
    }
}

impl OccupancySource for BoardObserver {
    fn observe(&mut self) -> Result<OccupancyMap, Fault> {
        let frame = GrayFrame::from_camera(&self.cameras.read_board()?)?;
        self.refresh_pose(&frame);
        if !self.occupancy.has_background() {
            info!(width = frame.width, height = frame.height, "captured board background");
            self.occupancy.update_background(frame.clone());
        }
        let map = self.occupancy.classify(&frame);
        self.last_frame = Some(frame);
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use robotik_hal::SimCamera;
    use robotik_perception::{Homography, NoMarkers};

    use super::*;

    fn frame_with(cell: Option<(usize, usize)>) -> robotik_hal::CameraFrame {
        let mut gray = GrayFrame::filled(320, 320, 40);
        if let Some((fx, fy)) = cell {
            for y in fy * 40 + 5..fy * 40 + 35 {
                for x in fx * 40 + 5..fx * 40 + 35 {
                    gray.pixels[y * 320 + x] = 220;
                }
            }
        }
        gray.to_camera_frame()
    }

    fn observer(cam: &SimCamera, with_calibration: bool) -> BoardObserver {
        let mut vision = VisionConfig::default();
        if with_calibration {
            vision.board_pose.homography = Some(Homography::identity());
        }
        let rig = CameraRig::new(vec![Box::new(cam.clone())]);
        let mut obs = BoardObserver::new(rig, Box::new(NoMarkers), &vision);
        obs.open().unwrap();
        obs
    }

    #[test]
    fn first_observation_captures_background() {
        let cam = SimCamera::new("board", frame_with(None));
        let mut obs = observer(&cam, true);
        let map = obs.observe().unwrap();
        assert_eq!(map.cells.len(), 64);
        assert!(map.cells.values().all(|occupied| !occupied));
        assert_eq!(map.confidence, 1.0);
        assert!(obs.last_frame().is_some());

        cam.set_frame(frame_with(Some((4, 1))));
        let map = obs.observe().unwrap();
        assert_eq!(map.is_occupied("e2"), Some(true));
        assert_eq!(map.is_occupied("e3"), Some(false));
    }

    #[test]
    fn without_pose_confidence_is_zero() {
        let cam = SimCamera::new("board", frame_with(None));
        let mut obs = observer(&cam, false);
        let map = obs.observe().unwrap();
        assert!(map.cells.is_empty());
        assert_eq!(map.confidence, 0.0);
        assert!(obs.pose().is_none());
    }

    #[test]
    fn capture_failure_is_a_fault() {
        let cam = SimCamera::new("board", frame_with(None));
        let mut obs = observer(&cam, true);
        cam.set_fail_capture(true);
        assert!(matches!(obs.observe(), Err(Fault::Camera(_))));
    }

    #[test]
    fn short_frame_buffer_is_a_fault() {
        let cam = SimCamera::new("board", robotik_hal::CameraFrame::gray(320, 320, vec![40; 100]));
        let mut obs = observer(&cam, true);
        assert!(matches!(obs.observe(), Err(Fault::Camera(_))));
        assert!(obs.last_frame().is_none());

        cam.set_frame(frame_with(None));
        assert_eq!(obs.observe().unwrap().cells.len(), 64);
    }

    #[test]
    fn reset_background_recaptures() {
        let cam = SimCamera::new("board", frame_with(Some((0, 0))));
        let mut obs = observer(&cam, true);
        obs.observe().unwrap();
        cam.set_frame(frame_with(None));
        assert_eq!(obs.observe().unwrap().is_occupied("a1"), Some(true));
        obs.reset_background(None);
        assert_eq!(obs.observe().unwrap().is_occupied("a1"), Some(false));
    }
}
