//! Typed edge configuration (`edge.toml`).
//!
//! Every section has named defaults matching the stock rig, unknown keys are
//! rejected at parse time, and [`EdgeConfig::validate`] checks value ranges
//! before anything touches hardware.

use std::path::PathBuf;

use robotik_kernel::WorkspaceBounds;
use robotik_perception::{Homography, MarkerDictionary};
use robotik_types::{ConfigError, Square, ThetaClamps, default_theta_clamps};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EdgeConfig {
    pub edge: EdgeSection,
    pub serial: SerialConfig,
    pub cameras: CamerasConfig,
    pub vision: VisionConfig,
    pub skills: SkillsConfig,
    pub safety: SafetyConfig,
    pub recovery: RecoveryConfig,
    pub agent: AgentClientConfig,
    pub gripper: GripperConfig,
    pub calibration: CalibrationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EdgeSection {
    pub trial_log: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ring_dir: Option<PathBuf>,
    pub image_ring_max: usize,
    /// Square used to build the context of agent-driven cycles.
    pub default_square: String,
}

impl Default for EdgeSection {
    fn default() -> Self {
        Self {
            trial_log: PathBuf::from("logs/trials.jsonl"),
            image_ring_dir: Some(PathBuf::from("logs/images")),
            image_ring_max: 50,
            default_square: "a2".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    /// Acknowledgement deadline per command, in seconds.
    pub timeout_s: f64,
    pub settle_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 115_200,
            timeout_s: 2.0,
            settle_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraDevice {
    pub name: String,
    /// Snapshot file kept fresh by the frame grabber.
    pub path: PathBuf,
    /// Expected frame size; diagnostics warn on mismatch.
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
}

fn default_camera_width() -> u32 {
    1280
}

fn default_camera_height() -> u32 {
    720
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CamerasConfig {
    pub devices: Vec<CameraDevice>,
}

impl Default for CamerasConfig {
    fn default() -> Self {
        Self {
            devices: vec![CameraDevice {
                name: "board".to_string(),
                path: PathBuf::from("/dev/shm/board.pgm"),
                width: default_camera_width(),
                height: default_camera_height(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisionConfig {
    pub aruco: ArucoConfig,
    pub board: BoardConfig,
    pub board_pose: BoardPoseConfig,
    pub occupancy: OccupancyConfig,
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArucoConfig {
    pub dict: MarkerDictionary,
    /// Corner markers in board order: (0,0), (B,0), (B,B), (0,B).
    pub ids: Vec<u32>,
    pub marker_length_mm: f64,
}

impl Default for ArucoConfig {
    fn default() -> Self {
        Self {
            dict: MarkerDictionary::Dict4x4_50,
            ids: vec![0, 1, 2, 3],
            marker_length_mm: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    pub square_size_mm: f64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            square_size_mm: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardPoseConfig {
    /// Calibrated image→board homography used when markers are not visible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homography: Option<Homography>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OccupancyConfig {
    pub threshold: f64,
    pub min_confidence: f64,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            threshold: 18.0,
            min_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    pub retries: u32,
    pub delay_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SkillsConfig {
    pub safe_z_mm: f64,
    pub pick_z_mm: f64,
    pub place_z_mm: f64,
    /// Feedrate for moves that are not theta-driven (reset, park).
    pub feedrate_mm_min: f64,
    pub graveyard_square: String,
    pub park_xy_mm: [f64; 2],
    pub clamps: ThetaClamps,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            safe_z_mm: 80.0,
            pick_z_mm: 5.0,
            place_z_mm: 6.0,
            feedrate_mm_min: 1500.0,
            graveyard_square: "h8".to_string(),
            park_xy_mm: [0.0, 0.0],
            clamps: default_theta_clamps(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetyConfig {
    pub workspace: WorkspaceBounds,
    pub max_feedrate_mm_min: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceBounds::default(),
            max_feedrate_mm_min: 3000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Extra attempts for retryable failures.
    pub retries: u32,
    pub unlock_on_alarm: bool,
    pub home_on_unlock: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            unlock_on_alarm: true,
            home_on_unlock: false,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentClientConfig {
    pub enabled: bool,
    pub base_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub psk: String,
    pub psk_header: String,
    pub timeout_s: f64,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://127.0.0.1:8000".to_string(),
            psk: String::new(),
            psk_header: "X-PSK".to_string(),
            timeout_s: 10.0,
        }
    }
}

impl std::fmt::Debug for AgentClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClientConfig")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("psk", if self.psk.is_empty() { &"<not set>" } else { &"<redacted>" })
            .field("psk_header", &self.psk_header)
            .field("timeout_s", &self.timeout_s)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GripperConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_cmd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationConfig {
    pub robot_board: RobotBoardCorners,
}

/// Robot XY (mm) of the four corner square centres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RobotBoardCorners {
    pub a1: [f64; 2],
    pub a8: [f64; 2],
    pub h1: [f64; 2],
    pub h8: [f64; 2],
}

impl Default for RobotBoardCorners {
    fn default() -> Self {
        Self {
            a1: [0.0, 0.0],
            a8: [0.0, 280.0],
            h1: [280.0, 0.0],
            h8: [280.0, 280.0],
        }
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive, got {value}")))
    }
}

fn square(field: &str, label: &str) -> Result<Square, ConfigError> {
    label
        .parse()
        .map_err(|e: robotik_types::SquareError| ConfigError::invalid(field, e.to_string()))
}

impl EdgeConfig {
    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        square("edge.default_square", &self.edge.default_square)?;
        square("skills.graveyard_square", &self.skills.graveyard_square)?;
        positive("serial.timeout_s", self.serial.timeout_s)?;
        if self.serial.baudrate == 0 {
            return Err(ConfigError::invalid("serial.baudrate", "must be non-zero"));
        }

        let ids = &self.vision.aruco.ids;
        let mut distinct = ids.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if ids.len() != 4 || distinct.len() != 4 {
            return Err(ConfigError::invalid(
                "vision.aruco.ids",
                "exactly four distinct marker ids are required",
            ));
        }
        positive("vision.board.square_size_mm", self.vision.board.square_size_mm)?;
        let occ = &self.vision.occupancy;
        if !(0.0..=1.0).contains(&occ.min_confidence) {
            return Err(ConfigError::invalid(
                "vision.occupancy.min_confidence",
                "must lie in [0, 1]",
            ));
        }
        if !occ.threshold.is_finite() || occ.threshold < 0.0 {
            return Err(ConfigError::invalid("vision.occupancy.threshold", "must be >= 0"));
        }
        if let Some(h) = &self.vision.board_pose.homography
            && h.inverse().is_none()
        {
            return Err(ConfigError::invalid(
                "vision.board_pose.homography",
                "matrix is singular",
            ));
        }

        for (field, bounds) in &self.skills.clamps {
            bounds.validate(&format!("skills.clamps.{field}"))?;
        }
        positive("skills.feedrate_mm_min", self.skills.feedrate_mm_min)?;
        positive("safety.max_feedrate_mm_min", self.safety.max_feedrate_mm_min)?;
        self.safety.workspace.validate()?;

        let names: Vec<&str> = self.cameras.devices.iter().map(|d| d.name.as_str()).collect();
        if names.iter().enumerate().any(|(i, n)| names[..i].contains(n)) {
            return Err(ConfigError::invalid("cameras.devices", "camera names must be unique"));
        }
        if self.agent.enabled {
            positive("agent.timeout_s", self.agent.timeout_s)?;
        }
        Ok(())
    }
}
