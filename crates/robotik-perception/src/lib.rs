//! `robotik-perception` – board vision.
//!
//! Turns camera frames into the board-level facts the skills verify against.
//!
//! # Modules
//!
//! - [`homography`] – [`Homography`][homography::Homography]: 4-point planar
//!   projective transform with inverse.
//! - [`board_pose`] – [`detect_board_pose`][board_pose::detect_board_pose]:
//!   image↔board mapping from four corner fiducials.
//! - [`occupancy`] – [`OccupancyDetector`][occupancy::OccupancyDetector]:
//!   background-difference classification of all 64 cells.
//! - [`verifier`] – [`Verifier`][verifier::Verifier]: polls occupancy until a
//!   cell reaches the expected state.

pub mod board_pose;
pub mod frame;
pub mod homography;
pub mod occupancy;
pub mod verifier;

pub use board_pose::{
    BoardPose, FixedMarkers, MarkerDetection, MarkerDetector, MarkerDictionary, NoMarkers,
    detect_board_pose,
};
pub use frame::GrayFrame;
pub use homography::Homography;
pub use occupancy::{OccupancyDetector, OccupancyMap};
pub use verifier::{OccupancySource, Verifier};
