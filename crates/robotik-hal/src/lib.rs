//! Hardware abstraction for the Robotik edge: the GRBL/FluidNC motion
//! controller driver, its transport, cameras and the gripper.
//!
//! The [`sim`] module provides scripted stand-ins so the full skill stack can
//! run in CI without hardware.

pub mod camera;
pub mod driver;
pub mod gripper;
pub mod link;
pub mod sim;

pub use camera::{BOARD_CAMERA, Camera, CameraFrame, CameraRig, PixelFormat, SnapshotCamera};
pub use driver::MotionDriver;
pub use gripper::Gripper;
pub use link::{Link, SerialLink};
pub use sim::{SimCamera, SimLink};
