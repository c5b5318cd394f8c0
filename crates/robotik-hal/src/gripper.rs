//! End-effector gripper driven through the motion controller's G-code
//! outputs (e.g. `M62 P0` / `M63 P0` on FluidNC).

use robotik_types::Fault;
use tracing::debug;

use crate::driver::MotionDriver;

/// A two-state gripper. When disabled every actuation is a no-op, which
/// lets the skill pipeline run on rigs without an end effector.
#[derive(Debug, Clone, Default)]
pub struct Gripper {
    enabled: bool,
    open_cmd: Option<String>,
    close_cmd: Option<String>,
    closed: bool,
}

impl Gripper {
    pub fn new(enabled: bool, open_cmd: Option<String>, close_cmd: Option<String>) -> Self {
        Self {
            enabled,
            open_cmd,
            close_cmd,
            closed: false,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn open(&mut self, driver: &mut MotionDriver) -> Result<(), Fault> {
        self.actuate(driver, false)
    }

    pub fn close(&mut self, driver: &mut MotionDriver) -> Result<(), Fault> {
        self.actuate(driver, true)
    }

    fn actuate(&mut self, driver: &mut MotionDriver, close: bool) -> Result<(), Fault> {
        if self.enabled {
            let cmd = if close { &self.close_cmd } else { &self.open_cmd };
            if let Some(cmd) = cmd {
                driver.send_line(cmd, true)?;
            }
        }
        debug!(closed = close, enabled = self.enabled, "gripper actuated");
        self.closed = close;
        Ok(())
    }
}
