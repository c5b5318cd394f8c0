//! In-process simulated hardware for CI and tests.
//!
//! [`SimLink`] behaves like a GRBL controller that acknowledges every command
//! with `ok` unless a reply was scripted, and [`SimCamera`] serves frames that
//! a test can swap at runtime. Both are cheap to clone; clones share state,
//! so a test keeps one handle while the driver or rig owns the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use robotik_types::Fault;

use crate::camera::{Camera, CameraFrame};
use crate::link::Link;

const IDLE_STATUS: &str = "<Idle|MPos:0.000,0.000,0.000|FS:0,0>";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated controller link
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimLinkState {
    open: bool,
    fail_open: bool,
    silent: bool,
    status: Option<String>,
    written: Vec<String>,
    inbox: VecDeque<String>,
    scripted: VecDeque<Vec<String>>,
}

/// A scripted GRBL controller.
#[derive(Clone, Default)]
pub struct SimLink {
    state: Arc<Mutex<SimLinkState>>,
}

impl SimLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the reply lines for the next acknowledged command.
    pub fn script_reply(&self, lines: &[&str]) {
        lock(&self.state)
            .scripted
            .push_back(lines.iter().map(|l| l.to_string()).collect());
    }

    /// Never answer anything (simulates an unresponsive controller).
    pub fn set_silent(&self, silent: bool) {
        lock(&self.state).silent = silent;
    }

    pub fn set_fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn set_status(&self, status: &str) {
        lock(&self.state).status = Some(status.to_string());
    }

    /// Every command written so far, without terminators. The status query
    /// is excluded; the reset byte appears as `"\u{18}"`.
    pub fn written(&self) -> Vec<String> {
        lock(&self.state).written.clone()
    }

    /// Written `G0`/`G1` motion commands only.
    pub fn motion_commands(&self) -> Vec<String> {
        self.written()
            .into_iter()
            .filter(|c| c.starts_with("G0") || c.starts_with("G1"))
            .collect()
    }
}

impl Link for SimLink {
    fn open(&mut self) -> Result<(), Fault> {
        let mut s = lock(&self.state);
        if s.fail_open {
            return Err(Fault::Io("simulated port unavailable".to_string()));
        }
        s.open = true;
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.state).open = false;
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn clear_buffers(&mut self) -> Result<(), Fault> {
        lock(&self.state).inbox.clear();
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        let mut s = lock(&self.state);
        if !s.open {
            return Err(Fault::NotConnected);
        }
        if bytes == b"?" {
            if !s.silent {
                let status = s.status.clone().unwrap_or_else(|| IDLE_STATUS.to_string());
                s.inbox.push_back(status);
            }
            return Ok(());
        }
        let text = String::from_utf8_lossy(bytes);
        for cmd in text.lines().map(str::trim).filter(|c| !c.is_empty()) {
            s.written.push(cmd.to_string());
            if cmd == "\u{18}" || s.silent {
                continue;
            }
            let reply = s.scripted.pop_front().unwrap_or_else(|| vec!["ok".to_string()]);
            s.inbox.extend(reply);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, Fault> {
        let line = lock(&self.state).inbox.pop_front();
        if line.is_none() {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(line)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated camera
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimCameraState {
    frame: Option<CameraFrame>,
    fail_open: bool,
    fail_capture: bool,
    opened: bool,
    captures: usize,
}

/// A camera that returns whatever frame was last set.
#[derive(Clone)]
pub struct SimCamera {
    id: String,
    state: Arc<Mutex<SimCameraState>>,
}

impl SimCamera {
    pub fn new(id: impl Into<String>, frame: CameraFrame) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(SimCameraState {
                frame: Some(frame),
                ..SimCameraState::default()
            })),
        }
    }

    pub fn set_frame(&self, frame: CameraFrame) {
        lock(&self.state).frame = Some(frame);
    }

    pub fn set_fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn set_fail_capture(&self, fail: bool) {
        lock(&self.state).fail_capture = fail;
    }

    pub fn is_opened(&self) -> bool {
        lock(&self.state).opened
    }

    pub fn captures(&self) -> usize {
        lock(&self.state).captures
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&mut self) -> Result<(), Fault> {
        let mut s = lock(&self.state);
        if s.fail_open {
            return Err(Fault::Camera(format!("{}: simulated open failure", self.id)));
        }
        s.opened = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<CameraFrame, Fault> {
        let mut s = lock(&self.state);
        if s.fail_capture || !s.opened {
            return Err(Fault::Camera(format!("{}: frame read failed", self.id)));
        }
        s.captures += 1;
        s.frame
            .clone()
            .ok_or_else(|| Fault::Camera(format!("{}: no frame", self.id)))
    }

    fn close(&mut self) {
        lock(&self.state).opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_acks_by_default_and_honours_script() {
        let mut link = SimLink::new();
        link.open().unwrap();
        link.script_reply(&["error:9"]);
        link.write_bytes(b"G0 X1\nG0 X2\n").unwrap();
        assert_eq!(link.read_line().unwrap().as_deref(), Some("error:9"));
        assert_eq!(link.read_line().unwrap().as_deref(), Some("ok"));
        assert_eq!(link.read_line().unwrap(), None);
        assert_eq!(link.motion_commands().len(), 2);
    }

    #[test]
    fn closed_link_rejects_writes() {
        let mut link = SimLink::new();
        assert_eq!(link.write_bytes(b"G0\n"), Err(Fault::NotConnected));
    }

    #[test]
    fn camera_requires_open_and_counts_captures() {
        let cam = SimCamera::new("board", CameraFrame::gray(2, 2, vec![0; 4]));
        let mut boxed: Box<dyn Camera> = Box::new(cam.clone());
        assert!(boxed.capture().is_err());
        boxed.open().unwrap();
        assert!(cam.is_opened());
        boxed.capture().unwrap();
        assert_eq!(cam.captures(), 1);
        cam.set_fail_capture(true);
        assert!(boxed.capture().is_err());
    }
}
