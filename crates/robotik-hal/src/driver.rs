//! [`MotionDriver`] – GRBL/FluidNC line-protocol client.
//!
//! | Command | Reply |
//! |---|---|
//! | `?` | one status line, no `ok` |
//! | `$X` (unlock), `$H` (home), G-code | zero or more lines, then `ok` / `error:N` / `ALARM:N` |
//! | `0x18` (soft reset) | none awaited |
//!
//! Every acknowledgement wait is bounded by the configured deadline and turns
//! into [`Fault::Timeout`] instead of blocking the caller forever.

use std::time::{Duration, Instant};

use robotik_types::Fault;
use tracing::{debug, info, instrument, warn};

use crate::link::Link;

const RESET_BYTE: u8 = 0x18;

/// Client for a single motion controller reachable over a [`Link`].
pub struct MotionDriver {
    link: Box<dyn Link>,
    ack_timeout: Duration,
    settle: Duration,
}

impl MotionDriver {
    /// `ack_timeout` bounds every acknowledgement wait; `settle` is slept
    /// after opening the link, while the controller prints its banner.
    pub fn new(link: Box<dyn Link>, ack_timeout: Duration, settle: Duration) -> Self {
        Self {
            link,
            ack_timeout,
            settle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    /// Open the link, flush stale bytes and wait for the controller to settle.
    pub fn connect(&mut self) -> Result<(), Fault> {
        self.link.open()?;
        self.link.clear_buffers()?;
        std::thread::sleep(self.settle);
        info!("motion controller connected");
        Ok(())
    }

    /// Close the link. Idempotent.
    pub fn disconnect(&mut self) {
        if self.link.is_open() {
            self.link.close();
            info!("motion controller disconnected");
        }
    }

    /// Write `cmd` followed by a newline.
    ///
    /// With `wait_ok` the call blocks until the controller acknowledges and
    /// returns every line received up to and including the `ok`.
    ///
    /// # Errors
    ///
    /// * [`Fault::NotConnected`] if [`connect`][Self::connect] was not called.
    /// * [`Fault::Alarm`] / [`Fault::Protocol`] carrying the raw reply line.
    /// * [`Fault::Timeout`] if no terminal reply arrives before the deadline.
    #[instrument(skip(self), level = "debug")]
    pub fn send_line(&mut self, cmd: &str, wait_ok: bool) -> Result<Vec<String>, Fault> {
        if !self.link.is_open() {
            return Err(Fault::NotConnected);
        }
        let line = format!("{}\n", cmd.trim());
        self.link.write_bytes(line.as_bytes())?;
        if !wait_ok {
            return Ok(Vec::new());
        }
        self.read_until_ok()
    }

    fn read_until_ok(&mut self) -> Result<Vec<String>, Fault> {
        let deadline = Instant::now() + self.ack_timeout;
        let mut lines = Vec::new();
        while Instant::now() < deadline {
            let Some(raw) = self.link.read_line()? else {
                continue;
            };
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let lower = line.to_ascii_lowercase();
            debug!(reply = line, "controller reply");
            if lower.starts_with("alarm") {
                warn!(reply = line, "controller raised alarm");
                return Err(Fault::Alarm(line.to_string()));
            }
            if lower.starts_with("error") {
                return Err(Fault::Protocol(line.to_string()));
            }
            lines.push(line.to_string());
            if lower.starts_with("ok") {
                return Ok(lines);
            }
        }
        warn!(timeout_ms = self.ack_timeout.as_millis() as u64, "acknowledgement deadline exceeded");
        Err(Fault::Timeout)
    }

    /// Send the bare `?` status query and return the raw report line,
    /// e.g. `<Idle|MPos:0.000,0.000,0.000|FS:0,0>`.
    pub fn poll_status(&mut self) -> Result<String, Fault> {
        if !self.link.is_open() {
            return Err(Fault::NotConnected);
        }
        self.link.write_bytes(b"?")?;
        let deadline = Instant::now() + self.ack_timeout;
        while Instant::now() < deadline {
            if let Some(line) = self.link.read_line()? {
                let line = line.trim();
                if !line.is_empty() {
                    return Ok(line.to_string());
                }
            }
        }
        Err(Fault::Timeout)
    }

    /// Clear an alarm lock (`$X`).
    pub fn unlock(&mut self) -> Result<Vec<String>, Fault> {
        info!("unlocking controller");
        self.send_line("$X", true)
    }

    /// Run the homing cycle (`$H`).
    pub fn home(&mut self) -> Result<Vec<String>, Fault> {
        info!("homing");
        self.send_line("$H", true)
    }

    /// Send the soft-reset byte. No reply is awaited; a no-op when
    /// disconnected.
    pub fn reset(&mut self) -> Result<(), Fault> {
        if !self.link.is_open() {
            return Ok(());
        }
        warn!("sending soft reset");
        self.link.write_bytes(&[RESET_BYTE])
    }
}

impl Drop for MotionDriver {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimLink;

    fn driver(link: &SimLink) -> MotionDriver {
        MotionDriver::new(
            Box::new(link.clone()),
            Duration::from_millis(50),
            Duration::ZERO,
        )
    }

    #[test]
    fn send_before_connect_is_not_connected() {
        let link = SimLink::new();
        let mut d = driver(&link);
        assert_eq!(d.send_line("G0 Z10", true), Err(Fault::NotConnected));
        assert_eq!(d.poll_status(), Err(Fault::NotConnected));
    }

    #[test]
    fn ok_returns_accumulated_lines() {
        let link = SimLink::new();
        link.script_reply(&["[MSG:homing]", "ok"]);
        let mut d = driver(&link);
        d.connect().unwrap();
        let lines = d.send_line("  $H  ", true).unwrap();
        assert_eq!(lines, vec!["[MSG:homing]".to_string(), "ok".to_string()]);
        assert_eq!(link.written(), vec!["$H".to_string()]);
    }

    #[test]
    fn alarm_and_error_map_to_faults() {
        let link = SimLink::new();
        link.script_reply(&["ALARM:1"]);
        link.script_reply(&["error:22"]);
        let mut d = driver(&link);
        d.connect().unwrap();
        assert_eq!(d.send_line("G0 X1", true), Err(Fault::Alarm("ALARM:1".into())));
        assert_eq!(d.send_line("G0 X2", true), Err(Fault::Protocol("error:22".into())));
    }

    #[test]
    fn silent_controller_times_out() {
        let link = SimLink::new();
        link.set_silent(true);
        let mut d = driver(&link);
        d.connect().unwrap();
        let started = Instant::now();
        assert_eq!(d.send_line("G0 X1", true), Err(Fault::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn no_wait_returns_immediately() {
        let link = SimLink::new();
        link.set_silent(true);
        let mut d = driver(&link);
        d.connect().unwrap();
        assert_eq!(d.send_line("G0 X1", false), Ok(Vec::new()));
    }

    #[test]
    fn status_poll_returns_raw_line() {
        let link = SimLink::new();
        let mut d = driver(&link);
        d.connect().unwrap();
        let status = d.poll_status().unwrap();
        assert!(status.starts_with("<Idle"));
    }

    #[test]
    fn reset_and_disconnect_are_safe_when_closed() {
        let link = SimLink::new();
        let mut d = driver(&link);
        assert_eq!(d.reset(), Ok(()));
        d.disconnect();
        d.disconnect();
        assert!(link.written().is_empty());
    }

    #[test]
    fn unlock_and_reset_write_expected_bytes() {
        let link = SimLink::new();
        let mut d = driver(&link);
        d.connect().unwrap();
        d.unlock().unwrap();
        d.reset().unwrap();
        assert_eq!(link.written(), vec!["$X".to_string(), "\u{18}".to_string()]);
    }
}
