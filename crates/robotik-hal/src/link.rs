//! Byte-level line channel to the motion controller.
//!
//! [`MotionDriver`][crate::driver::MotionDriver] speaks the GRBL line
//! protocol over any [`Link`]. [`SerialLink`] is the production transport;
//! [`SimLink`][crate::sim::SimLink] is a scripted stand-in for tests.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use robotik_types::Fault;
use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

/// A bidirectional, line-oriented byte channel.
pub trait Link: Send {
    /// Open the underlying channel. Opening an open link is a no-op.
    fn open(&mut self) -> Result<(), Fault>;

    /// Close the channel. Safe to call when already closed.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Discard anything buffered in either direction.
    fn clear_buffers(&mut self) -> Result<(), Fault>;

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Fault>;

    /// Return the next complete line without its terminator, or `None` when
    /// no full line arrived within the link's read timeout.
    fn read_line(&mut self) -> Result<Option<String>, Fault>;
}

/// A [`Link`] over a serial port (USB CDC or UART).
pub struct SerialLink {
    path: String,
    baudrate: u32,
    read_timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialLink {
    pub fn new(path: impl Into<String>, baudrate: u32, read_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baudrate,
            read_timeout,
            port: None,
            pending: Vec::new(),
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, Fault> {
        self.port.as_mut().ok_or(Fault::NotConnected)
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&raw).trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Link for SerialLink {
    fn open(&mut self) -> Result<(), Fault> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.path, self.baudrate)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| Fault::Io(format!("{}: {e}", self.path)))?;
        debug!(path = %self.path, baudrate = self.baudrate, "serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "serial port closed");
        }
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn clear_buffers(&mut self) -> Result<(), Fault> {
        self.pending.clear();
        self.port()?
            .clear(ClearBuffer::All)
            .map_err(|e| Fault::Io(e.to_string()))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        let port = self.port()?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| Fault::Io(e.to_string()))
    }

    fn read_line(&mut self) -> Result<Option<String>, Fault> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }
        let mut buf = [0u8; 256];
        let n = match self.port()?.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(Fault::Io(e.to_string())),
        };
        self.pending.extend_from_slice(&buf[..n]);
        Ok(self.take_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopened_serial_link_reports_not_connected() {
        let mut link = SerialLink::new("/dev/null-robotik", 115_200, Duration::from_millis(10));
        assert!(!link.is_open());
        assert_eq!(link.write_bytes(b"?"), Err(Fault::NotConnected));
        assert_eq!(link.read_line(), Err(Fault::NotConnected));
        link.close();
    }

    #[test]
    fn pending_bytes_split_into_lines() {
        let mut link = SerialLink::new("unused", 115_200, Duration::from_millis(10));
        link.pending.extend_from_slice(b"ok\r\nALARM:1\npart");
        assert_eq!(link.take_line().as_deref(), Some("ok"));
        assert_eq!(link.take_line().as_deref(), Some("ALARM:1"));
        assert_eq!(link.take_line(), None);
        assert_eq!(link.pending, b"part");
    }
}
