//! Camera abstraction, frames and the edge's camera rig.

use std::path::PathBuf;

use robotik_types::Fault;
use tracing::{info, warn};

/// Camera name that marks the board-facing camera in a rig.
pub const BOARD_CAMERA: &str = "board";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
        }
    }
}

/// A raw image frame returned by a camera driver.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Row-major pixel data, `width * height * bytes_per_pixel` bytes.
    pub data: Vec<u8>,
}

impl CameraFrame {
    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Gray8,
            data,
        }
    }

    /// Luma plane using BT.601 weights.
    pub fn luma(&self) -> Vec<u8> {
        let weigh = |r: u8, g: u8, b: u8| {
            (0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)).round() as u8
        };
        match self.format {
            PixelFormat::Gray8 => self.data.clone(),
            PixelFormat::Rgb24 => self
                .data
                .chunks_exact(3)
                .map(|p| weigh(p[0], p[1], p[2]))
                .collect(),
            PixelFormat::Bgr24 => self
                .data
                .chunks_exact(3)
                .map(|p| weigh(p[2], p[1], p[0]))
                .collect(),
        }
    }

    /// Encode as binary greyscale PGM (`P5`).
    pub fn to_pgm(&self) -> Vec<u8> {
        let mut out = format!("P5\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend(self.luma());
        out
    }

    /// Decode a binary greyscale PGM (`P5`, maxval ≤ 255).
    pub fn from_pgm(bytes: &[u8]) -> Result<Self, Fault> {
        let bad = |why: &str| Fault::Camera(format!("malformed PGM: {why}"));
        let mut pos = 0;
        let mut fields = [0u32; 3];
        if bytes.get(..2) != Some(b"P5".as_slice()) {
            return Err(bad("missing P5 magic"));
        }
        pos += 2;
        for field in fields.iter_mut() {
            // Skip whitespace and comment lines between header tokens.
            loop {
                match bytes.get(pos) {
                    Some(b) if b.is_ascii_whitespace() => pos += 1,
                    Some(b'#') => {
                        while bytes.get(pos).is_some_and(|b| *b != b'\n') {
                            pos += 1;
                        }
                    }
                    _ => break,
                }
            }
            let start = pos;
            while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
                pos += 1;
            }
            *field = std::str::from_utf8(&bytes[start..pos])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad("bad header number"))?;
        }
        let [width, height, maxval] = fields;
        if maxval == 0 || maxval > 255 {
            return Err(bad("only 8-bit images are supported"));
        }
        // Exactly one whitespace byte separates header and raster.
        pos += 1;
        let len = width as usize * height as usize;
        let data = bytes
            .get(pos..pos + len)
            .ok_or_else(|| bad("truncated raster"))?
            .to_vec();
        Ok(Self::gray(width, height, data))
    }
}

/// A camera or image-capture device.
pub trait Camera: Send {
    /// Stable identifier, e.g. `"board"`.
    fn id(&self) -> &str;

    fn open(&mut self) -> Result<(), Fault>;

    /// Capture the next frame. There is no deadline on this call.
    fn capture(&mut self) -> Result<CameraFrame, Fault>;

    fn close(&mut self);
}

/// Reads the latest snapshot that an external frame grabber keeps writing
/// to `path` as a binary PGM file, e.g.
/// `ffmpeg -f v4l2 -i /dev/video0 -pix_fmt gray -update 1 /dev/shm/board.pgm`.
pub struct SnapshotCamera {
    id: String,
    path: PathBuf,
    opened: bool,
}

impl SnapshotCamera {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            opened: false,
        }
    }
}

impl Camera for SnapshotCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&mut self) -> Result<(), Fault> {
        std::fs::metadata(&self.path)
            .map_err(|e| Fault::Camera(format!("{}: {}: {e}", self.id, self.path.display())))?;
        self.opened = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<CameraFrame, Fault> {
        if !self.opened {
            return Err(Fault::Camera(format!("{}: not opened", self.id)));
        }
        let bytes = std::fs::read(&self.path)
            .map_err(|e| Fault::Camera(format!("{}: {e}", self.id)))?;
        CameraFrame::from_pgm(&bytes)
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

/// The set of cameras owned by the edge for its whole lifetime.
#[derive(Default)]
pub struct CameraRig {
    cameras: Vec<Box<dyn Camera>>,
}

impl CameraRig {
    pub fn new(cameras: Vec<Box<dyn Camera>>) -> Self {
        Self { cameras }
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Open every camera. All-or-nothing: on the first failure the cameras
    /// opened so far are closed again and the error is returned.
    pub fn open_all(&mut self) -> Result<(), Fault> {
        for idx in 0..self.cameras.len() {
            if let Err(e) = self.cameras[idx].open() {
                warn!(camera = self.cameras[idx].id(), error = %e, "camera failed to open");
                for cam in &mut self.cameras[..idx] {
                    cam.close();
                }
                return Err(e);
            }
            info!(camera = self.cameras[idx].id(), "camera opened");
        }
        Ok(())
    }

    pub fn close_all(&mut self) {
        for cam in &mut self.cameras {
            cam.close();
        }
    }

    /// One frame from every camera, in rig order.
    pub fn read_all(&mut self) -> Result<Vec<(String, CameraFrame)>, Fault> {
        self.cameras
            .iter_mut()
            .map(|cam| Ok((cam.id().to_string(), cam.capture()?)))
            .collect()
    }

    /// Frame from the `board` camera, or from the first camera when none is
    /// named `board`.
    pub fn read_board(&mut self) -> Result<CameraFrame, Fault> {
        let mut frames = self.read_all()?;
        let idx = frames
            .iter()
            .position(|(name, _)| name == BOARD_CAMERA)
            .unwrap_or(0);
        if frames.is_empty() {
            return Err(Fault::Camera("no cameras configured".to_string()));
        }
        Ok(frames.swap_remove(idx).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCamera;

    fn frame(value: u8) -> CameraFrame {
        CameraFrame::gray(2, 2, vec![value; 4])
    }

    #[test]
    fn luma_weights_bgr() {
        let f = CameraFrame {
            width: 1,
            height: 1,
            format: PixelFormat::Bgr24,
            data: vec![0, 0, 255],
        };
        assert_eq!(f.luma(), vec![76]);
    }

    #[test]
    fn pgm_roundtrip_with_comment() {
        let f = CameraFrame::gray(3, 2, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(CameraFrame::from_pgm(&f.to_pgm()).unwrap(), f);
        let commented = b"P5\n# grabber\n2 1\n255\n\x07\x08";
        assert_eq!(CameraFrame::from_pgm(commented).unwrap().data, vec![7, 8]);
        assert!(CameraFrame::from_pgm(b"P6\n1 1\n255\n\0\0\0").is_err());
        assert!(CameraFrame::from_pgm(b"P5\n4 4\n255\n\0").is_err());
    }

    #[test]
    fn snapshot_camera_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.pgm");
        std::fs::write(&path, frame(9).to_pgm()).unwrap();
        let mut cam = SnapshotCamera::new("board", &path);
        assert!(cam.capture().is_err());
        cam.open().unwrap();
        assert_eq!(cam.capture().unwrap().data, vec![9; 4]);

        let mut missing = SnapshotCamera::new("side", dir.path().join("none.pgm"));
        assert!(missing.open().is_err());
    }

    #[test]
    fn open_all_is_all_or_nothing() {
        let a = SimCamera::new("board", frame(1));
        let b = SimCamera::new("side", frame(2));
        b.set_fail_open(true);
        let mut rig = CameraRig::new(vec![Box::new(a.clone()), Box::new(b.clone())]);
        assert!(rig.open_all().is_err());
        assert!(!a.is_opened());
        b.set_fail_open(false);
        rig.open_all().unwrap();
        assert!(a.is_opened() && b.is_opened());
        rig.close_all();
        assert!(!a.is_opened());
    }

    #[test]
    fn board_camera_preferred() {
        let side = SimCamera::new("side", frame(1));
        let board = SimCamera::new("board", frame(2));
        let mut rig = CameraRig::new(vec![Box::new(side), Box::new(board)]);
        rig.open_all().unwrap();
        assert_eq!(rig.read_board().unwrap().data, vec![2; 4]);
        assert_eq!(rig.read_all().unwrap().len(), 2);
    }

    #[test]
    fn empty_rig_has_no_board_frame() {
        let mut rig = CameraRig::default();
        assert!(rig.read_board().is_err());
    }
}
