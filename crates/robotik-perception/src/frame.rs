use robotik_hal::CameraFrame;
use robotik_types::Fault;

/// Single-channel 8-bit image used by all perception stages.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl GrayFrame {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self::new(width, height, vec![value; width * height])
    }

    /// Grey view of a camera frame. A buffer that does not hold exactly
    /// `width * height` pixels is rejected.
    pub fn from_camera(frame: &CameraFrame) -> Result<Self, Fault> {
        let gray = Self::new(frame.width as usize, frame.height as usize, frame.luma());
        if !gray.is_complete() {
            return Err(Fault::Camera(format!(
                "frame buffer holds {} pixels, expected {}x{}",
                gray.pixels.len(),
                gray.width,
                gray.height
            )));
        }
        Ok(gray)
    }

    pub fn is_complete(&self) -> bool {
        self.width.checked_mul(self.height) == Some(self.pixels.len())
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }

    pub fn same_shape(&self, other: &GrayFrame) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn to_camera_frame(&self) -> CameraFrame {
        CameraFrame::gray(self.width as u32, self.height as u32, self.pixels.clone())
    }
}
