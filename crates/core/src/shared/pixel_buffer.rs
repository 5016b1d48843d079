/// A CPU-visible image buffer in the layout the encoder accepts:
/// tightly packed BGRA bytes in row-major order.
///
/// The conversion path owns exactly one instance and overwrites its
/// contents for every frame; cloning happens only at the encoder
/// handoff boundary.
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

pub const BYTES_PER_PIXEL: usize = 4;

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
            width,
            height,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row (rows are tightly packed).
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// One row of pixels as a byte slice.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride();
        &self.data[start..start + self.stride()]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &mut self.data[start..start + stride]
    }
}
