use thiserror::Error;

use crate::shared::pixel_buffer::PixelBuffer;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("converter not configured; call configure() before convert()")]
    NotConfigured,
    #[error("texture is {actual_width}x{actual_height} but converter was configured for {expected_width}x{expected_height}")]
    SizeMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("conversion failed: {0}")]
    ConversionFailed(String),
}

/// Converts one GPU-resident image into the encoder's pixel layout.
///
/// `T` is the source image type: a real GPU texture in production,
/// anything convenient in tests. Implementations keep one destination
/// `PixelBuffer` and overwrite it per call, so the returned borrow is
/// only valid until the next `convert`.
pub trait PixelBufferConverter<T>: Send {
    /// Prepares the reusable destination buffer. Must be called once
    /// before any conversion; the size is fixed for the session.
    fn configure(&mut self, width: u32, height: u32) -> Result<(), ConvertError>;

    /// Copies `texture` into the destination buffer and blocks until the
    /// copy has completed.
    fn convert(&mut self, texture: &T) -> Result<&PixelBuffer, ConvertError>;
}
