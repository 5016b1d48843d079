use std::sync::Arc;

use crate::convert::domain::pixel_buffer_converter::{ConvertError, PixelBufferConverter};
use crate::shared::pixel_buffer::{PixelBuffer, BYTES_PER_PIXEL};

use super::gpu_context::{GpuContext, TEXTURE_FORMAT};

/// GPU texture to pixel buffer converter backed by wgpu.
///
/// `configure` allocates one readback buffer with 256-byte-aligned rows
/// and one destination `PixelBuffer`; `convert` reuses both, so steady
/// state does no allocation. Each conversion is one copy command plus a
/// blocking map wait, so the buffer handed onward is always fully
/// populated.
pub struct WgpuConverter {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    readback: Option<Readback>,
}

struct Readback {
    buffer: wgpu::Buffer,
    padded_bytes_per_row: u32,
    pixel_buffer: PixelBuffer,
}

impl WgpuConverter {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            readback: None,
        }
    }

    pub fn from_context(ctx: &GpuContext) -> Self {
        Self::new(ctx.device.clone(), ctx.queue.clone())
    }
}

/// Rows in a mappable copy destination must be aligned to
/// `COPY_BYTES_PER_ROW_ALIGNMENT`.
fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL as u32;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

impl PixelBufferConverter<wgpu::Texture> for WgpuConverter {
    fn configure(&mut self, width: u32, height: u32) -> Result<(), ConvertError> {
        if width == 0 || height == 0 {
            return Err(ConvertError::ConversionFailed(format!(
                "invalid destination size {width}x{height}"
            )));
        }

        let padded = padded_bytes_per_row(width);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame-readback"),
            size: padded as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        self.readback = Some(Readback {
            buffer,
            padded_bytes_per_row: padded,
            pixel_buffer: PixelBuffer::new(width, height),
        });

        Ok(())
    }

    fn convert(&mut self, texture: &wgpu::Texture) -> Result<&PixelBuffer, ConvertError> {
        let readback = self.readback.as_mut().ok_or(ConvertError::NotConfigured)?;

        let width = readback.pixel_buffer.width();
        let height = readback.pixel_buffer.height();

        if texture.width() != width || texture.height() != height {
            return Err(ConvertError::SizeMismatch {
                expected_width: width,
                expected_height: height,
                actual_width: texture.width(),
                actual_height: texture.height(),
            });
        }
        if texture.format() != TEXTURE_FORMAT {
            return Err(ConvertError::ConversionFailed(format!(
                "unsupported texture format {:?}, expected {:?}",
                texture.format(),
                TEXTURE_FORMAT
            )));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-copy"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(readback.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        // Block until the copy has landed; the caller hands the pixel
        // buffer straight to the encoder.
        let slice = readback.buffer.slice(..);
        let (map_tx, map_rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = map_tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        match map_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ConvertError::ConversionFailed(format!(
                    "buffer map failed: {e}"
                )))
            }
            Err(_) => {
                return Err(ConvertError::ConversionFailed(
                    "buffer map callback dropped".to_string(),
                ))
            }
        }

        {
            let mapped = slice.get_mapped_range();
            let padded = readback.padded_bytes_per_row as usize;
            let row_bytes = readback.pixel_buffer.stride();
            for y in 0..height {
                let src_start = y as usize * padded;
                readback
                    .pixel_buffer
                    .row_mut(y)
                    .copy_from_slice(&mapped[src_start..src_start + row_bytes]);
            }
        }
        readback.buffer.unmap();

        Ok(&readback.pixel_buffer)
    }
}
