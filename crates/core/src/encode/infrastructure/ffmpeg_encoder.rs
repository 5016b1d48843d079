use std::fs;
use std::path::{Path, PathBuf};

use crate::encode::domain::video_encoder::{EncodeError, VideoEncoder};
use crate::shared::pixel_buffer::PixelBuffer;
use crate::shared::recorder_config::{CodecProfile, RecorderConfig};
use crate::shared::timestamp::{Timestamp, DEFAULT_TIMESCALE};

const DEFAULT_FPS: u32 = 30;

/// Encoder backend driven by ffmpeg-next.
///
/// Presentation times use a 1/600 time base so `Timestamp` values map to
/// pts without rounding at the common frame rates; the muxer rescales to
/// the stream time base on write.
pub struct FfmpegEncoder {
    output_path: Option<PathBuf>,
    octx: Option<ffmpeg_next::format::context::Output>,
    encoder: Option<ffmpeg_next::codec::encoder::video::Encoder>,
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    width: u32,
    height: u32,
    writing: bool,
    clock_zero: Option<Timestamp>,
    last_pts: Option<i64>,
    frame_count: u64,
    video_stream_index: usize,
}

// Safety: FfmpegEncoder is only used from a single thread at a time (the
// session's writer worker). The raw pointers inside ffmpeg types are not
// shared across threads.
unsafe impl Send for FfmpegEncoder {}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self {
            output_path: None,
            octx: None,
            encoder: None,
            scaler: None,
            width: 0,
            height: 0,
            writing: false,
            clock_zero: None,
            last_pts: None,
            frame_count: 0,
            video_stream_index: 0,
        }
    }

    fn codec_id(profile: CodecProfile) -> ffmpeg_next::codec::Id {
        match profile {
            CodecProfile::H264Sdr => ffmpeg_next::codec::Id::H264,
            CodecProfile::HevcHdr => ffmpeg_next::codec::Id::HEVC,
        }
    }

    /// Drains every packet the encoder has ready into the output.
    fn write_packets(&mut self) -> Result<(), EncodeError> {
        let encoder = self.encoder.as_mut().ok_or(EncodeError::NotWriting)?;
        let octx = self.octx.as_mut().ok_or(EncodeError::NotWriting)?;

        let ost_time_base = octx
            .stream(self.video_stream_index)
            .ok_or(EncodeError::Unknown)?
            .time_base();

        let mut encoded = ffmpeg_next::Packet::empty();
        while encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(self.video_stream_index);
            encoded.rescale_ts(ffmpeg_next::Rational(1, DEFAULT_TIMESCALE), ost_time_base);
            encoded
                .write_interleaved(octx)
                .map_err(|e| EncodeError::EncodeFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn open(&mut self, path: &Path, config: &RecorderConfig) -> Result<(), EncodeError> {
        ffmpeg_next::init().map_err(|e| EncodeError::CreateFailed(e.to_string()))?;

        // A stale file at the destination must go; failing to remove it
        // is a hard error, not something to write around.
        if path.exists() {
            fs::remove_file(path).map_err(|e| {
                EncodeError::CreateFailed(format!(
                    "cannot remove existing file {}: {e}",
                    path.display()
                ))
            })?;
        }

        self.width = config.width;
        self.height = config.height;
        self.output_path = Some(path.to_path_buf());

        let mut octx = ffmpeg_next::format::output(path)
            .map_err(|e| EncodeError::CreateFailed(e.to_string()))?;

        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        let codec_id = Self::codec_id(config.codec);
        let codec = ffmpeg_next::encoder::find(codec_id).ok_or_else(|| {
            EncodeError::CannotAddInput(format!("no encoder for {codec_id:?}"))
        })?;

        let mut ost = octx
            .add_stream(Some(codec))
            .map_err(|e| EncodeError::CannotAddInput(e.to_string()))?;

        let mut encoder_ctx = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| EncodeError::CannotAddInput(e.to_string()))?;

        encoder_ctx.set_width(config.width);
        encoder_ctx.set_height(config.height);
        encoder_ctx.set_format(ffmpeg_next::format::Pixel::YUV420P);
        encoder_ctx.set_time_base(ffmpeg_next::Rational(1, DEFAULT_TIMESCALE));

        let fps = config.expected_fps.unwrap_or(DEFAULT_FPS).max(1);
        encoder_ctx.set_frame_rate(Some(ffmpeg_next::Rational(fps as i32, 1)));

        if config.codec == CodecProfile::HevcHdr {
            encoder_ctx.set_colorspace(ffmpeg_next::color::Space::BT2020NCL);
            encoder_ctx.set_color_range(ffmpeg_next::color::Range::MPEG);
        }

        if global_header {
            encoder_ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder_ctx
            .open_with(ffmpeg_next::Dictionary::new())
            .map_err(|e| EncodeError::CreateFailed(format!("cannot open {codec_id:?}: {e}")))?;
        ost.set_parameters(&encoder);

        self.video_stream_index = 0; // first stream

        octx.write_header()
            .map_err(|e| EncodeError::CreateFailed(e.to_string()))?;

        // BGRA pixel buffers -> planar YUV for the encoder
        let scaler = ffmpeg_next::software::scaling::Context::get(
            ffmpeg_next::format::Pixel::BGRA,
            config.width,
            config.height,
            ffmpeg_next::format::Pixel::YUV420P,
            config.width,
            config.height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| EncodeError::CreateFailed(e.to_string()))?;

        self.octx = Some(octx);
        self.encoder = Some(encoder);
        self.scaler = Some(scaler);
        self.writing = false;
        self.clock_zero = None;
        self.last_pts = None;
        self.frame_count = 0;

        Ok(())
    }

    fn begin_writing(&mut self) -> Result<(), EncodeError> {
        if self.octx.is_none() {
            return Err(EncodeError::WriterRejected(
                "begin_writing before open".to_string(),
            ));
        }
        if self.writing {
            return Err(EncodeError::AlreadyWriting);
        }
        self.writing = true;
        Ok(())
    }

    fn start_session_clock(&mut self, at: Timestamp) -> Result<(), EncodeError> {
        if !self.writing {
            return Err(EncodeError::NotWriting);
        }
        self.clock_zero = Some(at);
        Ok(())
    }

    fn append(&mut self, frame: &PixelBuffer, at: Timestamp) -> Result<(), EncodeError> {
        if !self.writing {
            return Err(EncodeError::NotWriting);
        }
        if frame.width() != self.width || frame.height() != self.height {
            return Err(EncodeError::EncodeFailed(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let zero = *self.clock_zero.get_or_insert(at);
        let mut pts = at.since(zero).rescaled(DEFAULT_TIMESCALE).value();

        // Encoders want strictly increasing pts; a clamped (equal)
        // timestamp is nudged forward by one tick.
        if let Some(last) = self.last_pts {
            if pts <= last {
                log::debug!("pts {pts} not after {last}, nudging");
                pts = last + 1;
            }
        }

        let mut bgra_frame = ffmpeg_next::util::frame::video::Video::new(
            ffmpeg_next::format::Pixel::BGRA,
            self.width,
            self.height,
        );

        // Copy pixel data, respecting the frame's stride
        let stride = bgra_frame.stride(0);
        let data = bgra_frame.data_mut(0);
        let row_bytes = frame.stride();
        for row in 0..self.height {
            let dst_start = row as usize * stride;
            data[dst_start..dst_start + row_bytes].copy_from_slice(frame.row(row));
        }

        let scaler = self.scaler.as_mut().ok_or(EncodeError::NotWriting)?;
        let mut yuv_frame = ffmpeg_next::util::frame::video::Video::empty();
        scaler
            .run(&bgra_frame, &mut yuv_frame)
            .map_err(|e| EncodeError::EncodeFailed(e.to_string()))?;
        yuv_frame.set_pts(Some(pts));

        self.encoder
            .as_mut()
            .ok_or(EncodeError::NotWriting)?
            .send_frame(&yuv_frame)
            .map_err(|e| EncodeError::EncodeFailed(e.to_string()))?;

        self.write_packets()?;

        self.last_pts = Some(pts);
        self.frame_count += 1;
        Ok(())
    }

    fn end_session(&mut self, at: Timestamp) -> Result<(), EncodeError> {
        if !self.writing {
            return Err(EncodeError::NotWriting);
        }
        // Duration falls out of the last pts; nothing to tell ffmpeg here.
        log::debug!("session range closed at {:.3}s", at.seconds());
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf, EncodeError> {
        if !self.writing {
            return Err(EncodeError::NotWriting);
        }

        self.encoder
            .as_mut()
            .ok_or(EncodeError::NotWriting)?
            .send_eof()
            .map_err(|e| EncodeError::EncodeFailed(e.to_string()))?;
        self.write_packets()?;

        self.octx
            .as_mut()
            .ok_or(EncodeError::NotWriting)?
            .write_trailer()
            .map_err(|e| EncodeError::EncodeFailed(e.to_string()))?;

        let path = self.output_path.take().ok_or(EncodeError::Unknown)?;
        log::info!(
            "finished writing {} ({} frames)",
            path.display(),
            self.frame_count
        );

        self.octx = None;
        self.encoder = None;
        self.scaler = None;
        self.writing = false;

        Ok(path)
    }
}
