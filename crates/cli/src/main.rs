use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use gpurec_core::convert::infrastructure::gpu_context::GpuContext;
use gpurec_core::convert::infrastructure::wgpu_converter::WgpuConverter;
use gpurec_core::encode::infrastructure::ffmpeg_encoder::FfmpegEncoder;
use gpurec_core::encode::session::EncoderSession;
use gpurec_core::pump::frame_pump::FramePump;
use gpurec_core::pump::frame_source::FrameSource;
use gpurec_core::shared::recorder_config::{CodecProfile, RecorderConfig};
use gpurec_core::shared::timestamp::Timestamp;

/// Records a GPU-rendered test pattern to a video file.
#[derive(Parser)]
#[command(name = "gpurec")]
struct Cli {
    /// Output file. A fresh name under the platform videos directory is
    /// generated when omitted.
    output: Option<PathBuf>,

    /// Frame width in pixels.
    #[arg(long, default_value = "640")]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value = "360")]
    height: u32,

    /// Frame rate of the generated pattern.
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Number of frames to record.
    #[arg(long, default_value = "90")]
    frames: u64,

    /// Codec profile: h264 or hevc.
    #[arg(long, default_value = "h264")]
    codec: String,
}

/// Renders a moving gradient on the GPU, one texture per frame.
struct TestPatternSource {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    width: u32,
    height: u32,
    fps: u32,
    total: u64,
    n: u64,
}

impl TestPatternSource {
    fn pattern_bytes(&self, frame: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        let shift = (frame * 4) as u32;
        for y in 0..self.height {
            for x in 0..self.width {
                let b = ((x + shift) % 256) as u8;
                let g = (y % 256) as u8;
                let r = ((x ^ y) % 256) as u8;
                data.extend_from_slice(&[b, g, r, 255]);
            }
        }
        data
    }
}

impl FrameSource for TestPatternSource {
    type Texture = wgpu::Texture;

    fn start(&mut self) {}

    fn next_frame(&mut self) -> Option<(wgpu::Texture, Timestamp)> {
        if self.n >= self.total {
            return None;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pattern-frame"),
            size: wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8Unorm,
            usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let data = self.pattern_bytes(self.n);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );

        let at = Timestamp::from_frame_index(self.n, self.fps);
        self.n += 1;
        Some((texture, at))
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let codec = match cli.codec.as_str() {
        "h264" => CodecProfile::H264Sdr,
        "hevc" => CodecProfile::HevcHdr,
        other => return Err(format!("unknown codec '{other}' (use h264 or hevc)").into()),
    };

    let mut config = RecorderConfig::new(cli.width, cli.height)
        .with_expected_fps(cli.fps)
        .with_codec(codec);
    if let Some(output) = cli.output {
        config = config.with_output(output);
    }

    let ctx = GpuContext::new().ok_or("no GPU adapter available")?;

    let source = TestPatternSource {
        device: ctx.device.clone(),
        queue: ctx.queue.clone(),
        width: cli.width,
        height: cli.height,
        fps: cli.fps,
        total: cli.frames,
        n: 0,
    };
    let converter = WgpuConverter::from_context(&ctx);
    let session = EncoderSession::open(Box::new(FfmpegEncoder::new()), &config)?;

    log::info!(
        "recording {} frames at {} fps ({}x{})",
        cli.frames,
        cli.fps,
        cli.width,
        cli.height
    );

    let pump = FramePump::new(source, converter, session, &config)?;
    let path = pump.run()?;

    println!("Wrote {}", path.display());
    Ok(())
}
