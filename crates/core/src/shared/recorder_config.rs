use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine a videos directory")]
    NoVideosDir,
    #[error("failed to create videos directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Codec and color profile for the output track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecProfile {
    /// H.264, standard dynamic range.
    H264Sdr,
    /// HEVC with BT.2020 color metadata.
    HevcHdr,
}

/// Everything a session needs to know up front: output geometry, codec
/// profile, advisory frame rate, and where the file goes.
///
/// Paths are explicit configuration; nothing here reads process-wide
/// temporary locations.
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub width: u32,
    pub height: u32,
    /// Advisory only, used for encoder tuning. Not a pacing source.
    pub expected_fps: Option<u32>,
    pub codec: CodecProfile,
    /// Exact destination. When `None` a fresh name is generated under
    /// `videos_dir`.
    pub output: Option<PathBuf>,
    /// Directory for generated output names. Falls back to the platform
    /// video directory when unset.
    pub videos_dir: Option<PathBuf>,
}

impl RecorderConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            expected_fps: None,
            codec: CodecProfile::H264Sdr,
            output: None,
            videos_dir: None,
        }
    }

    pub fn with_expected_fps(mut self, fps: u32) -> Self {
        self.expected_fps = Some(fps);
        self
    }

    pub fn with_codec(mut self, codec: CodecProfile) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output = Some(path);
        self
    }

    pub fn with_videos_dir(mut self, dir: PathBuf) -> Self {
        self.videos_dir = Some(dir);
        self
    }

    /// The destination path for this session: the explicit output if one
    /// was given, else a fresh unique name under the videos directory
    /// (created if missing).
    pub fn resolve_output_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref path) = self.output {
            return Ok(path.clone());
        }

        let dir = match self.videos_dir {
            Some(ref dir) => dir.clone(),
            None => dirs::video_dir().ok_or(ConfigError::NoVideosDir)?,
        };

        fs::create_dir_all(&dir).map_err(|e| ConfigError::CreateDir {
            path: dir.clone(),
            source: e,
        })?;

        Ok(dir.join(unique_file_name()))
    }
}

/// A name that is unique within the process and almost certainly unique
/// on disk: wall-clock millis plus a process-local counter.
fn unique_file_name() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("recording-{millis}-{n}.mp4")
}
