use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::pixel_buffer::PixelBuffer;
use crate::shared::recorder_config::RecorderConfig;
use crate::shared::timestamp::Timestamp;

/// Errors from the encoder backend and the session driving it.
///
/// Variants are `Clone` so a finalize result can be stored once and
/// replayed to later callers unchanged. Backend causes are carried as
/// captured messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("cannot open destination for writing: {0}")]
    CreateFailed(String),
    #[error("backend rejected the video input configuration: {0}")]
    CannotAddInput(String),
    #[error("writer rejected begin: {0}")]
    WriterRejected(String),
    #[error("session is already writing")]
    AlreadyWriting,
    #[error("session has already failed")]
    AlreadyFailed,
    #[error("session is not writing")]
    NotWriting,
    #[error("encoder is not ready for more data")]
    NotReady,
    #[error("encoding failed: {0}")]
    EncodeFailed(String),
    #[error("writer worker is gone")]
    WorkerGone,
    #[error("writer failed for an unknown reason")]
    Unknown,
}

/// Abstracts the video encoder/writer handle so the session can drive
/// output without depending on a specific codec library.
///
/// Handles are single-threaded-use: after `begin_writing` all calls come
/// from the session's writer worker, never concurrently.
pub trait VideoEncoder: Send {
    /// Creates the writer at `path` and declares one video input with the
    /// configured dimensions and codec profile. Any existing file at
    /// `path` is removed first; failure to remove is a hard error.
    fn open(&mut self, path: &Path, config: &RecorderConfig) -> Result<(), EncodeError>;

    /// Transitions the backend into its writing state.
    fn begin_writing(&mut self) -> Result<(), EncodeError>;

    /// Anchors the session clock: `at` becomes presentation time zero.
    /// Called exactly once, before the first append.
    fn start_session_clock(&mut self, at: Timestamp) -> Result<(), EncodeError>;

    /// Encodes one frame at presentation time `at`. The buffer is fully
    /// populated and not mutated for the duration of the call.
    fn append(&mut self, frame: &PixelBuffer, at: Timestamp) -> Result<(), EncodeError>;

    /// Closes the open time range after the last appended frame.
    fn end_session(&mut self, at: Timestamp) -> Result<(), EncodeError>;

    /// Flushes and closes the output, returning the destination path of
    /// the now-valid file. Called at most once.
    fn finish(&mut self) -> Result<PathBuf, EncodeError>;
}
