use std::path::PathBuf;
use std::thread;

use thiserror::Error;

use crate::convert::domain::pixel_buffer_converter::{ConvertError, PixelBufferConverter};
use crate::encode::domain::video_encoder::EncodeError;
use crate::encode::session::{EncoderSession, SessionState};
use crate::pump::completion::{completion, CompletionWaiter};
use crate::pump::frame_source::FrameSource;
use crate::shared::cancel::CancelToken;
use crate::shared::recorder_config::RecorderConfig;
use crate::shared::timestamp::Timestamp;

/// Terminal failure of a recording, delivered exactly once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PumpState {
    NotStarted,
    Pumping,
    Draining,
    Done,
}

/// The pull loop: asks the source for frames, converts them, and appends
/// to the session only while the encoder reports readiness.
///
/// The pump owns the source, the converter, and the session; the loop
/// consumes `self`, so exactly one loop can ever run per session. All
/// writer interaction happens on the thread that calls [`run`], which is
/// the session's serial context.
///
/// [`run`]: FramePump::run
pub struct FramePump<S, C>
where
    S: FrameSource,
    C: PixelBufferConverter<S::Texture>,
{
    source: S,
    converter: C,
    session: EncoderSession,
    cancel: CancelToken,
    state: PumpState,
    last_timestamp: Option<Timestamp>,
}

impl<S, C> FramePump<S, C>
where
    S: FrameSource,
    C: PixelBufferConverter<S::Texture>,
{
    /// Wires a source, a converter, and an opened session together. The
    /// converter is configured to the session's fixed output size here.
    pub fn new(
        source: S,
        mut converter: C,
        session: EncoderSession,
        config: &RecorderConfig,
    ) -> Result<Self, RecordError> {
        converter.configure(config.width, config.height)?;
        Ok(Self {
            source,
            converter,
            session,
            cancel: CancelToken::new(),
            state: PumpState::NotStarted,
            last_timestamp: None,
        })
    }

    /// A token that stops the pump between frames. Stopping drains
    /// through the normal end-of-stream path, so the file stays valid.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs the pump to completion on the calling thread and returns the
    /// terminal outcome: the destination path, or the first error.
    pub fn run(mut self) -> Result<PathBuf, RecordError> {
        debug_assert_eq!(self.state, PumpState::NotStarted);
        self.source.start();
        if self.session.state() == SessionState::Idle {
            if let Err(e) = self.session.begin_writing() {
                return self.abort(e.into());
            }
        }
        self.state = PumpState::Pumping;

        loop {
            while self.session.is_ready_for_more_data() {
                if self.cancel.is_cancelled() {
                    log::info!("recording cancelled, draining");
                    return self.drain();
                }

                let (texture, at) = match self.source.next_frame() {
                    Some(frame) => frame,
                    None => return self.drain(),
                };

                // Timestamps never go backward: a jittering source is
                // clamped to the previous presentation time.
                let at = match self.last_timestamp {
                    Some(last) if at < last => {
                        log::warn!(
                            "out-of-order timestamp {:.4}s clamped to {:.4}s",
                            at.seconds(),
                            last.seconds()
                        );
                        last
                    }
                    _ => at,
                };

                let buffer = match self.converter.convert(&texture) {
                    Ok(buffer) => buffer,
                    Err(e) => return self.abort(e.into()),
                };
                if let Err(e) = self.session.append(buffer, at) {
                    return self.abort(e.into());
                }
                self.last_timestamp = Some(at);
            }

            if self.cancel.is_cancelled() {
                log::info!("recording cancelled, draining");
                return self.drain();
            }

            // Encoder backlog is full; sleep until the readiness signal.
            if let Err(e) = self.session.wait_ready() {
                return self.abort(e.into());
            }
        }
    }

    /// Runs the pump on a dedicated thread and returns a handle carrying
    /// the cancel token and the single-fire result.
    pub fn spawn(self) -> RecordingHandle
    where
        S: 'static,
        C: 'static,
    {
        let cancel = self.cancel.clone();
        let (resolver, waiter) = completion();
        let join = thread::spawn(move || {
            resolver.resolve(self.run());
        });

        RecordingHandle {
            waiter,
            cancel,
            join,
        }
    }

    /// Source exhausted (or cancelled): close the time range at the last
    /// known timestamp, then finalize.
    fn drain(&mut self) -> Result<PathBuf, RecordError> {
        self.state = PumpState::Draining;
        let end_at = self.last_timestamp.unwrap_or_else(Timestamp::zero);

        if let Err(e) = self.session.end_session(end_at) {
            let _ = self.session.finalize();
            self.state = PumpState::Done;
            return Err(e.into());
        }

        let result = self.session.finalize();
        self.state = PumpState::Done;
        let path = result?;
        log::info!(
            "recording complete: {} ({} frames)",
            path.display(),
            self.session.appended_frames()
        );
        Ok(path)
    }

    /// Something failed mid-stream: finalize with whatever was already
    /// appended and surface the original cause.
    fn abort(&mut self, cause: RecordError) -> Result<PathBuf, RecordError> {
        log::error!("recording aborted: {cause}");
        let _ = self.session.finalize();
        self.state = PumpState::Done;
        Err(cause)
    }
}

/// Handle to a spawned recording: cancel it, then wait for the one
/// terminal outcome.
pub struct RecordingHandle {
    waiter: CompletionWaiter<Result<PathBuf, RecordError>>,
    cancel: CancelToken,
    join: thread::JoinHandle<()>,
}

impl RecordingHandle {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Blocks until the pump delivers its result.
    pub fn wait(self) -> Result<PathBuf, RecordError> {
        let result = self
            .waiter
            .wait()
            .unwrap_or(Err(RecordError::Encode(EncodeError::WorkerGone)));
        let _ = self.join.join();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::encode::domain::video_encoder::VideoEncoder;
    use crate::shared::pixel_buffer::PixelBuffer;

    /// Stand-in for a GPU texture: just dimensions.
    #[derive(Clone, Copy, Debug)]
    struct TestTexture {
        width: u32,
        height: u32,
    }

    fn tex(width: u32, height: u32) -> TestTexture {
        TestTexture { width, height }
    }

    struct VecSource {
        frames: std::vec::IntoIter<(TestTexture, Timestamp)>,
        starts: Arc<AtomicUsize>,
    }

    impl VecSource {
        fn new(frames: Vec<(TestTexture, Timestamp)>) -> Self {
            Self {
                frames: frames.into_iter(),
                starts: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn start_probe(&self) -> Arc<AtomicUsize> {
            self.starts.clone()
        }
    }

    impl FrameSource for VecSource {
        type Texture = TestTexture;

        fn start(&mut self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn next_frame(&mut self) -> Option<(TestTexture, Timestamp)> {
            self.frames.next()
        }
    }

    /// Never-ending source; only a cancel stops it.
    struct InfiniteSource {
        n: u64,
    }

    impl FrameSource for InfiniteSource {
        type Texture = TestTexture;

        fn start(&mut self) {}

        fn next_frame(&mut self) -> Option<(TestTexture, Timestamp)> {
            let frame = (tex(64, 64), Timestamp::from_frame_index(self.n, 30));
            self.n += 1;
            Some(frame)
        }
    }

    struct TestConverter {
        configured: Option<(u32, u32)>,
        buffer: PixelBuffer,
        fail_at_call: Option<usize>,
        calls: usize,
    }

    impl TestConverter {
        fn new() -> Self {
            Self {
                configured: None,
                buffer: PixelBuffer::new(1, 1),
                fail_at_call: None,
                calls: 0,
            }
        }

        fn failing_at(call: usize) -> Self {
            Self {
                fail_at_call: Some(call),
                ..Self::new()
            }
        }
    }

    impl PixelBufferConverter<TestTexture> for TestConverter {
        fn configure(&mut self, width: u32, height: u32) -> Result<(), ConvertError> {
            self.configured = Some((width, height));
            self.buffer = PixelBuffer::new(width, height);
            Ok(())
        }

        fn convert(&mut self, texture: &TestTexture) -> Result<&PixelBuffer, ConvertError> {
            let (width, height) = self.configured.ok_or(ConvertError::NotConfigured)?;
            if self.fail_at_call == Some(self.calls) {
                return Err(ConvertError::ConversionFailed("scripted".to_string()));
            }
            self.calls += 1;
            if texture.width != width || texture.height != height {
                return Err(ConvertError::SizeMismatch {
                    expected_width: width,
                    expected_height: height,
                    actual_width: texture.width,
                    actual_height: texture.height,
                });
            }
            Ok(&self.buffer)
        }
    }

    /// Records clock starts and append times; can throttle to force the
    /// session's readiness off and on.
    struct RecordingBackend {
        clock_starts: Arc<Mutex<Vec<i64>>>,
        appended: Arc<Mutex<Vec<i64>>>,
        finish_calls: Arc<AtomicUsize>,
        delay_seed: Option<u64>,
        path: std::path::PathBuf,
    }

    #[derive(Clone)]
    struct BackendProbe {
        clock_starts: Arc<Mutex<Vec<i64>>>,
        appended: Arc<Mutex<Vec<i64>>>,
        finish_calls: Arc<AtomicUsize>,
    }

    impl RecordingBackend {
        fn new() -> (Self, BackendProbe) {
            let backend = Self {
                clock_starts: Arc::new(Mutex::new(Vec::new())),
                appended: Arc::new(Mutex::new(Vec::new())),
                finish_calls: Arc::new(AtomicUsize::new(0)),
                delay_seed: None,
                path: std::path::PathBuf::new(),
            };
            let probe = BackendProbe {
                clock_starts: backend.clock_starts.clone(),
                appended: backend.appended.clone(),
                finish_calls: backend.finish_calls.clone(),
            };
            (backend, probe)
        }

        fn throttled(seed: u64) -> (Self, BackendProbe) {
            let (mut backend, probe) = Self::new();
            backend.delay_seed = Some(seed);
            (backend, probe)
        }
    }

    impl VideoEncoder for RecordingBackend {
        fn open(&mut self, path: &Path, _config: &RecorderConfig) -> Result<(), EncodeError> {
            self.path = path.to_path_buf();
            Ok(())
        }

        fn begin_writing(&mut self) -> Result<(), EncodeError> {
            Ok(())
        }

        fn start_session_clock(&mut self, at: Timestamp) -> Result<(), EncodeError> {
            self.clock_starts.lock().unwrap().push(at.value());
            Ok(())
        }

        fn append(&mut self, _frame: &PixelBuffer, at: Timestamp) -> Result<(), EncodeError> {
            if let Some(ref mut seed) = self.delay_seed {
                // Deterministic jitter so the command queue repeatedly
                // fills and drains during the run.
                *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                let millis = (*seed >> 33) % 4;
                std::thread::sleep(Duration::from_millis(millis));
            }
            self.appended.lock().unwrap().push(at.value());
            Ok(())
        }

        fn end_session(&mut self, _at: Timestamp) -> Result<(), EncodeError> {
            Ok(())
        }

        fn finish(&mut self) -> Result<std::path::PathBuf, EncodeError> {
            self.finish_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.path.clone())
        }
    }

    fn config() -> RecorderConfig {
        RecorderConfig::new(64, 64)
            .with_expected_fps(30)
            .with_output(std::path::PathBuf::from("/tmp/pump.mp4"))
    }

    fn session_with(backend: RecordingBackend) -> EncoderSession {
        EncoderSession::open(Box::new(backend), &config()).unwrap()
    }

    fn frames_at_30fps(count: u64) -> Vec<(TestTexture, Timestamp)> {
        (0..count)
            .map(|i| (tex(64, 64), Timestamp::from_frame_index(i, 30)))
            .collect()
    }

    #[test]
    fn test_pumps_all_frames_in_order() {
        let (backend, probe) = RecordingBackend::new();
        let pump = FramePump::new(
            VecSource::new(frames_at_30fps(5)),
            TestConverter::new(),
            session_with(backend),
            &config(),
        )
        .unwrap();

        let path = pump.run().unwrap();
        assert_eq!(path, std::path::PathBuf::from("/tmp/pump.mp4"));

        let appended = probe.appended.lock().unwrap().clone();
        assert_eq!(appended.len(), 5);
        assert!(appended.windows(2).all(|w| w[0] <= w[1]));
        // Clock anchored exactly once, at the first frame's time.
        assert_eq!(probe.clock_starts.lock().unwrap().clone(), vec![0]);
        assert_eq!(probe.finish_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_out_of_order_timestamps_are_clamped() {
        let (backend, probe) = RecordingBackend::new();
        let times = [0i64, 40, 20, 80];
        let frames = times
            .iter()
            .map(|&t| (tex(64, 64), Timestamp::new(t, 600)))
            .collect();
        let pump = FramePump::new(
            VecSource::new(frames),
            TestConverter::new(),
            session_with(backend),
            &config(),
        )
        .unwrap();

        pump.run().unwrap();

        let appended = probe.appended.lock().unwrap().clone();
        assert_eq!(appended, vec![0, 40, 40, 80]);
    }

    #[test]
    fn test_empty_stream_succeeds_with_zero_frames() {
        let (backend, probe) = RecordingBackend::new();
        let pump = FramePump::new(
            VecSource::new(Vec::new()),
            TestConverter::new(),
            session_with(backend),
            &config(),
        )
        .unwrap();

        let path = pump.run().unwrap();
        assert_eq!(path, std::path::PathBuf::from("/tmp/pump.mp4"));
        assert!(probe.appended.lock().unwrap().is_empty());
        assert!(probe.clock_starts.lock().unwrap().is_empty());
        assert_eq!(probe.finish_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_conversion_failure_finalizes_partial_output() {
        let (backend, probe) = RecordingBackend::new();
        // Calls are zero-indexed: the 5th frame fails.
        let pump = FramePump::new(
            VecSource::new(frames_at_30fps(10)),
            TestConverter::failing_at(4),
            session_with(backend),
            &config(),
        )
        .unwrap();

        let err = pump.run().unwrap_err();
        assert_eq!(
            err,
            RecordError::Convert(ConvertError::ConversionFailed("scripted".to_string()))
        );
        assert_eq!(probe.appended.lock().unwrap().len(), 4);
        assert_eq!(probe.finish_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_size_mismatch_aborts() {
        let (backend, probe) = RecordingBackend::new();
        let frames = vec![
            (tex(64, 64), Timestamp::from_frame_index(0, 30)),
            (tex(128, 128), Timestamp::from_frame_index(1, 30)),
        ];
        let pump = FramePump::new(
            VecSource::new(frames),
            TestConverter::new(),
            session_with(backend),
            &config(),
        )
        .unwrap();

        match pump.run().unwrap_err() {
            RecordError::Convert(ConvertError::SizeMismatch {
                actual_width,
                actual_height,
                ..
            }) => {
                assert_eq!((actual_width, actual_height), (128, 128));
            }
            other => panic!("expected SizeMismatch, got {other:?}"),
        }
        assert_eq!(probe.appended.lock().unwrap().len(), 1);
        assert_eq!(probe.finish_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_readiness_discipline_under_throttled_backend() {
        // The backend's jittered append delays make the command queue
        // fill and drain repeatedly. An append issued while not ready
        // aborts the pump, so a clean run with every frame accounted
        // for demonstrates zero violations.
        let (backend, probe) = RecordingBackend::throttled(0x5EED);
        let pump = FramePump::new(
            VecSource::new(frames_at_30fps(50)),
            TestConverter::new(),
            session_with(backend),
            &config(),
        )
        .unwrap();

        pump.run().unwrap();

        let appended = probe.appended.lock().unwrap().clone();
        assert_eq!(appended.len(), 50);
        assert!(appended.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_source_started_exactly_once() {
        let (backend, _) = RecordingBackend::new();
        let source = VecSource::new(frames_at_30fps(2));
        let starts = source.start_probe();
        let pump = FramePump::new(
            source,
            TestConverter::new(),
            session_with(backend),
            &config(),
        )
        .unwrap();

        pump.run().unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_drains_to_a_valid_result() {
        let (backend, probe) = RecordingBackend::throttled(7);
        let pump = FramePump::new(
            InfiniteSource { n: 0 },
            TestConverter::new(),
            session_with(backend),
            &config(),
        )
        .unwrap();

        let handle = pump.spawn();
        std::thread::sleep(Duration::from_millis(50));
        handle.cancel();
        let path = handle.wait().unwrap();

        assert_eq!(path, std::path::PathBuf::from("/tmp/pump.mp4"));
        assert_eq!(probe.finish_calls.load(Ordering::SeqCst), 1);
        let appended = probe.appended.lock().unwrap().clone();
        assert!(appended.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_spawn_delivers_result_once() {
        let (backend, _) = RecordingBackend::new();
        let pump = FramePump::new(
            VecSource::new(frames_at_30fps(3)),
            TestConverter::new(),
            session_with(backend),
            &config(),
        )
        .unwrap();

        let handle = pump.spawn();
        assert_eq!(
            handle.wait().unwrap(),
            std::path::PathBuf::from("/tmp/pump.mp4")
        );
    }
}
