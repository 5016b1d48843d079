use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::encode::domain::video_encoder::{EncodeError, VideoEncoder};
use crate::pump::completion::{completion, CompletionWaiter};
use crate::shared::pixel_buffer::PixelBuffer;
use crate::shared::recorder_config::RecorderConfig;
use crate::shared::timestamp::Timestamp;

/// How many commands may sit in front of the writer worker. While the
/// queue is full the session reports not-ready and the pump waits.
const COMMAND_QUEUE_DEPTH: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Writing,
    Finishing,
    Finished,
    Failed,
}

enum WriterCommand {
    StartClock(Timestamp),
    Append(PixelBuffer, Timestamp),
    End(Timestamp),
    Finish,
}

/// Owns the encoder handle and serializes every interaction with it.
///
/// The handle is single-threaded-use, so after `begin_writing` it lives
/// on a dedicated worker thread fed through a bounded command queue.
/// Readiness is the queue having capacity; the worker emits an event
/// after each drained command so a full queue can be waited on instead
/// of polled.
pub struct EncoderSession {
    state: SessionState,
    output_path: PathBuf,
    clock_started: bool,
    appended_frames: u64,
    backend: Option<Box<dyn VideoEncoder>>,
    worker: Option<WriterWorker>,
    captured_error: Option<EncodeError>,
    finalize_result: Option<Result<PathBuf, EncodeError>>,
}

impl EncoderSession {
    /// Creates the writer at the configured destination and declares the
    /// video input. Configuration errors surface here, before any worker
    /// exists.
    pub fn open(
        mut backend: Box<dyn VideoEncoder>,
        config: &RecorderConfig,
    ) -> Result<Self, EncodeError> {
        let output_path = config
            .resolve_output_path()
            .map_err(|e| EncodeError::CreateFailed(e.to_string()))?;

        backend.open(&output_path, config)?;
        log::info!(
            "encoder session opened: {} ({}x{}, {:?})",
            output_path.display(),
            config.width,
            config.height,
            config.codec
        );

        Ok(Self {
            state: SessionState::Idle,
            output_path,
            clock_started: false,
            appended_frames: 0,
            backend: Some(backend),
            worker: None,
            captured_error: None,
            finalize_result: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }

    pub fn appended_frames(&self) -> u64 {
        self.appended_frames
    }

    /// Moves the session from `Idle` to `Writing` and hands the backend
    /// to its worker thread.
    pub fn begin_writing(&mut self) -> Result<(), EncodeError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Writing => return Err(EncodeError::AlreadyWriting),
            SessionState::Failed => return Err(EncodeError::AlreadyFailed),
            SessionState::Finishing | SessionState::Finished => {
                return Err(EncodeError::NotWriting)
            }
        }

        let mut backend = self.backend.take().ok_or(EncodeError::Unknown)?;
        if let Err(e) = backend.begin_writing() {
            log::error!("writer rejected begin: {e}");
            self.captured_error = Some(e.clone());
            self.state = SessionState::Failed;
            return Err(e);
        }

        self.worker = Some(WriterWorker::spawn(backend));
        self.state = SessionState::Writing;
        Ok(())
    }

    /// Whether one more append can be issued without blocking the pump.
    pub fn is_ready_for_more_data(&self) -> bool {
        if self.state != SessionState::Writing {
            return false;
        }
        match self.worker {
            Some(ref worker) => worker.error().is_none() && !worker.cmd_tx.is_full(),
            None => false,
        }
    }

    /// Blocks until the worker drains a command (or dies). Returns an
    /// error if the worker has recorded a failure, so a waiting pump
    /// observes mid-stream encode errors.
    pub fn wait_ready(&mut self) -> Result<(), EncodeError> {
        loop {
            let worker = match self.worker {
                Some(ref worker) => worker,
                None => return Err(EncodeError::NotWriting),
            };
            if let Some(e) = worker.error() {
                self.captured_error = Some(e.clone());
                return Err(e);
            }
            if self.is_ready_for_more_data() {
                return Ok(());
            }
            if worker.ready_rx.recv().is_err() {
                self.captured_error = Some(EncodeError::WorkerGone);
                self.state = SessionState::Failed;
                return Err(EncodeError::WorkerGone);
            }
        }
    }

    /// The last failure the worker recorded, if any.
    pub fn worker_error(&self) -> Option<EncodeError> {
        self.worker.as_ref().and_then(|w| w.error())
    }

    /// Hands one frame to the writer at presentation time `at`.
    ///
    /// Copy-semantics handoff: the buffer is cloned into the command, so
    /// the caller may overwrite it as soon as this returns. The session
    /// clock is started on the first append, exactly once.
    pub fn append(&mut self, frame: &PixelBuffer, at: Timestamp) -> Result<(), EncodeError> {
        if self.state != SessionState::Writing {
            return Err(EncodeError::NotWriting);
        }
        if let Some(e) = self.worker_error() {
            self.captured_error = Some(e.clone());
            return Err(e);
        }

        let worker = self.worker.as_ref().ok_or(EncodeError::NotWriting)?;
        if worker.cmd_tx.is_full() {
            return Err(EncodeError::NotReady);
        }

        if !self.clock_started {
            self.start_session_clock(at)?;
        }

        let sent = match self.worker {
            Some(ref worker) => worker
                .cmd_tx
                .send(WriterCommand::Append(frame.clone(), at))
                .is_ok(),
            None => false,
        };
        if !sent {
            self.state = SessionState::Failed;
            return Err(EncodeError::WorkerGone);
        }
        self.appended_frames += 1;
        Ok(())
    }

    fn start_session_clock(&mut self, at: Timestamp) -> Result<(), EncodeError> {
        debug_assert!(!self.clock_started, "session clock started twice");
        if self.clock_started {
            return Ok(());
        }
        self.clock_started = true;
        log::debug!("session clock starts at {:.3}s", at.seconds());

        let sent = match self.worker {
            Some(ref worker) => worker.cmd_tx.send(WriterCommand::StartClock(at)).is_ok(),
            None => false,
        };
        if !sent {
            self.state = SessionState::Failed;
            return Err(EncodeError::WorkerGone);
        }
        Ok(())
    }

    /// Closes the open time range. A session that never appended a frame
    /// has no open range, so this is a no-op for it.
    pub fn end_session(&mut self, at: Timestamp) -> Result<(), EncodeError> {
        if self.state != SessionState::Writing {
            return Err(EncodeError::NotWriting);
        }
        if !self.clock_started {
            return Ok(());
        }

        let sent = match self.worker {
            Some(ref worker) => worker.cmd_tx.send(WriterCommand::End(at)).is_ok(),
            None => false,
        };
        if !sent {
            self.state = SessionState::Failed;
            return Err(EncodeError::WorkerGone);
        }
        Ok(())
    }

    /// Flushes and closes the output. At-most-once: the first outcome is
    /// stored and replayed to any later caller unchanged.
    pub fn finalize(&mut self) -> Result<PathBuf, EncodeError> {
        if let Some(ref result) = self.finalize_result {
            return result.clone();
        }

        let result = match self.state {
            SessionState::Writing => {
                self.state = SessionState::Finishing;
                match self.worker.take() {
                    Some(worker) => worker.finish(),
                    None => Err(EncodeError::WorkerGone),
                }
            }
            _ => Err(self
                .captured_error
                .clone()
                .unwrap_or(EncodeError::Unknown)),
        };

        match result {
            Ok(_) => self.state = SessionState::Finished,
            Err(ref e) => {
                self.captured_error = Some(e.clone());
                self.state = SessionState::Failed;
            }
        }
        self.finalize_result = Some(result.clone());
        result
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            // The worker closes the file when its queue disconnects, so
            // even this unsupported shutdown leaves a readable output.
            log::warn!(
                "encoder session dropped without finalize; closing {}",
                self.output_path.display()
            );
            let _ = worker.finish();
        }
    }
}

struct WorkerShared {
    error: Mutex<Option<EncodeError>>,
}

struct WriterWorker {
    cmd_tx: crossbeam_channel::Sender<WriterCommand>,
    ready_rx: crossbeam_channel::Receiver<()>,
    result: CompletionWaiter<Result<PathBuf, EncodeError>>,
    shared: Arc<WorkerShared>,
    join: thread::JoinHandle<()>,
}

impl WriterWorker {
    fn spawn(backend: Box<dyn VideoEncoder>) -> Self {
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded::<WriterCommand>(COMMAND_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = crossbeam_channel::unbounded::<()>();
        let (resolver, result) = completion::<Result<PathBuf, EncodeError>>();
        let shared = Arc::new(WorkerShared {
            error: Mutex::new(None),
        });
        let worker_shared = shared.clone();

        let join = thread::spawn(move || {
            let mut backend = backend;
            let mut failed = false;

            let record = |shared: &WorkerShared, e: EncodeError| {
                log::error!("writer worker failure: {e}");
                let mut slot = shared.error.lock().unwrap_or_else(|p| p.into_inner());
                if slot.is_none() {
                    *slot = Some(e);
                }
            };

            for command in cmd_rx {
                match command {
                    WriterCommand::StartClock(at) => {
                        if !failed {
                            if let Err(e) = backend.start_session_clock(at) {
                                record(&worker_shared, e);
                                failed = true;
                            }
                        }
                    }
                    WriterCommand::Append(frame, at) => {
                        if !failed {
                            if let Err(e) = backend.append(&frame, at) {
                                record(&worker_shared, e);
                                failed = true;
                            }
                        }
                    }
                    WriterCommand::End(at) => {
                        if !failed {
                            if let Err(e) = backend.end_session(at) {
                                record(&worker_shared, e);
                                failed = true;
                            }
                        }
                    }
                    WriterCommand::Finish => {
                        let result = if failed {
                            let slot =
                                worker_shared.error.lock().unwrap_or_else(|p| p.into_inner());
                            Err(slot.clone().unwrap_or(EncodeError::Unknown))
                        } else {
                            backend.finish()
                        };
                        resolver.resolve(result);
                        return;
                    }
                }
                let _ = ready_tx.send(());
            }

            // Queue disconnected without an explicit finish: the
            // session was dropped mid-write. Close the file anyway.
            let result = if failed {
                let slot = worker_shared.error.lock().unwrap_or_else(|p| p.into_inner());
                Err(slot.clone().unwrap_or(EncodeError::Unknown))
            } else {
                backend.finish()
            };
            resolver.resolve(result);
        });

        Self {
            cmd_tx,
            ready_rx,
            result,
            shared,
            join,
        }
    }

    fn error(&self) -> Option<EncodeError> {
        self.shared
            .error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Asks the worker to flush and close, then waits for its result.
    fn finish(self) -> Result<PathBuf, EncodeError> {
        let error = self.error();
        // A full queue blocks here until the worker drains it, keeping
        // the finish strictly after every accepted append.
        let _ = self.cmd_tx.send(WriterCommand::Finish);
        drop(self.cmd_tx);

        let result = self
            .result
            .wait()
            .unwrap_or_else(|| Err(error.unwrap_or(EncodeError::Unknown)));
        let _ = self.join.join();
        result
    }
}
