use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::ClientError;

/// Lifecycle of one synthesized-speech stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSessionState {
    Idle,
    Opening,
    Streaming,
    Finalizing,
    Completed,
    Errored,
}

/// An appendable byte sink bound to a playable output. The stream may start
/// playing from the first bytes while later chunks are still arriving.
///
/// `append` may refuse a chunk (sink busy or gone); the assembler drops that
/// chunk and keeps the session alive, so implementations must stay usable
/// after returning an error.
pub trait AudioSink: Send {
    fn begin(&mut self, session_id: &str) -> Result<(), String>;
    fn append(&mut self, bytes: &[u8]) -> Result<(), String>;
    fn finish(&mut self);
    fn abort(&mut self);
}

/// Discards everything. Stands in while speech playback is not enabled.
pub struct NullSink;

impl AudioSink for NullSink {
    fn begin(&mut self, _session_id: &str) -> Result<(), String> {
        Ok(())
    }
    fn append(&mut self, _bytes: &[u8]) -> Result<(), String> {
        Ok(())
    }
    fn finish(&mut self) {}
    fn abort(&mut self) {}
}

/// Accumulates the stream in memory, preserving arrival order.
#[allow(dead_code)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl MemorySink {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared view of the assembled bytes.
    pub fn buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        self.buf.clone()
    }
}

impl AudioSink for MemorySink {
    fn begin(&mut self, _session_id: &str) -> Result<(), String> {
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.buf
            .lock()
            .map_err(|_| "buffer poisoned".to_string())?
            .extend_from_slice(bytes);
        Ok(())
    }

    fn finish(&mut self) {}
    fn abort(&mut self) {}
}

/// Forwards chunks over a bounded channel that the host drains into a player
/// while the stream is still open. An empty chunk marks end-of-stream. When
/// the channel is momentarily full the chunk is refused, not queued.
pub struct StreamSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl StreamSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl AudioSink for StreamSink {
    fn begin(&mut self, _session_id: &str) -> Result<(), String> {
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.tx.try_send(bytes.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => "sink busy".to_string(),
            mpsc::error::TrySendError::Closed(_) => "sink closed".to_string(),
        })
    }

    fn finish(&mut self) {
        let _ = self.tx.try_send(Vec::new());
    }

    fn abort(&mut self) {}
}

/// `StreamSink` wired to a drain task that logs progress; stands in for a
/// real player process on the other end of the channel.
pub fn spawn_logging_sink(id: &str) -> Box<dyn AudioSink> {
    let (sink, mut rx) = StreamSink::new(64);
    let id = id.to_string();
    tokio::spawn(async move {
        let mut total: u64 = 0;
        while let Some(chunk) = rx.recv().await {
            if chunk.is_empty() {
                break;
            }
            total += chunk.len() as u64;
            log::debug!("[audio] {}: {} bytes buffered", id, total);
        }
        log::info!("[audio] {}: stream drained ({} bytes)", id, total);
    });
    Box::new(sink)
}

struct AudioSession {
    id: String,
    state: AudioSessionState,
    sink: Box<dyn AudioSink>,
    bytes: u64,
}

/// Assembles binary chunks into the single active playback session.
///
/// Routing is explicit: the active id is set on `audio-start` and cleared on
/// completion or error. Binary frames carry no session id of their own, so
/// the server must open the session before the first chunk; chunks with no
/// live session are dropped.
pub struct AudioAssembler {
    active: Option<AudioSession>,
}

impl AudioAssembler {
    pub fn new() -> Self {
        Self { active: None }
    }

    #[allow(dead_code)]
    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.id.as_str())
    }

    /// Open a session for `id`. Overlapping starts are refused: the live
    /// stream keeps its buffer and the new start is dropped.
    pub fn start(&mut self, id: &str, sink: Box<dyn AudioSink>) -> Result<(), ClientError> {
        if let Some(active) = &self.active {
            return Err(ClientError::Audio(format!(
                "audio-start for {} while session {} is still active",
                id, active.id
            )));
        }
        // Idle -> Opening -> (sink ready) -> Streaming.
        let mut session = AudioSession {
            id: id.to_string(),
            state: AudioSessionState::Idle,
            sink,
            bytes: 0,
        };
        session.state = AudioSessionState::Opening;
        if let Err(e) = session.sink.begin(id) {
            return Err(ClientError::Audio(format!(
                "failed to open stream for {}: {}",
                id, e
            )));
        }
        session.state = AudioSessionState::Streaming;
        log::info!("[audio] session {} streaming", id);
        self.active = Some(session);
        Ok(())
    }

    /// Route one binary chunk to the active session, in arrival order.
    pub fn append_chunk(&mut self, bytes: &[u8]) {
        let Some(session) = self.active.as_mut() else {
            log::warn!(
                "[audio] dropping {}-byte chunk: no active session",
                bytes.len()
            );
            return;
        };
        if !matches!(
            session.state,
            AudioSessionState::Opening | AudioSessionState::Streaming
        ) {
            log::warn!(
                "[audio] dropping {}-byte chunk: session {} is {:?}",
                bytes.len(),
                session.id,
                session.state
            );
            return;
        }
        match session.sink.append(bytes) {
            Ok(()) => session.bytes += bytes.len() as u64,
            Err(e) => log::warn!("[audio] chunk dropped for {}: {}", session.id, e),
        }
    }

    /// Finalize the session for `id`. Returns the total appended bytes when
    /// the session completes; a mismatched or absent session is a no-op.
    pub fn finish(&mut self, id: &str) -> Option<u64> {
        match self.active.as_mut() {
            Some(session) if session.id == id => {
                session.state = AudioSessionState::Finalizing;
                session.sink.finish();
                session.state = AudioSessionState::Completed;
                let done = self.active.take().expect("active session present");
                log::info!("[audio] session {} completed: {} bytes", done.id, done.bytes);
                Some(done.bytes)
            }
            _ => {
                log::warn!("[audio] audio-end for {} with no matching session", id);
                None
            }
        }
    }

    /// Mark the session errored and release its resources. Never touches the
    /// connection or the message log.
    pub fn fail(&mut self, id: &str, error: &str) {
        let matched = self.active.as_ref().map(|s| s.id == id).unwrap_or(false);
        if !matched {
            log::warn!(
                "[audio] audio-error for {} with no matching session: {}",
                id,
                error
            );
            return;
        }
        let mut session = self.active.take().expect("active session present");
        session.state = AudioSessionState::Errored;
        session.sink.abort();
        log::warn!(
            "[audio] session {} errored after {} bytes: {}",
            session.id,
            session.bytes,
            error
        );
    }

    /// Drop whatever is active (client teardown).
    pub fn dispose(&mut self) {
        if let Some(mut session) = self.active.take() {
            session.sink.abort();
        }
    }
}
