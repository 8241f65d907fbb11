use std::sync::mpsc::Sender as EventSender;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::audio::{AudioAssembler, AudioSink, NullSink};
use crate::chat::ChatSessionState;
use crate::connection::{CloseDisposition, ConnectionManager, ConnectionState, TransportEvent};
use crate::error::ClientError;
use crate::protocol::{self, Decoded, ServerFrame};
use crate::state::{AppEvent, AuthState};

const COMMAND_BUFFER: usize = 32;

/// Commands from the rendering layer into the client loop.
#[derive(Debug)]
pub enum ClientCommand {
    /// Send a chat message with the accumulated history.
    Send(String),
    /// Install the real audio sink; until then streams are discarded.
    EnableAudio,
    /// Clear a failed connection and dial again.
    Reset,
    /// Tear down: cancel the reconnect timer, close the socket with 1000.
    Dispose,
}

/// Builds one sink per audio session once playback is enabled.
pub type SinkFactory = Box<dyn FnMut(&str) -> Box<dyn AudioSink> + Send>;

/// Wires the connection, the protocol decoder, the audio assembler and the
/// message log into one consumer loop. Everything arrives over two channels
/// (transport events in, commands in) and leaves over one (`AppEvent`s out),
/// so the whole state machine runs without a live socket in tests.
pub struct ChatClient {
    manager: ConnectionManager,
    assembler: AudioAssembler,
    session: ChatSessionState,
    events: EventSender<AppEvent>,
    auth: watch::Receiver<AuthState>,
    sink_factory: SinkFactory,
    audio_enabled: bool,
}

impl ChatClient {
    pub fn new(
        manager: ConnectionManager,
        events: EventSender<AppEvent>,
        auth: watch::Receiver<AuthState>,
        sink_factory: SinkFactory,
    ) -> Self {
        Self {
            manager,
            assembler: AudioAssembler::new(),
            session: ChatSessionState::new(),
            events,
            auth,
            sink_factory,
            audio_enabled: false,
        }
    }

    /// Spawn the consumer loop on the current runtime. The returned sender is
    /// the only way to reach the client; dropping it tears the client down.
    pub fn spawn(self) -> mpsc::Sender<ClientCommand> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(self.run(command_rx));
        command_tx
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<ClientCommand>) {
        if !self.await_auth(&mut commands).await {
            return;
        }

        let mut events_rx = Some(self.manager.connect());
        self.emit_status();

        loop {
            let reconnect_at = self.manager.reconnect_due();
            tokio::select! {
                ev = transport_recv(&mut events_rx) => match ev {
                    TransportEvent::Opened => {
                        self.manager.handle_open();
                        // A successful open clears whatever error was showing.
                        self.session.clear_error();
                        let _ = self.events.send(AppEvent::ErrorCleared);
                        self.emit_status();
                    }
                    TransportEvent::Text(text) => self.handle_text_frame(&text),
                    TransportEvent::Binary(bytes) => self.assembler.append_chunk(&bytes),
                    TransportEvent::Error(err) => {
                        self.surface_error(format!("connection error: {}", err));
                    }
                    TransportEvent::Closed { code, reason } => {
                        events_rx = None;
                        self.handle_closed(code, &reason);
                    }
                },
                cmd = commands.recv() => match cmd {
                    Some(ClientCommand::Send(text)) => self.handle_send(&text),
                    Some(ClientCommand::EnableAudio) => self.enable_audio(),
                    Some(ClientCommand::Reset) => {
                        self.manager.reset();
                        if self.manager.state() == ConnectionState::Disconnected {
                            events_rx = Some(self.manager.connect());
                            self.emit_status();
                        }
                    }
                    Some(ClientCommand::Dispose) | None => {
                        self.shutdown();
                        break;
                    }
                },
                _ = sleep_until_opt(reconnect_at) => {
                    log::info!(
                        "[connection] reconnecting (attempt {})",
                        self.manager.attempts()
                    );
                    events_rx = Some(self.manager.connect());
                    self.emit_status();
                }
            }
        }
    }

    /// Gate on the auth collaborator: no dialing until a user is present.
    /// Returns false when the host went away while waiting.
    async fn await_auth(&mut self, commands: &mut mpsc::Receiver<ClientCommand>) -> bool {
        let mut auth = self.auth.clone();
        loop {
            if auth.borrow().ready() {
                return true;
            }
            tokio::select! {
                changed = auth.changed() => {
                    if changed.is_err() {
                        log::warn!("[client] auth collaborator dropped before resolving");
                        return false;
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(ClientCommand::Send(_)) => {
                        self.surface_error("connection not established".to_string());
                    }
                    Some(ClientCommand::EnableAudio) => self.enable_audio(),
                    Some(ClientCommand::Reset) => {}
                    Some(ClientCommand::Dispose) | None => return false,
                },
            }
        }
    }

    fn handle_text_frame(&mut self, text: &str) {
        match protocol::decode_text_frame(text) {
            Ok(Decoded::Frame(frame)) => self.apply_frame(frame),
            Ok(Decoded::Ignored) => {}
            Err(e) => self.surface_error(e.to_string()),
        }
    }

    fn apply_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::MessageReceived => self.set_loading(true),
            ServerFrame::Text { id, text } => {
                let message = self.session.push_assistant(&id, &text);
                let _ = self.events.send(AppEvent::MessageAppended(message));
                self.set_loading(false);
            }
            ServerFrame::AudioStart { id } => {
                let sink: Box<dyn AudioSink> = if self.audio_enabled {
                    (self.sink_factory)(&id)
                } else {
                    Box::new(NullSink)
                };
                match self.assembler.start(&id, sink) {
                    Ok(()) => {
                        let _ = self.events.send(AppEvent::AudioStarted { id });
                    }
                    Err(e) => log::warn!("[audio] {}", e),
                }
            }
            ServerFrame::AudioEnd { id } => {
                if let Some(bytes) = self.assembler.finish(&id) {
                    let _ = self.events.send(AppEvent::AudioCompleted { id, bytes });
                    // Audio completion is a terminal frame for the request.
                    self.set_loading(false);
                }
            }
            ServerFrame::AudioError { id, error } => {
                self.assembler.fail(&id, &error);
                self.surface_error(format!("speech playback failed: {}", error));
                self.set_loading(false);
            }
            ServerFrame::Error { message } => {
                self.surface_error(message);
                self.set_loading(false);
            }
        }
    }

    fn handle_send(&mut self, text: &str) {
        if self.manager.state() != ConnectionState::Connected {
            self.surface_error("connection not established".to_string());
            return;
        }
        let request = self.session.build_request(text);
        let payload = match serde_json::to_string(&request) {
            Ok(p) => p,
            Err(e) => {
                self.surface_error(format!("failed to encode message: {}", e));
                return;
            }
        };
        let message = self.session.push_user(text);
        let _ = self.events.send(AppEvent::MessageAppended(message));
        self.set_loading(true);
        self.session.clear_error();
        let _ = self.events.send(AppEvent::ErrorCleared);
        if let Err(e) = self.manager.send(payload) {
            self.surface_error(e.to_string());
            self.set_loading(false);
        }
    }

    fn handle_closed(&mut self, code: u16, reason: &str) {
        log::info!("[connection] websocket closed: {} {}", code, reason);
        match self.manager.handle_close(code) {
            CloseDisposition::Terminal => {}
            CloseDisposition::Retry { attempt, delay } => {
                log::info!(
                    "[connection] scheduling reconnect {} in {}ms",
                    attempt,
                    delay.as_millis()
                );
            }
            CloseDisposition::Exhausted { attempts } => {
                log::error!("[connection] giving up after {} attempts", attempts);
                self.surface_error(ClientError::ReconnectExhausted.to_string());
            }
        }
        self.emit_status();
    }

    fn enable_audio(&mut self) {
        self.audio_enabled = true;
        let _ = self.events.send(AppEvent::AudioEnabled(true));
    }

    fn set_loading(&mut self, loading: bool) {
        if self.session.set_loading(loading) {
            let _ = self.events.send(AppEvent::LoadingChanged(loading));
        }
    }

    fn surface_error(&mut self, message: String) {
        log::warn!("[client] {}", message);
        self.session.set_error(message.clone());
        let _ = self.events.send(AppEvent::Error(message));
    }

    fn shutdown(&mut self) {
        log::info!("[client] disposing");
        self.assembler.dispose();
        self.manager.dispose();
        self.emit_status();
    }

    fn emit_status(&self) {
        let _ = self.events.send(AppEvent::ConnectionStatus {
            state: self.manager.state(),
            attempts: self.manager.attempts(),
        });
    }
}

/// Next event from the live socket, or pend forever when there is none.
async fn transport_recv(rx: &mut Option<mpsc::Receiver<TransportEvent>>) -> TransportEvent {
    match rx {
        Some(chan) => match chan.recv().await {
            Some(ev) => ev,
            // The socket task died without a close frame.
            None => TransportEvent::Closed {
                code: 1006,
                reason: "socket task ended".into(),
            },
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
