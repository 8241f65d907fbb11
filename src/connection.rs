use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite};

use crate::error::ClientError;

/// Normal-closure code; never triggers reconnection.
pub const CLOSE_NORMAL: u16 = 1000;
/// Synthetic code for transport failures that produced no close frame.
const CLOSE_ABNORMAL: u16 = 1006;

pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;
pub const RECONNECT_DELAY: Duration = Duration::from_millis(2000);

const OUTBOUND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// Human-readable status for the rendering layer.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "connection failed",
        }
    }
}

/// Fixed-delay reconnect budget. Attempts reset whenever a connection opens;
/// once the budget is spent the connection parks in `Failed` until an
/// external reset.
#[derive(Debug, Clone)]
pub struct ReconnectCounter {
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
}

impl ReconnectCounter {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Claim the next retry slot, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.delay)
    }
}

impl Default for ReconnectCounter {
    fn default() -> Self {
        Self::new(RECONNECT_MAX_ATTEMPTS, RECONNECT_DELAY)
    }
}

/// Lifecycle and frame events reported by a socket task.
#[derive(Debug)]
pub enum TransportEvent {
    Opened,
    Text(String),
    Binary(Vec<u8>),
    Closed { code: u16, reason: String },
    Error(String),
}

/// Frames pushed from the client to a socket task.
#[derive(Debug, PartialEq)]
pub enum WireFrame {
    Text(String),
    /// Graceful close with code 1000; the task exits after sending it.
    Close,
}

/// Handle to one live socket task: the single way to write to it or to shut
/// it down.
pub struct SocketHandle {
    outbound: mpsc::Sender<WireFrame>,
}

impl SocketHandle {
    pub fn new(outbound: mpsc::Sender<WireFrame>) -> Self {
        Self { outbound }
    }

    pub fn send(&self, frame: WireFrame) -> Result<(), ClientError> {
        self.outbound
            .try_send(frame)
            .map_err(|e| ClientError::Connection(format!("socket write failed: {}", e)))
    }

    /// Ask the socket task to close with 1000 and exit.
    pub fn shutdown(self) {
        let _ = self.outbound.try_send(WireFrame::Close);
    }
}

/// Seam between the connection state machine and the real network, so the
/// state machine is testable against channel-backed fakes.
pub trait Transport: Send + Sync {
    fn open(&self, url: &str, events: mpsc::Sender<TransportEvent>) -> SocketHandle;
}

/// Production transport: one spawned task per socket owning both directions.
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(&self, url: &str, events: mpsc::Sender<TransportEvent>) -> SocketHandle {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        tokio::spawn(socket_task(url.to_string(), events, outbound_rx));
        SocketHandle::new(outbound_tx)
    }
}

async fn socket_task(
    url: String,
    events: mpsc::Sender<TransportEvent>,
    mut outbound_rx: mpsc::Receiver<WireFrame>,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            log::warn!("[connection] connect failed: {}", e);
            let _ = events.send(TransportEvent::Error(e.to_string())).await;
            let _ = events
                .send(TransportEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: "connect failed".into(),
                })
                .await;
            return;
        }
    };
    log::info!("[connection] websocket connected");
    if events.send(TransportEvent::Opened).await.is_err() {
        return;
    }

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let _ = events.send(TransportEvent::Text(text.to_string())).await;
                    }
                    Some(Ok(tungstenite::Message::Binary(bytes))) => {
                        let _ = events.send(TransportEvent::Binary(bytes.into())).await;
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.to_string()),
                            None => (CLOSE_ABNORMAL, String::new()),
                        };
                        let _ = events.send(TransportEvent::Closed { code, reason }).await;
                        break;
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        let _ = events
                            .send(TransportEvent::Closed {
                                code: CLOSE_ABNORMAL,
                                reason: e.to_string(),
                            })
                            .await;
                        break;
                    }
                    None => {
                        let _ = events
                            .send(TransportEvent::Closed {
                                code: CLOSE_ABNORMAL,
                                reason: "stream ended".into(),
                            })
                            .await;
                        break;
                    }
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(WireFrame::Text(text)) => {
                        if let Err(e) = ws_tx.send(tungstenite::Message::Text(text.into())).await {
                            let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        }
                    }
                    Some(WireFrame::Close) | None => {
                        let close = tungstenite::protocol::CloseFrame {
                            code: tungstenite::protocol::frame::coding::CloseCode::Normal,
                            reason: "client closing".into(),
                        };
                        let _ = ws_tx.send(tungstenite::Message::Close(Some(close))).await;
                        let _ = events
                            .send(TransportEvent::Closed {
                                code: CLOSE_NORMAL,
                                reason: "client closing".into(),
                            })
                            .await;
                        break;
                    }
                }
            }
        }
    }
}

/// What a close event means for the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseDisposition {
    /// Intentional close; stay down.
    Terminal,
    /// Abnormal close within budget; a retry is scheduled.
    Retry { attempt: u32, delay: Duration },
    /// Budget spent; `Failed` until an external reset.
    Exhausted { attempts: u32 },
}

/// Owns the socket lifecycle and the reconnection policy.
///
/// All mutation happens on the client loop; events from a replaced socket die
/// with that socket's channel, so a stale connection can never drive the
/// state machine.
pub struct ConnectionManager {
    url: String,
    transport: Arc<dyn Transport>,
    state: ConnectionState,
    counter: ReconnectCounter,
    socket: Option<SocketHandle>,
    reconnect_at: Option<Instant>,
    disposed: bool,
}

impl ConnectionManager {
    pub fn new(url: String, transport: Arc<dyn Transport>) -> Self {
        Self::with_counter(url, transport, ReconnectCounter::default())
    }

    pub fn with_counter(
        url: String,
        transport: Arc<dyn Transport>,
        counter: ReconnectCounter,
    ) -> Self {
        Self {
            url,
            transport,
            state: ConnectionState::Disconnected,
            counter,
            socket: None,
            reconnect_at: None,
            disposed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.counter.attempts()
    }

    /// Open a socket, tearing down any live one first: there are never two
    /// sockets alive at once. Returns the event stream of the new socket.
    pub fn connect(&mut self) -> mpsc::Receiver<TransportEvent> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        if self.disposed {
            // Reads as an already-dead socket.
            return events_rx;
        }
        if let Some(old) = self.socket.take() {
            old.shutdown();
        }
        self.reconnect_at = None;
        self.state = ConnectionState::Connecting;
        log::info!("[connection] connecting to {}", self.url);
        self.socket = Some(self.transport.open(&self.url, events_tx));
        events_rx
    }

    /// Successful open: reset the budget, clear any surfaced error upstream.
    pub fn handle_open(&mut self) {
        self.state = ConnectionState::Connected;
        self.counter.reset();
    }

    /// Apply a close event. Code 1000 is terminal; any other code claims a
    /// retry slot or, once the budget is spent, parks in `Failed`.
    pub fn handle_close(&mut self, code: u16) -> CloseDisposition {
        self.socket = None;
        if self.disposed || code == CLOSE_NORMAL {
            self.state = ConnectionState::Disconnected;
            self.reconnect_at = None;
            return CloseDisposition::Terminal;
        }
        match self.counter.next_delay() {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting;
                self.reconnect_at = Some(Instant::now() + delay);
                CloseDisposition::Retry {
                    attempt: self.counter.attempts(),
                    delay,
                }
            }
            None => {
                self.state = ConnectionState::Failed;
                self.reconnect_at = None;
                CloseDisposition::Exhausted {
                    attempts: self.counter.attempts(),
                }
            }
        }
    }

    /// Deadline of the pending reconnect, if one is scheduled.
    pub fn reconnect_due(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Transmit one serialized envelope. Refused with a user-visible error
    /// unless the connection is established.
    pub fn send(&mut self, payload: String) -> Result<(), ClientError> {
        if self.state != ConnectionState::Connected {
            return Err(ClientError::Connection("connection not established".into()));
        }
        match &self.socket {
            Some(socket) => socket.send(WireFrame::Text(payload)),
            None => Err(ClientError::Connection("connection not established".into())),
        }
    }

    /// Tear down: cancel any pending reconnect and close the socket with
    /// 1000. After this no reconnect can ever fire.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.reconnect_at = None;
        if let Some(socket) = self.socket.take() {
            socket.shutdown();
        }
        self.state = ConnectionState::Disconnected;
    }

    /// External reset out of `Failed`; the next connect starts a fresh budget.
    pub fn reset(&mut self) {
        self.counter.reset();
        if self.state == ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;

    fn manager(transport: &Arc<FakeTransport>) -> ConnectionManager {
        ConnectionManager::new("ws://test/api/ws".into(), transport.clone())
    }

    #[tokio::test]
    async fn normal_close_never_schedules_a_reconnect() {
        let transport = FakeTransport::new();
        let mut mgr = manager(&transport);
        let _events = mgr.connect();

        mgr.handle_open();
        assert_eq!(mgr.state(), ConnectionState::Connected);

        let disposition = mgr.handle_close(CLOSE_NORMAL);
        assert_eq!(disposition, CloseDisposition::Terminal);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert!(mgr.reconnect_due().is_none());
    }

    #[tokio::test]
    async fn abnormal_close_schedules_exactly_one_retry() {
        let transport = FakeTransport::new();
        let mut mgr = manager(&transport);
        let _events = mgr.connect();
        mgr.handle_open();

        let disposition = mgr.handle_close(1006);
        assert_eq!(
            disposition,
            CloseDisposition::Retry {
                attempt: 1,
                delay: RECONNECT_DELAY
            }
        );
        assert_eq!(mgr.state(), ConnectionState::Reconnecting);
        assert_eq!(mgr.attempts(), 1);
        assert!(mgr.reconnect_due().is_some());
    }

    #[tokio::test]
    async fn budget_exhaustion_parks_in_failed() {
        let transport = FakeTransport::new();
        let mut mgr = manager(&transport);

        for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
            let _events = mgr.connect();
            let disposition = mgr.handle_close(1006);
            assert_eq!(
                disposition,
                CloseDisposition::Retry {
                    attempt,
                    delay: RECONNECT_DELAY
                }
            );
        }

        let _events = mgr.connect();
        let disposition = mgr.handle_close(1006);
        assert_eq!(
            disposition,
            CloseDisposition::Exhausted {
                attempts: RECONNECT_MAX_ATTEMPTS
            }
        );
        assert_eq!(mgr.state(), ConnectionState::Failed);
        assert!(mgr.reconnect_due().is_none());

        // Terminal: further closes never schedule anything.
        assert_eq!(
            mgr.handle_close(1011),
            CloseDisposition::Exhausted {
                attempts: RECONNECT_MAX_ATTEMPTS
            }
        );
        assert!(mgr.reconnect_due().is_none());
    }

    #[tokio::test]
    async fn successful_open_resets_the_budget() {
        let transport = FakeTransport::new();
        let mut mgr = manager(&transport);
        let _events = mgr.connect();
        mgr.handle_close(1006);
        mgr.handle_close(1006);
        assert_eq!(mgr.attempts(), 2);

        mgr.handle_open();
        assert_eq!(mgr.attempts(), 0);
        assert_eq!(mgr.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn connect_closes_the_prior_socket_first() {
        let transport = FakeTransport::new();
        let mut mgr = manager(&transport);
        let _first_events = mgr.connect();
        let _second_events = mgr.connect();

        assert_eq!(transport.socket_count(), 2);
        // The first socket was told to close; the second one was not.
        assert_eq!(transport.try_recv_outbound(0), Some(WireFrame::Close));
        assert_eq!(transport.try_recv_outbound(1), None);
    }

    #[tokio::test]
    async fn send_requires_an_established_connection() {
        let transport = FakeTransport::new();
        let mut mgr = manager(&transport);
        let _events = mgr.connect();

        // Still Connecting: refused, nothing written.
        let err = mgr.send("{}".into()).unwrap_err();
        assert_eq!(err.to_string(), "connection not established");
        assert_eq!(transport.try_recv_outbound(0), None);

        mgr.handle_open();
        mgr.send("{\"type\":\"chat\"}".into()).unwrap();
        assert_eq!(
            transport.try_recv_outbound(0),
            Some(WireFrame::Text("{\"type\":\"chat\"}".into()))
        );
    }

    #[tokio::test]
    async fn dispose_cancels_the_pending_reconnect() {
        let transport = FakeTransport::new();
        let mut mgr = manager(&transport);
        let _events = mgr.connect();
        mgr.handle_close(1006);
        assert!(mgr.reconnect_due().is_some());

        mgr.dispose();
        assert!(mgr.reconnect_due().is_none());
        assert_eq!(mgr.state(), ConnectionState::Disconnected);

        // Connecting after teardown is a no-op.
        let _events = mgr.connect();
        assert_eq!(transport.socket_count(), 1);
    }

    #[tokio::test]
    async fn dispose_closes_the_live_socket() {
        let transport = FakeTransport::new();
        let mut mgr = manager(&transport);
        let _events = mgr.connect();
        mgr.handle_open();

        mgr.dispose();
        assert_eq!(transport.try_recv_outbound(0), Some(WireFrame::Close));
    }

    #[tokio::test]
    async fn reset_leaves_failed_and_restores_the_budget() {
        let transport = FakeTransport::new();
        let mut mgr = ConnectionManager::with_counter(
            "ws://test/api/ws".into(),
            transport.clone(),
            ReconnectCounter::new(1, Duration::from_millis(10)),
        );
        let _events = mgr.connect();
        mgr.handle_close(1006);
        let _events = mgr.connect();
        assert_eq!(mgr.handle_close(1006), CloseDisposition::Exhausted { attempts: 1 });
        assert_eq!(mgr.state(), ConnectionState::Failed);

        mgr.reset();
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert_eq!(mgr.attempts(), 0);
    }
}
