//! Channel-backed fakes shared by the state-machine tests.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::connection::{SocketHandle, Transport, TransportEvent, WireFrame};

pub struct FakeSocket {
    pub events: mpsc::Sender<TransportEvent>,
    pub outbound: mpsc::Receiver<WireFrame>,
}

/// Transport that records every opened socket. Tests inject
/// `TransportEvent`s through `event_sender` and observe outbound frames
/// through `try_recv_outbound`; no network is involved.
pub struct FakeTransport {
    sockets: Mutex<Vec<FakeSocket>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sockets: Mutex::new(Vec::new()),
        })
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    /// Event sender of the `idx`-th opened socket.
    pub fn event_sender(&self, idx: usize) -> mpsc::Sender<TransportEvent> {
        self.sockets.lock().unwrap()[idx].events.clone()
    }

    /// Next frame the client wrote to the `idx`-th socket, if any.
    pub fn try_recv_outbound(&self, idx: usize) -> Option<WireFrame> {
        self.sockets.lock().unwrap()[idx].outbound.try_recv().ok()
    }
}

impl Transport for FakeTransport {
    fn open(&self, _url: &str, events: mpsc::Sender<TransportEvent>) -> SocketHandle {
        let (outbound_tx, outbound_rx) = mpsc::channel(32);
        self.sockets.lock().unwrap().push(FakeSocket {
            events,
            outbound: outbound_rx,
        });
        SocketHandle::new(outbound_tx)
    }
}
