//! Duplex connection to the listener service
//!
//! [`TransportClient`] tracks whether the link is open and refuses to send
//! otherwise; nothing is queued before the connection exists. The socket
//! itself ([`Socket`]) reports lifecycle and inbound frames through the
//! session event queue, so frames reach the orchestrator in arrival order.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::session::{EventSink, SessionEvent};
use crate::{Error, Result};

/// One message as received from the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Frame contents as text, replacing invalid UTF-8
    #[must_use]
    pub fn to_lossy_string(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Connection lifecycle signal or inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(RawFrame),
    Closed { reason: Option<String> },
    Error(String),
}

/// Link status as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Platform socket capability
pub trait Socket {
    /// Start connecting; outcome and inbound frames arrive as events
    ///
    /// # Errors
    ///
    /// Returns error if the connection attempt cannot even be started
    fn open(&mut self, events: EventSink) -> Result<()>;

    /// Transmit one binary message
    ///
    /// # Errors
    ///
    /// Returns error if the connection is gone
    fn send(&mut self, payload: Vec<u8>) -> Result<()>;

    /// Close the connection
    fn close(&mut self);
}

/// Owns the single connection to the remote service
pub struct TransportClient {
    socket: Box<dyn Socket>,
    link: LinkState,
    released: bool,
}

impl TransportClient {
    #[must_use]
    pub fn new(socket: Box<dyn Socket>) -> Self {
        Self {
            socket,
            link: LinkState::Idle,
            released: false,
        }
    }

    /// Begin establishing the connection
    ///
    /// # Errors
    ///
    /// Returns error if the socket cannot start connecting
    pub fn connect(&mut self, events: &EventSink) -> Result<()> {
        if self.link != LinkState::Idle {
            tracing::warn!(link = ?self.link, "connect ignored, link already used");
            return Ok(());
        }

        self.link = LinkState::Connecting;
        if let Err(e) = self.socket.open(events.clone()) {
            self.link = LinkState::Closed;
            return Err(e);
        }
        Ok(())
    }

    /// Track link state from a transport event
    pub fn observe(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::Opened if self.link == LinkState::Connecting => {
                self.link = LinkState::Open;
            }
            TransportEvent::Closed { .. } | TransportEvent::Error(_) => {
                self.link = LinkState::Closed;
            }
            _ => {}
        }
    }

    /// Send one payload as a single binary message
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the link is open
    pub fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        if self.link != LinkState::Open {
            return Err(Error::NotConnected);
        }
        let bytes = payload.len();
        self.socket.send(payload)?;
        tracing::debug!(bytes, "clip handed to socket");
        Ok(())
    }

    /// Close the link and release the socket; safe to repeat
    ///
    /// The socket is released even when the remote side already closed it.
    pub fn close(&mut self) {
        if !self.released {
            self.socket.close();
            self.released = true;
        }
        self.link = LinkState::Closed;
    }

    #[must_use]
    pub const fn link_state(&self) -> LinkState {
        self.link
    }
}

/// WebSocket client socket
pub struct WsSocket {
    url: String,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl WsSocket {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outbound: None,
        }
    }
}

impl Socket for WsSocket {
    fn open(&mut self, events: EventSink) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Connection(format!("no async runtime: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(run_connection(self.url.clone(), rx, events.clone()));

        // A panic inside the connection task is not a network condition
        runtime.spawn(async move {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::error!(error = %e, "connection task panicked");
                events.emit(SessionEvent::Fault(format!("connection task panicked: {e}")));
            }
        });

        self.outbound = Some(tx);
        Ok(())
    }

    fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        let tx = self.outbound.as_ref().ok_or(Error::NotConnected)?;
        tx.send(payload).map_err(|_| Error::ConnectionClosed)
    }

    fn close(&mut self) {
        // Dropping the sender makes the connection task send a close frame
        self.outbound = None;
    }
}

async fn run_connection(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: EventSink,
) {
    tracing::info!(%url, "connecting");

    let (ws, _response) = match connect_async(url.as_str()).await {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!(%url, error = %e, "websocket connect failed");
            fail(&events, e.to_string());
            return;
        }
    };

    tracing::info!(%url, "websocket connection established");
    events.emit(TransportEvent::Opened);

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else {
                    if let Err(e) = sink.close().await {
                        tracing::debug!(error = %e, "close handshake failed");
                    }
                    events.emit(TransportEvent::Closed {
                        reason: Some("closed locally".to_string()),
                    });
                    return;
                };

                let bytes = payload.len();
                if let Err(e) = sink.send(Message::Binary(payload.into())).await {
                    tracing::warn!(error = %e, "websocket send failed");
                    fail(&events, e.to_string());
                    return;
                }
                tracing::debug!(bytes, "binary frame sent");
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Frame(RawFrame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    events.emit(TransportEvent::Frame(RawFrame::Binary(bytes.to_vec())));
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.as_str().to_owned());
                    tracing::info!(?reason, "websocket connection closed by server");
                    events.emit(TransportEvent::Closed { reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "websocket receive failed");
                    fail(&events, e.to_string());
                    return;
                }
                None => {
                    tracing::info!("websocket stream ended");
                    events.emit(TransportEvent::Closed { reason: None });
                    return;
                }
            }
        }
    }
}

/// Report an error; the link is unusable afterwards so a close always follows
fn fail(events: &EventSink, error: String) {
    events.emit(TransportEvent::Error(error));
    events.emit(TransportEvent::Closed { reason: None });
}
