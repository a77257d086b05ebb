//! WebSocket transport to the protocol endpoint.
//!
//! The endpoint holds the actual messaging-network session and speaks the
//! JSON frames in [`frame`]. One connection carries one session: a writer
//! task drains outgoing frames, a reader task turns incoming frames into
//! [`ProtocolEvent`]s or resolves pending requests.

mod frame;

pub use frame::*;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::protocol::{
    Connection, Connector, OutgoingContent, ProtocolError, ProtocolSession, RequestTracker,
};
use crate::store::Credentials;
use crate::types::{
    ConnectionPhase, ConnectionUpdate, DisconnectReason, MessageKey, ProtocolEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events buffered between the reader task and the session pump.
const EVENT_BUFFER: usize = 64;

/// Connects to a protocol endpoint at a fixed WebSocket URL.
#[derive(Debug, Clone)]
pub struct SidecarConnector {
    endpoint: String,
}

impl SidecarConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Connector for SidecarConnector {
    async fn connect(&self, credentials: Credentials) -> Result<Connection, ProtocolError> {
        let (ws, _response) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;
        let (mut sink, stream) = ws.split();

        let init = serde_json::to_string(&ClientFrame::Init { creds: credentials })?;
        sink.send(Message::Text(init))
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        debug!(endpoint = %self.endpoint, "protocol endpoint connected");

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let tracker = Arc::new(RequestTracker::new());

        // The writer stops on its own once the close frame is out or every
        // sender is gone.
        tokio::spawn(write_loop(sink, outgoing_rx));
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&tracker), events_tx));

        let session = Arc::new(SidecarSession {
            outgoing,
            tracker,
            reader: Mutex::new(Some(reader)),
        });
        Ok(Connection { session, events })
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "protocol endpoint write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    tracker: Arc<RequestTracker>,
    events: mpsc::Sender<ProtocolEvent>,
) {
    let mut reported_close = false;

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "protocol endpoint read failed");
                break;
            }
        };

        let frame = match serde_json::from_str::<ServerFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "ignoring unrecognised frame");
                continue;
            }
        };

        if let ServerFrame::Result(result) = frame {
            let id = result.id.clone();
            if !tracker.complete(&id, result.into_outcome()) {
                debug!(%id, "result for unknown request");
            }
            continue;
        }

        if let ServerFrame::ConnectionUpdate(update) = &frame {
            reported_close |= update.connection == Some(ConnectionPhase::Close);
        }
        if let Some(event) = frame.into_event() {
            if events.send(event).await.is_err() {
                break;
            }
        }
    }

    tracker.fail_all("protocol endpoint closed");
    if !reported_close {
        let code = DisconnectReason::ConnectionClosed.status_code();
        let _ = events
            .send(ProtocolEvent::ConnectionUpdate(ConnectionUpdate::closed(
                code,
                "Connection Closed",
            )))
            .await;
    }
}

/// A session living behind one protocol endpoint connection.
pub struct SidecarSession {
    outgoing: mpsc::UnboundedSender<Message>,
    tracker: Arc<RequestTracker>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SidecarSession {
    async fn request(&self, id: String, frame: ClientFrame) -> Result<(), ProtocolError> {
        let rx = self.tracker.register(&id);
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                self.tracker.cancel(&id);
                return Err(e.into());
            }
        };
        if self.outgoing.send(Message::Text(text)).is_err() {
            self.tracker.cancel(&id);
            return Err(ProtocolError::Closed);
        }

        match rx.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(reason)) => Err(ProtocolError::Request(reason)),
            Err(_) => Err(ProtocolError::Closed),
        }
    }
}

#[async_trait]
impl ProtocolSession for SidecarSession {
    async fn send(&self, jid: &str, content: OutgoingContent) -> Result<(), ProtocolError> {
        let id = self.tracker.next_id();
        let frame = ClientFrame::Send {
            id: id.clone(),
            jid: jid.to_string(),
            content,
        };
        self.request(id, frame).await
    }

    async fn mark_read(&self, keys: &[MessageKey]) -> Result<(), ProtocolError> {
        let id = self.tracker.next_id();
        let frame = ClientFrame::Read {
            id: id.clone(),
            keys: keys.to_vec(),
        };
        self.request(id, frame).await
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        let id = self.tracker.next_id();
        self.request(id.clone(), ClientFrame::Logout { id }).await
    }

    async fn end(&self) {
        if self.outgoing.send(Message::Close(None)).is_err() {
            debug!("protocol endpoint writer already stopped");
        }
        let reader = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(reader) = reader {
            reader.abort();
        }
        self.tracker.fail_all("session ended");
    }
}

impl Drop for SidecarSession {
    fn drop(&mut self) {
        let reader = self.reader.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(reader) = reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    type ServerSocket = WebSocketStream<TcpStream>;

    async fn endpoint() -> (String, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (url, listener)
    }

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (tcp, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(tcp).await.unwrap()
    }

    async fn next_json(ws: &mut ServerSocket) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn push(ws: &mut ServerSocket, frame: Value) {
        ws.send(Message::Text(frame.to_string())).await.unwrap();
    }

    async fn connected() -> (Connection, ServerSocket, Value) {
        let (url, listener) = endpoint().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let init = next_json(&mut ws).await;
            (ws, init)
        });

        let mut creds = Credentials::new();
        creds.insert("creds", json!({ "registered": true }));
        let connection = SidecarConnector::new(url).connect(creds).await.unwrap();
        let (ws, init) = server.await.unwrap();
        (connection, ws, init)
    }

    #[tokio::test]
    async fn test_connect_sends_init_with_credentials() {
        let (_connection, _ws, init) = connected().await;
        assert_eq!(init["type"], "init");
        assert_eq!(init["creds"]["creds"]["registered"], true);
    }

    #[tokio::test]
    async fn test_connect_unreachable_endpoint() {
        let (url, listener) = endpoint().await;
        drop(listener);
        let result = SidecarConnector::new(url).connect(Credentials::new()).await;
        assert!(matches!(result, Err(ProtocolError::Connect(_))));
    }

    #[tokio::test]
    async fn test_frames_become_events() {
        let (mut connection, mut ws, _) = connected().await;
        push(
            &mut ws,
            json!({ "type": "connection.update", "data": { "qr": "2@ref" } }),
        )
        .await;
        push(
            &mut ws,
            json!({ "type": "creds.update", "data": { "creds": { "registered": true } } }),
        )
        .await;

        let ProtocolEvent::ConnectionUpdate(update) = connection.events.recv().await.unwrap() else {
            panic!("expected connection update");
        };
        assert_eq!(update.qr.as_deref(), Some("2@ref"));
        assert!(matches!(
            connection.events.recv().await.unwrap(),
            ProtocolEvent::CredsUpdate(_)
        ));
    }

    #[tokio::test]
    async fn test_send_resolves_with_result_frame() {
        let (connection, mut ws, _) = connected().await;
        let session = Arc::clone(&connection.session);
        let send = tokio::spawn(async move {
            session
                .send("5511@s.whatsapp.net", OutgoingContent::text("oi"))
                .await
        });

        let request = next_json(&mut ws).await;
        assert_eq!(request["type"], "send");
        assert_eq!(request["jid"], "5511@s.whatsapp.net");
        assert_eq!(request["content"]["text"], "oi");
        push(
            &mut ws,
            json!({ "type": "result", "data": { "id": request["id"], "ok": true } }),
        )
        .await;

        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rejected_request_is_an_error() {
        let (connection, mut ws, _) = connected().await;
        let session = Arc::clone(&connection.session);
        let logout = tokio::spawn(async move { session.logout().await });

        let request = next_json(&mut ws).await;
        assert_eq!(request["type"], "logout");
        push(
            &mut ws,
            json!({ "type": "result", "data": { "id": request["id"], "ok": false, "error": "boom" } }),
        )
        .await;

        let err = logout.await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::Request(ref reason) if reason == "boom"));
    }

    #[tokio::test]
    async fn test_socket_close_surfaces_as_connection_closed() {
        let (mut connection, mut ws, _) = connected().await;
        let session = Arc::clone(&connection.session);
        let pending = tokio::spawn(async move { session.mark_read(&[]).await });
        let _ = next_json(&mut ws).await;
        ws.close(None).await.unwrap();

        let ProtocolEvent::ConnectionUpdate(update) = connection.events.recv().await.unwrap() else {
            panic!("expected connection update");
        };
        assert_eq!(update.connection, Some(ConnectionPhase::Close));
        assert_eq!(update.last_disconnect.unwrap().status_code, Some(428));
        assert!(matches!(
            pending.await.unwrap(),
            Err(ProtocolError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_reported_close_is_not_duplicated() {
        let (mut connection, mut ws, _) = connected().await;
        push(
            &mut ws,
            json!({
                "type": "connection.update",
                "data": { "connection": "close", "lastDisconnect": { "statusCode": 515 } }
            }),
        )
        .await;
        ws.close(None).await.unwrap();

        let first = connection.events.recv().await.unwrap();
        assert!(matches!(first, ProtocolEvent::ConnectionUpdate(_)));
        assert!(connection.events.recv().await.is_none());
    }
}
