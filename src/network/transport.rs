use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::TransportError;

/// Raw happenings on one physical socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Text(String),
    Binary(Vec<u8>),
    Disconnected,
}

/// One open socket.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, frame: String) -> Result<(), TransportError>;

    async fn disconnect(&self);
}

/// Opens sockets; the channel asks for a fresh one on every (re)connect.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_transport(
        &self,
        endpoint: &Url,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError>;
}

/// `http(s)://host[:port]/...` -> `ws(s)://host[:port]/ws`.
pub fn socket_endpoint(origin: &str) -> Result<Url, TransportError> {
    let origin = Url::parse(origin)
        .map_err(|err| TransportError::InvalidEndpoint(format!("{origin}: {err}")))?;
    let scheme = match origin.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme `{other}`"
            )));
        }
    };
    let host = origin
        .host_str()
        .ok_or_else(|| TransportError::InvalidEndpoint(format!("{origin} has no host")))?;
    let authority = match origin.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    Url::parse(&format!("{scheme}://{authority}/ws"))
        .map_err(|err| TransportError::InvalidEndpoint(err.to_string()))
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

pub struct TungsteniteTransport {
    sink: Mutex<Option<WsSink>>,
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn send_text(&self, frame: String) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::Closed)?;
        log::debug!("--> {} byte frame", frame.len());
        sink.send(Message::text(frame))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(err) = sink.close().await {
                log::debug!("Error while closing websocket: {err}");
            }
        }
    }
}

/// Production factory over `tokio-tungstenite`.
pub struct TungsteniteTransportFactory {
    session_cookie: Option<String>,
}

impl TungsteniteTransportFactory {
    pub fn new(session_cookie: Option<String>) -> Self {
        Self { session_cookie }
    }
}

#[async_trait]
impl TransportFactory for TungsteniteTransportFactory {
    async fn create_transport(
        &self,
        endpoint: &Url,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError> {
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|err| TransportError::InvalidEndpoint(err.to_string()))?;
        if let Some(cookie) = &self.session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|err| TransportError::Connect(format!("bad session cookie: {err}")))?;
            request.headers_mut().insert(COOKIE, value);
        }

        log::info!("Dialing {endpoint}");
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let (sink, stream) = ws.split();

        let (event_tx, event_rx) = mpsc::channel(100);
        let _ = event_tx.send(TransportEvent::Connected).await;
        tokio::spawn(read_pump(stream, event_tx));

        let transport = Arc::new(TungsteniteTransport {
            sink: Mutex::new(Some(sink)),
        });
        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => TransportEvent::Text(text.to_string()),
            Ok(Message::Binary(data)) => TransportEvent::Binary(data.to_vec()),
            Ok(Message::Close(reason)) => {
                log::trace!("Received close frame: {reason:?}");
                break;
            }
            // ping/pong are answered by tungstenite itself
            Ok(_) => continue,
            Err(err) => {
                log::warn!("Error reading from websocket: {err}");
                break;
            }
        };
        if event_tx.send(event).await.is_err() {
            log::debug!("Channel worker dropped, closing read pump");
            return;
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
