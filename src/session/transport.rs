//! Realtime transports.
//!
//! A transport turns a credential into a pair of channels: client messages
//! go out, decoded server events come back. [`WebSocketTransport`] is the
//! production implementation; tests plug in in-memory transports.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{
    ClientMessage, ServerEvent, audio_append_event, parse_server_event, session_update,
    text_message_events,
};
use crate::config::VoiceConfig;
use crate::error::{AvatarError, Result};

/// Channel capacity in each direction.
const CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Both halves of an open realtime connection.
///
/// Dropping `outbound` closes the connection; `inbound` ends when the
/// remote side goes away.
#[derive(Debug)]
pub struct Connection {
    /// Messages to send.
    pub outbound: mpsc::Sender<ClientMessage>,
    /// Decoded events received.
    pub inbound: mpsc::Receiver<ServerEvent>,
}

/// Opens realtime connections.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Connect with `credential` and configure the remote session.
    async fn connect(&self, credential: &str, config: &VoiceConfig) -> Result<Connection>;
}

/// Realtime transport over a WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    beta_header: bool,
}

impl WebSocketTransport {
    /// Transport speaking the current protocol.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also send `OpenAI-Beta: realtime=v1`, needed by preview models.
    #[must_use]
    pub fn with_beta_header(mut self, enabled: bool) -> Self {
        self.beta_header = enabled;
        self
    }
}

/// Endpoint URL for `config`, with the model as a query parameter.
///
/// # Errors
///
/// Returns [`AvatarError::Config`] when `realtime_url` is not a URL.
pub fn endpoint(config: &VoiceConfig) -> Result<Url> {
    let mut url = Url::parse(&config.realtime_url)
        .map_err(|e| AvatarError::Config(format!("invalid realtime_url: {e}")))?;
    url.query_pairs_mut().append_pair("model", &config.model);
    Ok(url)
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn connect(&self, credential: &str, config: &VoiceConfig) -> Result<Connection> {
        let url = endpoint(config)?;
        info!(host = url.host_str().unwrap_or_default(), model = %config.model, "connecting realtime session");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| AvatarError::Session(format!("failed to build request: {e}")))?;
        let auth = format!("Bearer {credential}")
            .parse()
            .map_err(|_| AvatarError::Session("credential is not a valid header value".into()))?;
        request.headers_mut().insert("Authorization", auth);
        if self.beta_header {
            request
                .headers_mut()
                .insert("OpenAI-Beta", http_value("realtime=v1")?);
        }

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| AvatarError::Session(format!("failed to connect: {e}")))?;
        let (mut sink, stream) = ws.split();

        let update = session_update(config).to_string();
        sink.send(WsMessage::Text(update))
            .await
            .map_err(|e| AvatarError::Session(format!("failed to send session.update: {e}")))?;
        debug!("session.update sent");

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(outbound_loop(outbound_rx, sink));
        tokio::spawn(inbound_loop(stream, inbound_tx));

        Ok(Connection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

fn http_value(value: &str) -> Result<tokio_tungstenite::tungstenite::http::HeaderValue> {
    value
        .parse()
        .map_err(|_| AvatarError::Session(format!("invalid header value: {value}")))
}

async fn outbound_loop(
    mut rx: mpsc::Receiver<ClientMessage>,
    mut sink: SplitSink<WsStream, WsMessage>,
) {
    while let Some(msg) = rx.recv().await {
        let frames = match msg {
            ClientMessage::Text(text) => text_message_events(&text).to_vec(),
            ClientMessage::Audio(samples) => vec![audio_append_event(&samples)],
            ClientMessage::Close => break,
        };
        for frame in frames {
            if let Err(e) = sink.send(WsMessage::Text(frame.to_string())).await {
                warn!(error = %e, "realtime send failed, closing outbound loop");
                return;
            }
        }
    }
    let _ = sink.send(WsMessage::Close(None)).await;
    debug!("realtime outbound loop terminated");
}

async fn inbound_loop(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<ServerEvent>) {
    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(WsMessage::Text(text)) => match parse_server_event(&text) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed server event");
                    continue;
                }
            },
            Ok(WsMessage::Close(frame)) => {
                info!(close_frame = ?frame, "realtime connection closed by server");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = tx
                    .send(ServerEvent::Error {
                        message: format!("WebSocket error: {e}"),
                    })
                    .await;
                break;
            }
        };
        if tx.send(event).await.is_err() {
            debug!("event receiver dropped, closing inbound loop");
            return;
        }
    }
    debug!("realtime inbound loop terminated");
}
