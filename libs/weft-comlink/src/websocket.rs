//! WebSocket Protocol Implementation
//!
//! Duplex streaming over a single session. The first `send` performs the
//! handshake (path variables and query parameters are connection-time-only);
//! a background reader appends every inbound frame to the delivery queue and
//! `receive` classifies frames by wire representation before decoding.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::communicator::{CommunicationClient, Communicator, CommunicatorKind};
use crate::error::{ComlinkError, CommStatus, Result};
use crate::identity::derive_client_identity;
use crate::payload::{MediaKind, MessageMeta, PayloadDecoder, PayloadResolver};
use crate::profile::{
    CommunicationProperties, InterfaceProfile, MessageProperties, ProfileKey, Protocol,
};
use crate::tls::build_tls_context;
use crate::uri;

const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 30_000;

/// Protocol-scoped factory for WebSocket clients.
pub struct WebsocketCommunicator {
    props: Option<CommunicationProperties>,
    decoder: Option<Arc<dyn PayloadDecoder>>,
    client_identity: Option<String>,
    tls_context: Option<Arc<rustls::ClientConfig>>,
    connection_timeout_ms: u64,
}

impl std::fmt::Debug for WebsocketCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebsocketCommunicator")
            .field("client_identity", &self.client_identity)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("secure", &self.tls_context.is_some())
            .finish_non_exhaustive()
    }
}

impl WebsocketCommunicator {
    pub fn new() -> Self {
        Self {
            props: None,
            decoder: None,
            client_identity: None,
            tls_context: None,
            connection_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }

    pub fn set_connection_timeout(&mut self, milliseconds: u64) {
        self.connection_timeout_ms = milliseconds;
    }

    pub fn client_identity(&self) -> Option<&str> {
        self.client_identity.as_deref()
    }
}

impl Default for WebsocketCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Communicator for WebsocketCommunicator {
    fn kind(&self) -> CommunicatorKind {
        CommunicatorKind::Websocket
    }

    fn properties(&mut self, props: CommunicationProperties) -> Result<()> {
        self.props = Some(props);
        Ok(())
    }

    fn decoder(&mut self, decoder: Arc<dyn PayloadDecoder>) -> Result<()> {
        self.decoder = Some(decoder);
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        let props = self
            .props
            .as_ref()
            .ok_or_else(|| ComlinkError::developer("CommunicationProperties is not set"))?;

        let identity = derive_client_identity(&props.keystore_path)?;
        let tls = build_tls_context(props)?;
        debug!(identity = %identity, "WebSocket communicator initialized");

        self.client_identity = Some(identity);
        self.tls_context = Some(tls);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.tls_context.is_some() && self.decoder.is_some()
    }

    fn client(&self, profile: InterfaceProfile) -> Result<Box<dyn CommunicationClient>> {
        if !self.is_initialized() {
            return Err(ComlinkError::initialization(
                "WebsocketCommunicator is not initialized",
            ));
        }
        let decoder = self
            .decoder
            .as_ref()
            .ok_or_else(|| ComlinkError::developer("PayloadDecoder is not set"))?;

        let client = WebsocketClient::new(
            self.client_identity.clone(),
            self.tls_context.clone(),
            self.connection_timeout_ms,
            profile,
            Arc::clone(decoder),
        )?;
        Ok(Box::new(client))
    }
}

/// Inbound frame classified by wire representation
#[derive(Debug)]
enum InboundFrame {
    Binary(Vec<u8>),
    Text(String),
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Session {
    writer: SplitSink<WsStream, Message>,
    queue: mpsc::UnboundedReceiver<InboundFrame>,
    reader: JoinHandle<()>,
}

/// One WebSocket session bound to a single endpoint profile. The connection
/// opens lazily on the first `send`.
pub struct WebsocketClient {
    client_identity: Option<String>,
    tls_context: Option<Arc<rustls::ClientConfig>>,
    handshake_timeout: Duration,
    profile: InterfaceProfile,
    decoder: Arc<dyn PayloadDecoder>,
    session: Option<Session>,
}

impl std::fmt::Debug for WebsocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebsocketClient")
            .field("client_identity", &self.client_identity)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl WebsocketClient {
    /// Build a client from shared communicator state. A `None` TLS context
    /// yields a plain `ws://` client (loopback testing).
    pub fn new(
        client_identity: Option<String>,
        tls_context: Option<Arc<rustls::ClientConfig>>,
        connection_timeout_ms: u64,
        profile: InterfaceProfile,
        decoder: Arc<dyn PayloadDecoder>,
    ) -> Result<Self> {
        profile.require_protocol(Protocol::Websocket, "WebsocketClient")?;
        if profile.get_str(ProfileKey::Address)?.trim().is_empty() {
            return Err(ComlinkError::developer("address is empty"));
        }
        profile.get_port(ProfileKey::Port)?;

        Ok(Self {
            client_identity,
            tls_context,
            handshake_timeout: Duration::from_millis(connection_timeout_ms),
            profile,
            decoder,
            session: None,
        })
    }

    fn handshake_uri(&self, props: &MessageProperties) -> Result<Url> {
        let scheme = if self.tls_context.is_some() { "wss" } else { "ws" };
        let path = if self.profile.contains(ProfileKey::Path) {
            Some(self.profile.get_str(ProfileKey::Path)?)
        } else {
            None
        };
        uri::compose(
            scheme,
            self.profile.get_str(ProfileKey::Address)?,
            self.profile.get_port(ProfileKey::Port)?,
            path,
            &props.path_variables,
            &props.query_params,
        )
    }

    async fn connect(&mut self, props: &MessageProperties) -> Result<()> {
        let uri = self.handshake_uri(props)?;
        let connector = match &self.tls_context {
            Some(tls) => Connector::Rustls(Arc::clone(tls)),
            None => Connector::Plain,
        };

        let partial_support = self
            .profile
            .get_flag_or(ProfileKey::PartialMessageSupport, false);
        debug!(
            uri = %uri,
            identity = self.client_identity.as_deref().unwrap_or(""),
            partial_support,
            "performing WebSocket handshake"
        );
        let handshake =
            connect_async_tls_with_config(uri.as_str(), None, false, Some(connector));
        let (stream, _) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| ComlinkError::timeout(format!("handshake timed out for {}", uri)))?
            .map_err(|e| {
                ComlinkError::communication(
                    CommStatus::ServiceUnavailable,
                    format!("handshake with {} failed: {}", uri, e),
                )
            })?;

        let (writer, reader_half) = stream.split();
        let (tx, queue) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_frames(reader_half, tx));

        self.session = Some(Session {
            writer,
            queue,
            reader,
        });
        Ok(())
    }

    async fn next_frame(&mut self, timed: bool) -> Result<InboundFrame> {
        let timeout = self.handshake_timeout;
        let session = self.session.as_mut().ok_or_else(|| {
            ComlinkError::protocol_violation("connection has not been established")
        })?;

        let received = if timed {
            tokio::time::timeout(timeout, session.queue.recv())
                .await
                .map_err(|_| ComlinkError::timeout("no frame received within the timeout"))?
        } else {
            session.queue.recv().await
        };

        received.ok_or_else(|| {
            ComlinkError::communication(
                CommStatus::ServiceUnavailable,
                "WebSocket session closed by the remote endpoint",
            )
        })
    }
}

/// Reader half: queue insertion only, no decoding on this task.
async fn read_frames(
    mut reader: SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<InboundFrame>,
) {
    while let Some(next) = reader.next().await {
        match next {
            Ok(Message::Binary(payload)) => {
                if tx.send(InboundFrame::Binary(payload.to_vec())).is_err() {
                    break;
                }
            }
            Ok(Message::Text(payload)) => {
                if tx.send(InboundFrame::Text(payload.as_str().to_owned())).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}

#[async_trait]
impl CommunicationClient for WebsocketClient {
    async fn send(
        &mut self,
        props: Option<&MessageProperties>,
        payload: Option<&Value>,
    ) -> Result<()> {
        let payload = payload.ok_or_else(|| ComlinkError::developer("payload is null"))?;
        let defaults = MessageProperties::default();
        let props = props.unwrap_or(&defaults);

        if self.session.is_none() {
            self.connect(props).await?;
        } else if !props.path_variables.is_empty() {
            return Err(ComlinkError::protocol_violation(
                "cannot send path variables after the connection call",
            ));
        } else if !props.query_params.is_empty() {
            return Err(ComlinkError::protocol_violation(
                "cannot send query parameters after the connection call",
            ));
        }

        let bytes = serde_json::to_vec(payload)?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ComlinkError::protocol_violation("connection has not been established"))?;
        session.writer.send(Message::Binary(bytes.into())).await?;
        Ok(())
    }

    async fn receive(
        &mut self,
        props: Option<&MessageProperties>,
        resolver: &mut PayloadResolver,
    ) -> Result<()> {
        let defaults = MessageProperties::default();
        let props = props.unwrap_or(&defaults);

        let frame = self.next_frame(props.timed_receive).await?;
        match frame {
            InboundFrame::Binary(payload) => {
                let meta = MessageMeta::Websocket { binary: true };
                if payload.is_empty() {
                    resolver.add_raw(meta);
                    return Ok(());
                }
                resolver.add_decoded_bytes(&*self.decoder, MediaKind::Json, &payload, meta)
            }
            InboundFrame::Text(payload) => {
                let meta = MessageMeta::Websocket { binary: false };
                if payload.is_empty() {
                    resolver.add_raw(meta);
                    return Ok(());
                }
                resolver.add_decoded_str(&*self.decoder, MediaKind::Json, &payload, meta)
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            // best effort close frame, the reader task is stopped either way
            let _ = session.writer.send(Message::Close(None)).await;
            session.reader.abort();
            debug!("WebSocket session terminated");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::JsonDecoder;

    fn ws_profile() -> InterfaceProfile {
        InterfaceProfile::new(Protocol::Websocket)
            .with(ProfileKey::Address, "localhost")
            .unwrap()
            .with(ProfileKey::Port, 9443u16)
            .unwrap()
            .with(ProfileKey::Path, "/stream")
            .unwrap()
    }

    fn plain_client(profile: InterfaceProfile) -> Result<WebsocketClient> {
        WebsocketClient::new(None, None, 1000, profile, Arc::new(JsonDecoder::new()))
    }

    #[test]
    fn test_client_requires_websocket_profile() {
        let profile = InterfaceProfile::new(Protocol::Http)
            .with(ProfileKey::Address, "localhost")
            .unwrap();
        assert!(matches!(
            plain_client(profile),
            Err(ComlinkError::Developer(_))
        ));
    }

    #[test]
    fn test_handshake_uri_parameters() {
        let client = plain_client(ws_profile()).unwrap();
        let props = MessageProperties::new()
            .with_path_variables(["sensors"])
            .with_query_params(["room", "1"]);
        let uri = client.handshake_uri(&props).unwrap();
        assert_eq!(uri.as_str(), "ws://localhost:9443/stream/sensors?room=1");
    }

    #[tokio::test]
    async fn test_receive_before_connection_fails() {
        let mut client = plain_client(ws_profile()).unwrap();
        let mut resolver = PayloadResolver::new();
        let err = client.receive(None, &mut resolver).await.unwrap_err();
        assert_eq!(err.status(), Some(CommStatus::ProtocolViolation));
    }

    #[tokio::test]
    async fn test_send_requires_payload() {
        let mut client = plain_client(ws_profile()).unwrap();
        let err = client.send(None, None).await.unwrap_err();
        assert!(matches!(err, ComlinkError::Developer(_)));
    }

    #[test]
    fn test_communicator_client_before_initialize_fails() {
        let communicator = WebsocketCommunicator::new();
        let err = communicator.client(ws_profile()).unwrap_err();
        assert!(matches!(err, ComlinkError::Initialization(_)));
    }
}
