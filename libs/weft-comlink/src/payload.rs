//! Payload Decode Pipeline
//!
//! `PayloadDecoder` turns raw transport payloads into `serde_json::Value`
//! by media kind; `PayloadResolver` accumulates the decoded value together
//! with the transport metadata and error/partial flags for one received
//! message. One resolver per message, discarded after the caller reads it.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ComlinkError, Result};

/// Media kind of a transport payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Empty,
    Text,
    Json,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Empty => write!(f, "EMPTY"),
            MediaKind::Text => write!(f, "TEXT"),
            MediaKind::Json => write!(f, "JSON"),
        }
    }
}

/// Codec used by every client a communicator creates. Object-safe so the
/// same decoder instance can be shared across protocols.
pub trait PayloadDecoder: Send + Sync {
    fn decode_bytes(&self, media: MediaKind, payload: &[u8]) -> Result<Value>;

    fn decode_str(&self, media: MediaKind, payload: &str) -> Result<Value>;
}

/// JSON-backed decoder; TEXT payloads are expected to carry JSON as well.
#[derive(Debug, Default, Clone)]
pub struct JsonDecoder;

impl JsonDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl PayloadDecoder for JsonDecoder {
    fn decode_bytes(&self, media: MediaKind, payload: &[u8]) -> Result<Value> {
        match media {
            MediaKind::Empty => Ok(Value::Null),
            MediaKind::Text | MediaKind::Json => {
                if payload.is_empty() {
                    return Err(ComlinkError::developer("payload is empty"));
                }
                serde_json::from_slice(payload).map_err(|e| ComlinkError::decode(e.to_string()))
            }
        }
    }

    fn decode_str(&self, media: MediaKind, payload: &str) -> Result<Value> {
        match media {
            MediaKind::Empty => Ok(Value::Null),
            MediaKind::Text | MediaKind::Json => {
                if payload.is_empty() {
                    return Err(ComlinkError::developer("payload is empty"));
                }
                serde_json::from_str(payload).map_err(|e| ComlinkError::decode(e.to_string()))
            }
        }
    }
}

/// Transport metadata retained alongside the decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum MessageMeta {
    Http {
        status: u16,
    },
    Mqtt {
        topic: String,
        qos: u8,
        retained: bool,
    },
    Websocket {
        binary: bool,
    },
}

/// Accumulator pairing one decoded value with error/partial flags.
#[derive(Debug, Default)]
pub struct PayloadResolver {
    value: Option<Value>,
    meta: Option<MessageMeta>,
    client_error: bool,
    client_error_message: Option<String>,
    partial: bool,
}

impl PayloadResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `payload` through the shared decoder and store the result
    /// together with the transport metadata.
    pub fn add_decoded_bytes(
        &mut self,
        decoder: &dyn PayloadDecoder,
        media: MediaKind,
        payload: &[u8],
        meta: MessageMeta,
    ) -> Result<()> {
        self.value = Some(decoder.decode_bytes(media, payload)?);
        self.meta = Some(meta);
        Ok(())
    }

    pub fn add_decoded_str(
        &mut self,
        decoder: &dyn PayloadDecoder,
        media: MediaKind,
        payload: &str,
        meta: MessageMeta,
    ) -> Result<()> {
        self.value = Some(decoder.decode_str(media, payload)?);
        self.meta = Some(meta);
        Ok(())
    }

    /// Surface the transport message without decoding (empty/absent payload).
    pub fn add_raw(&mut self, meta: MessageMeta) {
        self.meta = Some(meta);
    }

    pub fn set_client_error(&mut self, message: impl Into<String>) {
        self.client_error = true;
        self.client_error_message = Some(message.into());
    }

    pub fn set_partial(&mut self, partial: bool) {
        self.partial = partial;
    }

    /// Typed extraction of the decoded value. `None` when the message had
    /// no decodable payload; conversion failures surface as decode errors.
    pub fn value<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.value {
            None => Ok(None),
            Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| ComlinkError::decode(e.to_string())),
        }
    }

    pub fn raw_value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn meta(&self) -> Option<&MessageMeta> {
        self.meta.as_ref()
    }

    pub fn is_client_error(&self) -> bool {
        self.client_error
    }

    pub fn client_error_message(&self) -> Option<&str> {
        self.client_error_message.as_deref()
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Whether a message (decoded or raw) has been delivered to this resolver
    pub fn is_resolved(&self) -> bool {
        self.value.is_some() || self.meta.is_some()
    }
}
