//! Weft Communication Link Library
//!
//! Protocol-agnostic client abstractions for the Weft service-discovery
//! middleware: registry clients talk to remote endpoints over HTTPS, MQTT or
//! WebSocket through one uniform send/receive contract, while each protocol
//! privately handles connection setup, mutual-TLS identity, message framing
//! and delivery semantics.
//!
//! # Architecture
//!
//! - **Profile Model**: [`InterfaceProfile`], [`MessageProperties`],
//!   [`CommunicationProperties`]: immutable endpoint/call descriptors
//! - **Payload Pipeline**: [`PayloadDecoder`], [`PayloadResolver`]: typed
//!   decoding plus error/partial flags per received message
//! - **TLS Identity**: end-entity certificate selection and client identity
//!   derivation from the keystore
//! - **Communicators**: [`HttpsCommunicator`], [`MqttCommunicator`],
//!   [`WebsocketCommunicator`]: protocol-scoped factories minting
//!   [`CommunicationClient`] sessions bound to one profile each
//!
//! Communicators are configured (`properties`, `decoder`), initialized once,
//! and then shared read-only; each client owns its session exclusively.

pub mod communicator;
pub mod error;
pub mod http;
pub mod identity;
pub mod mqtt;
pub mod payload;
pub mod profile;
pub mod tls;
mod uri;
pub mod websocket;

// Re-export core types
pub use communicator::{CommunicationClient, Communicator, CommunicatorKind};
pub use error::{ComlinkError, CommStatus, Result};
pub use http::{HttpsClient, HttpsCommunicator};
pub use identity::{derive_client_identity, derive_client_identity_from_pem};
pub use mqtt::{MqttClient, MqttCommunicator};
pub use payload::{JsonDecoder, MediaKind, MessageMeta, PayloadDecoder, PayloadResolver};
pub use profile::{
    CommunicationProperties, HttpMethod, InterfaceProfile, MessageProperties, ProfileKey,
    ProfileValue, Protocol, QosLevel,
};
pub use tls::build_tls_context;
pub use websocket::{WebsocketClient, WebsocketCommunicator};
