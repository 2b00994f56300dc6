//! Core Communication Traits
//!
//! `Communicator` is the protocol-scoped factory holding shared TLS/codec
//! configuration; `CommunicationClient` is one live session bound to a
//! single `InterfaceProfile`. All protocol implementations (HTTPS, MQTT,
//! WebSocket) present the same contract.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::payload::{PayloadDecoder, PayloadResolver};
use crate::profile::{CommunicationProperties, InterfaceProfile, MessageProperties};

/// Protocol family of a communicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicatorKind {
    Https,
    Mqtt,
    Websocket,
}

impl std::fmt::Display for CommunicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommunicatorKind::Https => write!(f, "HTTPS"),
            CommunicatorKind::Mqtt => write!(f, "MQTT"),
            CommunicatorKind::Websocket => write!(f, "WEBSOCKET"),
        }
    }
}

/// Protocol-scoped factory. Configured once (`properties`, `decoder`),
/// initialized once, then mints any number of clients until shutdown.
#[async_trait]
pub trait Communicator: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> CommunicatorKind;

    /// Store the shared TLS/timeout configuration.
    fn properties(&mut self, props: CommunicationProperties) -> Result<()>;

    /// Store the codec used by every client this communicator creates.
    fn decoder(&mut self, decoder: Arc<dyn PayloadDecoder>) -> Result<()>;

    /// One-time protocol setup: TLS context and identity derivation, or the
    /// broker connection. Failures are fatal and not retried internally.
    async fn initialize(&mut self) -> Result<()>;

    /// True only once configuration and protocol setup both succeeded.
    fn is_initialized(&self) -> bool;

    /// Mint a new client bound to the given profile. No side effect beyond
    /// object construction; connections open lazily inside the client.
    fn client(&self, profile: InterfaceProfile) -> Result<Box<dyn CommunicationClient>>;
}

/// One live session/subscription against a single endpoint profile.
/// Owned exclusively by its creator; explicitly terminated when done.
#[async_trait]
pub trait CommunicationClient: Send + std::fmt::Debug {
    async fn send(
        &mut self,
        props: Option<&MessageProperties>,
        payload: Option<&Value>,
    ) -> Result<()>;

    async fn receive(
        &mut self,
        props: Option<&MessageProperties>,
        resolver: &mut PayloadResolver,
    ) -> Result<()>;

    async fn terminate(&mut self) -> Result<()>;
}
