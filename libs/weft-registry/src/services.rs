//! Service Handles
//!
//! Thin handles minted by the registry clients once initialized. Each handle
//! pairs a communicator with the interface profile(s) it talks to and mints
//! `CommunicationClient` sessions on demand; the session lifecycle stays with
//! the caller.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use weft_comlink::{
    CommunicationClient, Communicator, InterfaceProfile, PayloadResolver,
};

use crate::error::{RegistryError, Result};

fn require_initialized(communicator: &Arc<dyn Communicator>, context: &str) -> Result<()> {
    if !communicator.is_initialized() {
        return Err(RegistryError::initialization(format!(
            "{} communicator is not initialized",
            context
        )));
    }
    Ok(())
}

/// Query interface of the service registry.
pub struct ServiceDiscoveryService {
    communicator: Arc<dyn Communicator>,
    query_profile: InterfaceProfile,
}

impl ServiceDiscoveryService {
    pub(crate) fn new(
        communicator: Arc<dyn Communicator>,
        query_profile: InterfaceProfile,
    ) -> Result<Self> {
        require_initialized(&communicator, "service discovery")?;
        Ok(Self {
            communicator,
            query_profile,
        })
    }

    /// Communicator precondition used by dependent clients.
    pub fn verify(&self) -> Result<()> {
        require_initialized(&self.communicator, "service discovery")
    }

    /// Mint a client bound to the query interface.
    pub fn query_client(&self) -> Result<Box<dyn CommunicationClient>> {
        Ok(self.communicator.client(self.query_profile.clone())?)
    }

    /// One full query exchange: send the form, collect the resolved response.
    pub async fn query(&self, form: &Value) -> Result<PayloadResolver> {
        let mut client = self.query_client()?;
        client.send(None, Some(form)).await?;

        let mut resolver = PayloadResolver::new();
        client.receive(None, &mut resolver).await?;
        client.terminate().await?;

        debug!(
            client_error = resolver.is_client_error(),
            "service discovery query completed"
        );
        Ok(resolver)
    }
}

/// Query interface of the system registry.
pub struct SystemDiscoveryService {
    communicator: Arc<dyn Communicator>,
}

impl SystemDiscoveryService {
    pub(crate) fn new(communicator: Arc<dyn Communicator>) -> Result<Self> {
        require_initialized(&communicator, "system discovery")?;
        Ok(Self { communicator })
    }

    pub fn verify(&self) -> Result<()> {
        require_initialized(&self.communicator, "system discovery")
    }

    pub fn client(&self, profile: InterfaceProfile) -> Result<Box<dyn CommunicationClient>> {
        Ok(self.communicator.client(profile)?)
    }
}

/// Echo interface exposed by every core system.
pub struct MonitoringService {
    communicator: Arc<dyn Communicator>,
}

impl MonitoringService {
    pub(crate) fn new(communicator: Arc<dyn Communicator>) -> Result<Self> {
        require_initialized(&communicator, "monitoring")?;
        Ok(Self { communicator })
    }

    pub fn verify(&self) -> Result<()> {
        require_initialized(&self.communicator, "monitoring")
    }

    pub fn client(&self, profile: InterfaceProfile) -> Result<Box<dyn CommunicationClient>> {
        Ok(self.communicator.client(profile)?)
    }

    /// Fire one echo exchange against the given interface; true when the
    /// endpoint answered without a client-error flag.
    pub async fn echo(&self, profile: InterfaceProfile) -> Result<bool> {
        let mut client = self.client(profile)?;
        client.send(None, None).await?;

        let mut resolver = PayloadResolver::new();
        client.receive(None, &mut resolver).await?;
        client.terminate().await?;
        Ok(!resolver.is_client_error())
    }
}

/// Historian interface of the data manager.
pub struct HistorianService {
    communicator: Arc<dyn Communicator>,
}

impl HistorianService {
    pub(crate) fn new(communicator: Arc<dyn Communicator>) -> Result<Self> {
        require_initialized(&communicator, "historian")?;
        Ok(Self { communicator })
    }

    pub fn verify(&self) -> Result<()> {
        require_initialized(&self.communicator, "historian")
    }

    pub fn client(&self, profile: InterfaceProfile) -> Result<Box<dyn CommunicationClient>> {
        Ok(self.communicator.client(profile)?)
    }
}
