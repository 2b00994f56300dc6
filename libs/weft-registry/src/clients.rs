//! Registry Clients and the Bootstrap Dependency Chain
//!
//! Three clients, each moving `UNINITIALIZED -> INITIALIZED` exactly once.
//! The service registry client initializes first; the system registry and
//! data manager clients check that precondition explicitly before touching
//! their own profile or any network resource. Ordering is enforced by these
//! checks, not by a scheduler.

use tracing::info;
use weft_comlink::InterfaceProfile;

use crate::error::{RegistryError, Result};
use crate::profile::{
    CommunicationProfile, HISTORIAN, MONITORING, SERVICE_DISCOVERY, SYSTEM_DISCOVERY,
};
use crate::services::{
    HistorianService, MonitoringService, ServiceDiscoveryService, SystemDiscoveryService,
};

/// Initialization state of a registry client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Uninitialized,
    Initialized,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Uninitialized => write!(f, "UNINITIALIZED"),
            ClientState::Initialized => write!(f, "INITIALIZED"),
        }
    }
}

// ============================================================================
// Service registry
// ============================================================================

/// Client of the service registry core system. Initializes first in the
/// bootstrap chain; exposes discovery and monitoring once initialized.
#[derive(Default)]
pub struct ServiceRegistryClient {
    state: ClientState,
    discovery: Option<ServiceDiscoveryService>,
    monitoring: Option<MonitoringService>,
}

impl ServiceRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(
        &mut self,
        profile: CommunicationProfile,
        query_interface_profile: InterfaceProfile,
    ) -> Result<()> {
        let discovery_communicator = profile.get(SERVICE_DISCOVERY)?;
        let monitoring_communicator = if profile.contains(MONITORING) {
            profile.get(MONITORING)?
        } else {
            discovery_communicator.clone()
        };

        self.discovery = Some(ServiceDiscoveryService::new(
            discovery_communicator,
            query_interface_profile,
        )?);
        self.monitoring = Some(MonitoringService::new(monitoring_communicator)?);
        self.state = ClientState::Initialized;
        info!(state = %self.state, "service registry client initialized");
        Ok(())
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ClientState::Initialized
    }

    /// Precondition for every dependent client.
    pub fn verify_initialization(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(RegistryError::developer(
                "ServiceRegistryClient is not initialized",
            ));
        }
        Ok(())
    }

    pub fn service_discovery(&self) -> Result<&ServiceDiscoveryService> {
        self.discovery
            .as_ref()
            .ok_or_else(|| RegistryError::developer("ServiceRegistryClient is not initialized"))
    }

    pub fn monitoring(&self) -> Result<&MonitoringService> {
        self.monitoring
            .as_ref()
            .ok_or_else(|| RegistryError::developer("ServiceRegistryClient is not initialized"))
    }
}

// ============================================================================
// System registry
// ============================================================================

/// Client of the system registry core system. Requires an initialized
/// service registry client.
#[derive(Default)]
pub struct SystemRegistryClient {
    state: ClientState,
    discovery: Option<SystemDiscoveryService>,
    monitoring: Option<MonitoringService>,
}

impl SystemRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(
        &mut self,
        profile: CommunicationProfile,
        service_registry: &ServiceRegistryClient,
    ) -> Result<()> {
        // precondition check first, before any profile or network work
        service_registry.verify_initialization()?;

        let discovery_communicator = profile.get(SYSTEM_DISCOVERY)?;
        let monitoring_communicator = if profile.contains(MONITORING) {
            profile.get(MONITORING)?
        } else {
            discovery_communicator.clone()
        };

        self.discovery = Some(SystemDiscoveryService::new(discovery_communicator)?);
        self.monitoring = Some(MonitoringService::new(monitoring_communicator)?);
        self.state = ClientState::Initialized;
        info!(state = %self.state, "system registry client initialized");
        Ok(())
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ClientState::Initialized
    }

    pub fn verify_initialization(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(RegistryError::developer(
                "SystemRegistryClient is not initialized",
            ));
        }
        Ok(())
    }

    pub fn system_discovery(&self) -> Result<&SystemDiscoveryService> {
        self.discovery
            .as_ref()
            .ok_or_else(|| RegistryError::developer("SystemRegistryClient is not initialized"))
    }

    pub fn monitoring(&self) -> Result<&MonitoringService> {
        self.monitoring
            .as_ref()
            .ok_or_else(|| RegistryError::developer("SystemRegistryClient is not initialized"))
    }
}

// ============================================================================
// Data manager
// ============================================================================

/// Client of the data manager support system. Requires an initialized
/// service registry client.
#[derive(Default)]
pub struct DataManagerClient {
    state: ClientState,
    historian: Option<HistorianService>,
    monitoring: Option<MonitoringService>,
}

impl DataManagerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(
        &mut self,
        profile: CommunicationProfile,
        service_registry: &ServiceRegistryClient,
    ) -> Result<()> {
        // precondition check first, before any profile or network work
        service_registry.verify_initialization()?;
        service_registry.service_discovery()?.verify()?;

        let historian_communicator = profile.get(HISTORIAN)?;
        let monitoring_communicator = if profile.contains(MONITORING) {
            profile.get(MONITORING)?
        } else {
            historian_communicator.clone()
        };

        self.historian = Some(HistorianService::new(historian_communicator)?);
        self.monitoring = Some(MonitoringService::new(monitoring_communicator)?);
        self.state = ClientState::Initialized;
        info!(state = %self.state, "data manager client initialized");
        Ok(())
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ClientState::Initialized
    }

    pub fn verify_initialization(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(RegistryError::developer(
                "DataManagerClient is not initialized",
            ));
        }
        Ok(())
    }

    pub fn historian(&self) -> Result<&HistorianService> {
        self.historian
            .as_ref()
            .ok_or_else(|| RegistryError::developer("DataManagerClient is not initialized"))
    }

    pub fn monitoring(&self) -> Result<&MonitoringService> {
        self.monitoring
            .as_ref()
            .ok_or_else(|| RegistryError::developer("DataManagerClient is not initialized"))
    }
}
