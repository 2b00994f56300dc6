//! Weft Registry Clients
//!
//! Bootstrap dependency chain of the Weft service-discovery middleware:
//! the service registry client initializes first against its communication
//! profile and query interface; the system registry and data manager clients
//! verify that precondition before initializing themselves. Each client
//! exposes thin service handles (discovery, monitoring, historian) that mint
//! `CommunicationClient` sessions from `weft-comlink` communicators.

pub mod bootstrap;
pub mod clients;
pub mod error;
pub mod profile;
pub mod services;

// Re-export core types
pub use bootstrap::RegistryBootstrap;
pub use clients::{ClientState, DataManagerClient, ServiceRegistryClient, SystemRegistryClient};
pub use error::{RegistryError, Result};
pub use profile::{
    CommunicationProfile, HISTORIAN, MONITORING, SERVICE_DISCOVERY, SYSTEM_DISCOVERY,
};
pub use services::{
    HistorianService, MonitoringService, ServiceDiscoveryService, SystemDiscoveryService,
};
