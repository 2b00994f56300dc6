//! Bootstrap Facade
//!
//! Owns the three registry clients and drives their fixed initialization
//! order: service registry first, then system registry and data manager.
//! The wiring layer calls these in order; the precondition checks inside the
//! clients make a wrong order fail fast.

use weft_comlink::InterfaceProfile;

use crate::clients::{DataManagerClient, ServiceRegistryClient, SystemRegistryClient};
use crate::error::Result;
use crate::profile::CommunicationProfile;

/// Entry point the wiring layer drives during process startup.
#[derive(Default)]
pub struct RegistryBootstrap {
    service_registry: ServiceRegistryClient,
    system_registry: SystemRegistryClient,
    data_manager: DataManagerClient,
}

impl RegistryBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_service_registry(
        &mut self,
        profile: CommunicationProfile,
        query_interface_profile: InterfaceProfile,
    ) -> Result<()> {
        self.service_registry
            .initialize(profile, query_interface_profile)
    }

    pub fn init_system_registry(&mut self, profile: CommunicationProfile) -> Result<()> {
        self.service_registry.verify_initialization()?;
        self.system_registry.initialize(profile, &self.service_registry)
    }

    pub fn init_data_manager(&mut self, profile: CommunicationProfile) -> Result<()> {
        self.service_registry.verify_initialization()?;
        self.data_manager.initialize(profile, &self.service_registry)
    }

    pub fn service_registry(&self) -> &ServiceRegistryClient {
        &self.service_registry
    }

    pub fn system_registry(&self) -> &SystemRegistryClient {
        &self.system_registry
    }

    pub fn data_manager(&self) -> &DataManagerClient {
        &self.data_manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    #[test]
    fn test_out_of_order_bootstrap_fails() {
        let mut bootstrap = RegistryBootstrap::new();
        let err = bootstrap
            .init_system_registry(CommunicationProfile::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Developer(_)));

        let err = bootstrap
            .init_data_manager(CommunicationProfile::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Developer(_)));
    }
}
