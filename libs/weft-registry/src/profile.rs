//! Communication Profiles for Registry Clients
//!
//! A `CommunicationProfile` maps the service names a registry client consumes
//! to the communicators it should use for them. Communicators are configured
//! and initialized by the caller before they are put into a profile.

use std::collections::HashMap;
use std::sync::Arc;

use weft_comlink::Communicator;

use crate::error::{RegistryError, Result};

/// Service discovery (service registry query interface)
pub const SERVICE_DISCOVERY: &str = "service-discovery";
/// System discovery (system registry query interface)
pub const SYSTEM_DISCOVERY: &str = "system-discovery";
/// Echo/monitoring interface exposed by every core system
pub const MONITORING: &str = "monitoring";
/// Historian interface of the data manager
pub const HISTORIAN: &str = "historian";

/// Service name to communicator binding for one registry client.
#[derive(Default, Clone)]
pub struct CommunicationProfile {
    communicators: HashMap<String, Arc<dyn Communicator>>,
}

impl CommunicationProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, service: impl Into<String>, communicator: Arc<dyn Communicator>) -> Self {
        self.communicators.insert(service.into(), communicator);
        self
    }

    pub fn contains(&self, service: &str) -> bool {
        self.communicators.contains_key(service)
    }

    pub fn get(&self, service: &str) -> Result<Arc<dyn Communicator>> {
        self.communicators.get(service).cloned().ok_or_else(|| {
            RegistryError::developer(format!("no communicator defined for service '{}'", service))
        })
    }
}
