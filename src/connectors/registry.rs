//! Provider registry
//!
//! Resolves a provider name to its calendar connector. Built once at startup
//! and shared immutably afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::connectors::google_calendar::{GoogleCalendarConnector, GoogleCalendarSettings};
use crate::connectors::microsoft_calendar::{
    MicrosoftCalendarConnector, MicrosoftCalendarSettings,
};
use crate::connectors::{CalendarConnector, ConnectorError};
use crate::models::CalendarProvider;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("calendar provider '{name}' is not implemented")]
    NotImplemented { name: String },
}

/// Calendar connectors keyed by provider
#[derive(Clone, Default)]
pub struct Registry {
    connectors: HashMap<CalendarProvider, Arc<dyn CalendarConnector>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every provider whose OAuth client credentials are configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConnectorError> {
        let mut registry = Self::new();

        match GoogleCalendarSettings::from_config(config) {
            Some(settings) => {
                registry.register(Arc::new(GoogleCalendarConnector::new(settings)?));
            }
            None => warn!("Google calendar connector not registered: missing client credentials"),
        }

        match MicrosoftCalendarSettings::from_config(config) {
            Some(settings) => {
                registry.register(Arc::new(MicrosoftCalendarConnector::new(settings)?));
            }
            None => {
                warn!("Microsoft calendar connector not registered: missing client credentials")
            }
        }

        info!(providers = ?registry.providers(), "Calendar provider registry initialized");
        Ok(registry)
    }

    /// Register a connector, replacing any previous one for the same provider
    pub fn register(&mut self, connector: Arc<dyn CalendarConnector>) {
        self.connectors.insert(connector.provider(), connector);
    }

    /// Case-insensitive lookup by provider name
    pub fn get(&self, name: &str) -> Result<Arc<dyn CalendarConnector>, RegistryError> {
        let provider = name
            .parse::<CalendarProvider>()
            .map_err(|_| RegistryError::NotImplemented {
                name: name.to_string(),
            })?;
        self.get_for(provider)
    }

    pub fn get_for(
        &self,
        provider: CalendarProvider,
    ) -> Result<Arc<dyn CalendarConnector>, RegistryError> {
        self.connectors
            .get(&provider)
            .cloned()
            .ok_or_else(|| RegistryError::NotImplemented {
                name: provider.to_string(),
            })
    }

    /// Registered providers in stable order
    pub fn providers(&self) -> Vec<CalendarProvider> {
        let mut providers: Vec<_> = self.connectors.keys().copied().collect();
        providers.sort_by_key(|provider| provider.as_str());
        providers
    }
}
