use std::sync::Arc;

use super::TransportFactory;
use super::callback_polling::CallbackPollingFactory;
use super::long_polling::LongPollingFactory;
use super::websocket::WebSocketFactory;

/// Ordered set of transport factories. Registration order is preference
/// order when several transports are usable.
#[derive(Clone)]
pub struct TransportRegistry {
    factories: Vec<Arc<dyn TransportFactory>>,
}

impl TransportRegistry {
    pub fn empty() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Add a factory. Registering a connection type twice replaces the
    /// earlier factory but keeps its position.
    pub fn register(&mut self, factory: Arc<dyn TransportFactory>) {
        match self
            .factories
            .iter_mut()
            .find(|f| f.connection_type() == factory.connection_type())
        {
            Some(existing) => *existing = factory,
            None => self.factories.push(factory),
        }
    }

    pub fn with(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn get(&self, connection_type: &str) -> Option<&Arc<dyn TransportFactory>> {
        self.factories
            .iter()
            .find(|f| f.connection_type() == connection_type)
    }

    pub fn contains(&self, connection_type: &str) -> bool {
        self.get(connection_type).is_some()
    }

    pub fn connection_types(&self) -> Vec<String> {
        self.factories
            .iter()
            .map(|f| f.connection_type().to_string())
            .collect()
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::empty()
            .with(Arc::new(WebSocketFactory))
            .with(Arc::new(LongPollingFactory::default()))
            .with(Arc::new(CallbackPollingFactory::default()))
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.connection_types()).finish()
    }
}
