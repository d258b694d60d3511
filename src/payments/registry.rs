//! Registry of configured gateway adapters, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::payments::error::GatewayError;
use crate::payments::traits::GatewayAdapter;
use crate::payments::types::PaymentMethod;

#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: HashMap<PaymentMethod, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) {
        let method = adapter.method();
        info!("Registered gateway adapter: {}", method);
        self.adapters.insert(method, adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn GatewayAdapter>, GatewayError> {
        self.adapters
            .get(&method)
            .cloned()
            .ok_or(GatewayError::NotConfigured(method))
    }

    /// Configured methods in a stable order.
    pub fn methods(&self) -> Vec<PaymentMethod> {
        PaymentMethod::ALL
            .into_iter()
            .filter(|m| self.adapters.contains_key(m))
            .collect()
    }
}
