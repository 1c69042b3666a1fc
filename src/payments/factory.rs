use crate::payments::error::{ConfigurationIssue, PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::providers::{WompiGateway, WompiSettings};
use crate::payments::types::{GatewayKind, TenantPaymentConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Gateways available to this process, keyed by kind.
///
/// The tenant decides which one is active; the registry only answers whether
/// this deployment can serve it.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::with_wompi(WompiSettings::from_env())
    }

    pub fn with_wompi(settings: WompiSettings) -> PaymentResult<Self> {
        Ok(Self::new().register(Arc::new(WompiGateway::new(settings)?)))
    }

    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.kind(), gateway);
        self
    }

    pub fn get(&self, kind: GatewayKind) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways.get(&kind).cloned().ok_or_else(|| {
            PaymentError::configuration(ConfigurationIssue::UnsupportedGateway(
                kind.to_string(),
            ))
        })
    }

    /// Resolves the tenant's active gateway.
    pub fn for_tenant(&self, tenant: &TenantPaymentConfig) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.get(tenant.active_gateway()?)
    }

    pub fn list_available(&self) -> Vec<GatewayKind> {
        self.gateways.keys().copied().collect()
    }
}
