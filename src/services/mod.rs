//! Services module for business logic and integrations

pub mod callback_simulator;
pub mod payment_orchestrator;

// Re-export orchestrator types
pub use crate::services::callback_simulator::{CallbackSimulator, SimulatedCallback, SimulationRequest};
pub use crate::services::payment_orchestrator::{
    CallbackDisposition, OrchestratorConfig, OrchestratorError, OrchestratorResult,
    PaymentOrchestrator, PaymentStores, Principal, Reconciliation, SettlementState,
};
