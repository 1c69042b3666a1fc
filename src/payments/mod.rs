pub mod envelope;
pub mod error;
pub mod factory;
pub mod gateway;
pub mod providers;
pub mod signature;
pub mod types;
pub mod utils;

pub use error::{ConfigurationIssue, PaymentError, PaymentResult};
pub use factory::GatewayRegistry;
pub use gateway::PaymentGateway;
pub use types::{
    GatewayKind, IntentOptions, Payer, PaymentIntent, PaymentOutcome, TenantPaymentConfig,
    TransactionStatus, WompiCredentials,
};
