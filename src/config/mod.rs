pub mod settings;

pub use settings::{
    AuthConfig, BillingConfig, GatewayConfig, PlansConfig, ServerConfig, Settings, StorageConfig,
};
