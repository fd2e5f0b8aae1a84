use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::catalog::{CreditCosts, PlanAllotment};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub plans: PlansConfig,
    #[serde(default)]
    pub credit_costs: CreditCosts,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub pg_url: Option<String>,
    #[serde(default)]
    pub pg_schema: Option<String>,
    #[serde(default)]
    pub pg_pool_size: Option<usize>,
}

fn default_database_path() -> String {
    "data/billing.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            pg_url: None,
            pg_schema: None,
            pg_pool_size: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Offset of the zone billing windows and renewal dates are computed in.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,
    /// When set, the server runs the renewal sweep itself on this interval.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

fn default_utc_offset_hours() -> i32 {
    -3
}

fn default_sweep_concurrency() -> usize {
    4
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
            sweep_concurrency: default_sweep_concurrency(),
            sweep_interval_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlansConfig {
    #[serde(default = "PlanAllotment::free")]
    pub free: PlanAllotment,
    #[serde(default = "PlanAllotment::premium")]
    pub premium: PlanAllotment,
    #[serde(default = "PlanAllotment::business")]
    pub business: PlanAllotment,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            free: PlanAllotment::free(),
            premium: PlanAllotment::premium(),
            business: PlanAllotment::business(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gateway_timeout_secs() -> u64 {
    20
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret of the auth provider's access tokens.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Bearer secret for the renewal trigger and operator endpoints.
    #[serde(default)]
    pub cron_secret: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = match Self::find_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                let parsed: Settings = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                parsed
            }
            None => {
                tracing::warn!("No custom-config.toml or config.toml found, using defaults");
                Settings::default()
            }
        };
        settings.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("CRON_SECRET") {
            self.auth.cron_secret = Some(v);
        }
        if let Some(v) = get("AUTH_JWT_SECRET") {
            self.auth.jwt_secret = Some(v);
        }
        if let Some(v) = get("ASAAS_API_KEY") {
            self.gateway.api_key = Some(v);
        }
        if let Some(v) = get("ASAAS_BASE_URL") {
            self.gateway.base_url = Some(v);
        }
        if let Some(v) = get("DATABASE_URL") {
            self.storage.pg_url = Some(v);
        }
        if let Some(v) = get("BILLING_DB_PATH") {
            self.storage.database_path = v;
        }
    }

    fn find_config_file() -> Option<String> {
        let possible_names = ["custom-config.toml", "config.toml"];
        possible_names
            .iter()
            .find(|name| Path::new(name).exists())
            .map(|name| name.to_string())
    }
}
