use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL for journal/ledger/catalog persistence
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub catalog: CatalogSeedConfig,
    #[serde(default)]
    pub rails: RailsConfig,
    #[serde(default)]
    pub proof_store: ProofStoreConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Secret used to decode user JWTs issued by the auth service
    #[serde(default)]
    pub jwt_secret: String,
}

/// Initial catalog numbers, applied only when the pricing row does not
/// exist yet. Live values are always read from the store.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CatalogSeedConfig {
    pub tier1_capacity: i64,
    pub tier2_capacity: i64,
    pub tier3_capacity: i64,
    pub tier1_price_naira: String,
    pub tier2_price_naira: String,
    pub tier3_price_naira: String,
    pub tier1_price_usdt: String,
    pub tier2_price_usdt: String,
    pub tier3_price_usdt: String,
    pub co_founder_total: i64,
    pub co_founder_price_naira: String,
    pub co_founder_price_usdt: String,
    pub co_founder_to_regular_ratio: i64,
}

impl Default for CatalogSeedConfig {
    fn default() -> Self {
        Self {
            tier1_capacity: 2_000_000,
            tier2_capacity: 3_000_000,
            tier3_capacity: 5_000_000,
            tier1_price_naira: "50000".to_string(),
            tier2_price_naira: "70000".to_string(),
            tier3_price_naira: "80000".to_string(),
            tier1_price_usdt: "50".to_string(),
            tier2_price_usdt: "70".to_string(),
            tier3_price_usdt: "80".to_string(),
            co_founder_total: 10_000,
            co_founder_price_naira: "1450000".to_string(),
            co_founder_price_usdt: "1450".to_string(),
            co_founder_to_regular_ratio: 29,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RailsConfig {
    #[serde(default)]
    pub card: CardRailConfig,
    #[serde(default)]
    pub invoice: InvoiceRailConfig,
    #[serde(default)]
    pub onchain: OnchainRailConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CardRailConfig {
    pub base_url: String,
    /// Secret key; the PAYSTACK_SECRET_KEY env var takes precedence
    #[serde(default)]
    pub secret_key: String,
    pub callback_base_url: String,
}

impl Default for CardRailConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.paystack.co".to_string(),
            secret_key: String::new(),
            callback_base_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InvoiceRailConfig {
    pub base_url: String,
    /// API key; the CENTIIV_API_KEY env var takes precedence
    #[serde(default)]
    pub api_key: String,
    /// Shared secret for webhook signatures; CENTIIV_WEBHOOK_SECRET overrides
    #[serde(default)]
    pub webhook_secret: String,
    pub success_base_url: String,
    pub notify_base_url: String,
    pub due_days: i64,
}

impl Default for InvoiceRailConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.centiiv.com".to_string(),
            api_key: String::new(),
            webhook_secret: String::new(),
            success_base_url: "http://localhost:3000".to_string(),
            notify_base_url: "http://localhost:8080".to_string(),
            due_days: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OnchainRailConfig {
    /// BSC JSON-RPC endpoint; the BSC_RPC_URL env var takes precedence
    pub rpc_url: String,
    /// USDT (BEP-20) contract address
    pub usdt_contract: String,
    /// Company receiving wallet; COMPANY_WALLET_ADDRESS overrides
    #[serde(default)]
    pub company_wallet: String,
    /// Accepted deviation between expected and on-chain amount, in percent
    pub tolerance_percent: u32,
    /// Maximum age of the containing block, in hours
    pub max_tx_age_hours: i64,
}

impl Default for OnchainRailConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://bsc-dataseed.binance.org".to_string(),
            usdt_contract: "0x55d398326f99059fF775485246999027B3197955".to_string(),
            company_wallet: String::new(),
            tolerance_percent: 2,
            max_tx_age_hours: 24,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProofStoreConfig {
    pub data_dir: String,
}

impl Default for ProofStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data/proofs".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SweeperConfig {
    pub enabled: bool,
    /// Seconds between re-drives of pending transactions on pollable rails
    pub poll_interval_secs: u64,
    /// Seconds between ledger/journal drift sweeps
    pub drift_interval_secs: u64,
    /// Only re-drive pendings older than this many seconds
    pub min_age_secs: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 300,
            drift_interval_secs: 3600,
            min_age_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationConfig {
    /// Address notified when a rail needs admin review; ADMIN_EMAIL overrides
    #[serde(default)]
    pub admin_email: String,
    pub frontend_base_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            admin_email: String::new(),
            frontend_base_url: "http://localhost:3000".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        let mut config: AppConfig =
            serde_yaml::from_str(&content).expect("Failed to parse config yaml");
        config.apply_env_overrides();
        config
    }

    /// Secrets never live in the yaml file in production; environment
    /// variables win whenever they are set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.postgres_url = Some(v);
        }
        if let Ok(v) = std::env::var("PAYSTACK_SECRET_KEY") {
            self.rails.card.secret_key = v;
        }
        if let Ok(v) = std::env::var("CENTIIV_API_KEY") {
            self.rails.invoice.api_key = v;
        }
        if let Ok(v) = std::env::var("CENTIIV_BASE_URL") {
            self.rails.invoice.base_url = v;
        }
        if let Ok(v) = std::env::var("CENTIIV_WEBHOOK_SECRET") {
            self.rails.invoice.webhook_secret = v;
        }
        if let Ok(v) = std::env::var("BSC_RPC_URL") {
            self.rails.onchain.rpc_url = v;
        }
        if let Ok(v) = std::env::var("COMPANY_WALLET_ADDRESS") {
            self.rails.onchain.company_wallet = v;
        }
        if let Ok(v) = std::env::var("FRONTEND_URL") {
            self.notifications.frontend_base_url = v.clone();
            self.rails.card.callback_base_url = v.clone();
            self.rails.invoice.success_base_url = v;
        }
        if let Ok(v) = std::env::var("BACKEND_URL") {
            self.rails.invoice.notify_base_url = v;
        }
        if let Ok(v) = std::env::var("ADMIN_EMAIL") {
            self.notifications.admin_email = v;
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            self.gateway.jwt_secret = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_seed_defaults() {
        let seed = CatalogSeedConfig::default();
        assert_eq!(seed.co_founder_to_regular_ratio, 29);
        assert!(seed.tier1_capacity > 0);
    }

    #[test]
    fn test_minimal_yaml_parses() {
        let yaml = r#"
log_level: "info"
log_dir: "./logs"
log_file: "shareledger.log"
use_json: false
rotation: "daily"
enable_tracing: true
gateway:
  host: "0.0.0.0"
  port: 8080
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.rails.onchain.tolerance_percent, 2);
        assert_eq!(config.sweeper.poll_interval_secs, 300);
    }
}
