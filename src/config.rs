use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub play: PlayConfig,
    pub verifier: VerifierConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Google Play Developer API access. The service token is an opaque
/// injected credential; rotation happens outside this service.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayConfig {
    pub package_name: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub service_token: String,
    pub products: Vec<CatalogProduct>,
}

fn default_api_base() -> String {
    "https://androidpublisher.googleapis.com".to_string()
}

/// A subscription product the backend is willing to verify. Tokens for
/// product ids outside this catalog are rejected as invalid purchases.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogProduct {
    pub product_id: String,
    pub plan: String,
}

impl PlayConfig {
    pub fn catalog_plan(&self, product_id: &str) -> Option<&str> {
        self.products
            .iter()
            .find(|p| p.product_id == product_id)
            .map(|p| p.plan.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifierConfig {
    pub request_timeout_ms: u64,
    pub retry_attempts: u8,
    pub backoff_base_ms: u64,
    /// Window during which repeated verification calls for the same
    /// subscriber/product/token are served from cache instead of hitting
    /// the storefront again.
    pub dedup_window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Shared secret the push subscription appends as a `token` query
    /// parameter. Requests without it are rejected before any processing.
    pub shared_token: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        // Build config from config.yml (required) with environment variable overrides
        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(
                config::Environment::with_prefix("SUBVAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
