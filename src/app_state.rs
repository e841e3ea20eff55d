use crate::{
    config::Config,
    services::{EntitlementReconciler, EventIngestor, ReceiptVerifier},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub redis: Arc<redis::Client>,
    pub verifier: Arc<ReceiptVerifier>,
    pub reconciler: Arc<EntitlementReconciler>,
    pub ingestor: Arc<EventIngestor>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        // Connect to database
        let db = sea_orm::Database::connect(&config.database.url).await?;

        // Connect to Redis (verification dedup cache)
        let redis = Arc::new(redis::Client::open(config.redis.url.as_str())?);

        // Initialize services
        let verifier = Arc::new(ReceiptVerifier::new(
            &config.play,
            &config.verifier,
            redis.clone(),
        )?);
        let reconciler = Arc::new(EntitlementReconciler::new(db.clone()));
        let ingestor = Arc::new(EventIngestor::new(
            db.clone(),
            verifier.clone(),
            reconciler.clone(),
        ));

        Ok(Self {
            db,
            redis,
            verifier,
            reconciler,
            ingestor,
            config: Arc::new(config),
        })
    }
}
