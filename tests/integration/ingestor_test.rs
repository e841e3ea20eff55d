/// Notification ingestion: delivery dedup, revocation, attribution
use crate::{outcome, setup_test_db};
use base64::Engine;
use entity::sea_orm_active_enums::PaymentState;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use subvault::{
    config::{CatalogProduct, PlayConfig, VerifierConfig},
    models::notification::{PubSubEnvelope, PubSubMessage, RenewalEvent},
    services::{reconciler::Disposition, EntitlementReconciler, EventIngestor, ReceiptVerifier},
};
use subvault::services::ingestor::IngestAck;
use uuid::Uuid;

fn test_play_config() -> PlayConfig {
    PlayConfig {
        package_name: "com.example.app".to_string(),
        api_base: "http://localhost:9".to_string(),
        service_token: "test-token".to_string(),
        products: vec![CatalogProduct {
            product_id: "premium_monthly".to_string(),
            plan: "premium".to_string(),
        }],
    }
}

fn test_verifier_config() -> VerifierConfig {
    VerifierConfig {
        request_timeout_ms: 1000,
        retry_attempts: 1,
        backoff_base_ms: 10,
        dedup_window_seconds: 60,
    }
}

/// Ingestor wired to a dead storefront and cache; the paths under test
/// never reach either.
fn build_ingestor(db: DatabaseConnection) -> (EventIngestor, Arc<EntitlementReconciler>) {
    let redis = Arc::new(redis::Client::open("redis://127.0.0.1:1/").unwrap());
    let verifier = Arc::new(
        ReceiptVerifier::new(&test_play_config(), &test_verifier_config(), redis).unwrap(),
    );
    let reconciler = Arc::new(EntitlementReconciler::new(db.clone()));
    let ingestor = EventIngestor::new(db, verifier, reconciler.clone());
    (ingestor, reconciler)
}

fn envelope(message_id: &str, data_json: &str) -> PubSubEnvelope {
    PubSubEnvelope {
        message: PubSubMessage {
            data: base64::engine::general_purpose::STANDARD.encode(data_json),
            message_id: message_id.to_string(),
            publish_time: None,
        },
        subscription: Some("projects/p/subscriptions/play-rtdn".to_string()),
    }
}

#[tokio::test]
#[ignore] // Run only when database is available
async fn duplicate_delivery_never_increments_revision_twice() {
    let db = setup_test_db().await;
    let (ingestor, reconciler) = build_ingestor(db);

    let subscriber = format!("sub-{}", Uuid::new_v4());
    let now = time::OffsetDateTime::now_utc();

    // Subscriber exists from an earlier direct verification
    let purchase = outcome(
        &subscriber,
        PaymentState::Received,
        Some(now + time::Duration::days(30)),
        now,
        "cs-initial",
    );
    reconciler.reconcile(&purchase).await.unwrap();

    let delivery_id = format!("msg-{}", Uuid::new_v4());
    let renewal = RenewalEvent {
        delivery_id: delivery_id.clone(),
        notification_type: 2,
        outcome: outcome(
            &subscriber,
            PaymentState::Received,
            Some(now + time::Duration::days(60)),
            now + time::Duration::minutes(1),
            "cs-renewal",
        ),
    };

    let first = ingestor.ingest(renewal.clone()).await.unwrap();
    assert_eq!(first, IngestAck::Processed(Disposition::Applied));

    let record = reconciler.get(&subscriber).await.unwrap().unwrap();
    let revision_after_first = record.revision;

    // Redelivery of the same message id is a silent no-op
    let second = ingestor.ingest(renewal).await.unwrap();
    assert_eq!(second, IngestAck::Duplicate);

    let record = reconciler.get(&subscriber).await.unwrap().unwrap();
    assert_eq!(record.revision, revision_after_first);
    assert_eq!(record.expiry_at.unwrap(), now + time::Duration::days(60));
}

#[tokio::test]
#[ignore] // Run only when database is available
async fn revocation_notification_revokes_access() {
    let db = setup_test_db().await;
    let (ingestor, reconciler) = build_ingestor(db);

    let subscriber = format!("sub-{}", Uuid::new_v4());
    let now = time::OffsetDateTime::now_utc();

    let purchase = outcome(
        &subscriber,
        PaymentState::Received,
        Some(now + time::Duration::days(30)),
        now,
        "cs-initial",
    );
    reconciler.reconcile(&purchase).await.unwrap();

    // The envelope carries the token bound by the verification above
    let revocation = envelope(
        &format!("msg-{}", Uuid::new_v4()),
        &format!(
            r#"{{
                "version": "1.0",
                "packageName": "com.example.app",
                "eventTimeMillis": "{}",
                "subscriptionNotification": {{
                    "version": "1.0",
                    "notificationType": 12,
                    "purchaseToken": "tok-{}",
                    "subscriptionId": "premium_monthly"
                }}
            }}"#,
            (now + time::Duration::minutes(2)).unix_timestamp() * 1000,
            subscriber
        ),
    );

    let ack = ingestor.handle(&revocation).await.unwrap();
    assert_eq!(ack, IngestAck::Processed(Disposition::Applied));

    let record = reconciler.get(&subscriber).await.unwrap().unwrap();
    assert_eq!(record.payment_state, PaymentState::Refunded);
    assert!(!record.premium_at(time::OffsetDateTime::now_utc()));
}

#[tokio::test]
#[ignore] // Run only when database is available
async fn unknown_token_is_acknowledged_unattributed() {
    let db = setup_test_db().await;
    let (ingestor, _) = build_ingestor(db);

    let delivery_id = format!("msg-{}", Uuid::new_v4());
    let notification = envelope(
        &delivery_id,
        r#"{
            "version": "1.0",
            "packageName": "com.example.app",
            "eventTimeMillis": "1700000000000",
            "subscriptionNotification": {
                "version": "1.0",
                "notificationType": 2,
                "purchaseToken": "tok-never-verified",
                "subscriptionId": "premium_monthly"
            }
        }"#,
    );

    let ack = ingestor.handle(&notification).await.unwrap();
    assert_eq!(ack, IngestAck::Unattributed);

    // Redelivery short-circuits on the recorded delivery id
    let ack = ingestor.handle(&notification).await.unwrap();
    assert_eq!(ack, IngestAck::Duplicate);
}

#[tokio::test]
#[ignore] // Run only when database is available
async fn test_notification_is_acknowledged() {
    let db = setup_test_db().await;
    let (ingestor, _) = build_ingestor(db);

    let notification = envelope(
        &format!("msg-{}", Uuid::new_v4()),
        r#"{
            "version": "1.0",
            "packageName": "com.example.app",
            "eventTimeMillis": "1700000000000",
            "testNotification": { "version": "1.0" }
        }"#,
    );

    let ack = ingestor.handle(&notification).await.unwrap();
    assert_eq!(ack, IngestAck::Test);
}

#[tokio::test]
#[ignore] // Run only when database is available
async fn malformed_payload_is_acknowledged_and_dropped() {
    let db = setup_test_db().await;
    let (ingestor, _) = build_ingestor(db);

    let notification = PubSubEnvelope {
        message: PubSubMessage {
            data: "!!not-base64!!".to_string(),
            message_id: format!("msg-{}", Uuid::new_v4()),
            publish_time: None,
        },
        subscription: None,
    };

    let ack = ingestor.handle(&notification).await.unwrap();
    assert_eq!(ack, IngestAck::Ignored);
}
