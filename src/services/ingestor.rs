use crate::{
    error::{ApiError, Result},
    models::{
        notification::{PubSubEnvelope, RenewalEvent},
        verify::VerificationOutcome,
    },
    services::{
        reconciler::{Disposition, EntitlementReconciler},
        verifier::{payload_checksum, ReceiptVerifier},
    },
};
use anyhow::anyhow;
use entity::sea_orm_active_enums::PaymentState;
use sea_orm::{
    entity::*, query::*, sea_query::OnConflict, DatabaseConnection, DatabaseTransaction,
    TransactionTrait,
};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Receives storefront developer notifications and feeds them through the
/// same reconciliation path as direct verification calls.
///
/// Ack discipline: ack only after durable commit. The delivery-dedup row
/// and the reconciled entitlement commit in one transaction; a non-2xx
/// response makes the channel redeliver, and a redelivered duplicate hits
/// the unique delivery id and no-ops.
pub struct EventIngestor {
    db: DatabaseConnection,
    verifier: Arc<ReceiptVerifier>,
    reconciler: Arc<EntitlementReconciler>,
}

/// How a delivery was resolved. Every variant acknowledges the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestAck {
    /// Reconciled against the entitlement record
    Processed(Disposition),
    /// Same delivery id seen before: silent no-op
    Duplicate,
    /// Purchase token not bound to any subscriber yet
    Unattributed,
    /// Play test notification
    Test,
    /// Unparseable or empty payload, recorded and dropped
    Ignored,
}

/// Delivery-row outcome for payloads that never reach reconciliation
const OUTCOME_UNATTRIBUTED: &str = "unattributed";
const OUTCOME_TEST: &str = "test";
const OUTCOME_IGNORED: &str = "ignored";

impl EventIngestor {
    pub fn new(
        db: DatabaseConnection,
        verifier: Arc<ReceiptVerifier>,
        reconciler: Arc<EntitlementReconciler>,
    ) -> Self {
        Self {
            db,
            verifier,
            reconciler,
        }
    }

    /// Decode a push envelope, translate it into the common outcome shape,
    /// and ingest it.
    #[instrument(skip(self, envelope), fields(delivery_id = %envelope.message.message_id))]
    pub async fn handle(&self, envelope: &PubSubEnvelope) -> Result<IngestAck> {
        let delivery_id = &envelope.message.message_id;

        // Read-only fast path: a known delivery skips decode and any
        // storefront call. The authoritative check rides the unique index
        // inside the ingest transaction.
        if self.delivery_exists(delivery_id).await? {
            info!("Duplicate delivery {}, acknowledging no-op", delivery_id);
            return Ok(IngestAck::Duplicate);
        }

        let (notification, raw) = match envelope.decode() {
            Ok(decoded) => decoded,
            Err(e) => {
                // Redelivering a permanently malformed message only causes
                // storms; record it and acknowledge.
                warn!("Unparseable notification payload, dropping: {}", e);
                self.record_delivery(delivery_id, -1, None, OffsetDateTime::now_utc(), OUTCOME_IGNORED)
                    .await?;
                return Ok(IngestAck::Ignored);
            }
        };

        let event_time = notification
            .event_time()
            .unwrap_or_else(OffsetDateTime::now_utc);

        if notification.test_notification.is_some() {
            info!("Test notification received, acknowledging");
            self.record_delivery(delivery_id, 0, None, event_time, OUTCOME_TEST)
                .await?;
            return Ok(IngestAck::Test);
        }

        let Some(sub) = notification.subscription_notification else {
            warn!("Notification without subscription payload, dropping");
            self.record_delivery(delivery_id, -1, None, event_time, OUTCOME_IGNORED)
                .await?;
            return Ok(IngestAck::Ignored);
        };

        // Attribution: the token→subscriber binding was stored by the
        // first client-driven verification. Until it exists there is no
        // record to reconcile against.
        let Some(record) = self.reconciler.find_by_token(&sub.purchase_token).await? else {
            warn!(
                "No entitlement bound to token of notification type {}, acknowledging unattributed",
                sub.notification_type
            );
            self.record_delivery(
                delivery_id,
                sub.notification_type,
                Some(&sub.purchase_token),
                event_time,
                OUTCOME_UNATTRIBUTED,
            )
            .await?;
            return Ok(IngestAck::Unattributed);
        };

        let outcome = if sub.is_revocation() {
            // Revocations (refunds) cut access immediately; no status
            // lookup needed, the notification is the event.
            VerificationOutcome {
                subscriber_id: record.subscriber_id.clone(),
                product_id: sub.subscription_id.clone(),
                plan: record.plan.clone(),
                purchase_token: sub.purchase_token.clone(),
                payment_state: PaymentState::Refunded,
                expiry_at: None,
                auto_renew: false,
                event_time,
                checksum: payload_checksum(&raw),
            }
        } else {
            // Everything else re-verifies against the status API so the
            // storefront stays the single source of truth, stamped with
            // the notification's event time for ordering.
            let mut verified = self
                .verifier
                .verify_fresh(&record.subscriber_id, &sub.subscription_id, &sub.purchase_token)
                .await?;
            verified.event_time = event_time;
            verified.checksum = payload_checksum(&raw);
            verified
        };

        self.ingest(RenewalEvent {
            delivery_id: delivery_id.clone(),
            notification_type: sub.notification_type,
            outcome,
        })
        .await
    }

    /// Durably record the delivery and reconcile its outcome in a single
    /// transaction. A delivery id that already exists is a silent no-op.
    #[instrument(skip(self, event), fields(delivery_id = %event.delivery_id))]
    pub async fn ingest(&self, event: RenewalEvent) -> Result<IngestAck> {
        let txn = self.db.begin().await?;
        let now = OffsetDateTime::now_utc();
        let row_id = Uuid::new_v4();

        let delivery = entity::notification_deliveries::ActiveModel {
            id: Set(row_id),
            delivery_id: Set(event.delivery_id.clone()),
            notification_type: Set(event.notification_type),
            purchase_token: Set(Some(event.outcome.purchase_token.clone())),
            event_time: Set(event.outcome.event_time),
            outcome: Set(Disposition::Applied.as_str().to_string()),
            received_at: Set(now),
        };

        entity::notification_deliveries::Entity::insert(delivery)
            .on_conflict(
                OnConflict::column(entity::notification_deliveries::Column::DeliveryId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        let persisted = self
            .find_delivery_in_txn(&txn, &event.delivery_id)
            .await?
            .ok_or_else(|| {
                ApiError::Internal(anyhow!(
                    "delivery row missing after insert for {}",
                    event.delivery_id
                ))
            })?;

        if persisted.id != row_id {
            // Another delivery of the same message already committed
            txn.rollback().await?;
            info!(
                "Duplicate delivery {} already processed as {}, acknowledging no-op",
                event.delivery_id, persisted.outcome
            );
            return Ok(IngestAck::Duplicate);
        }

        let (_, disposition) = self.reconciler.reconcile_in_txn(&txn, &event.outcome).await?;

        // Keep the audit row honest about what reconciliation decided
        if disposition != Disposition::Applied {
            let mut active: entity::notification_deliveries::ActiveModel = persisted.into();
            active.outcome = Set(disposition.as_str().to_string());
            active.update(&txn).await?;
        }

        txn.commit().await?;

        info!(
            "Ingested delivery {}: type={}, disposition={}",
            event.delivery_id,
            event.notification_type,
            disposition.as_str()
        );

        Ok(IngestAck::Processed(disposition))
    }

    async fn delivery_exists(&self, delivery_id: &str) -> Result<bool> {
        let found = entity::notification_deliveries::Entity::find()
            .filter(entity::notification_deliveries::Column::DeliveryId.eq(delivery_id))
            .one(&self.db)
            .await?;

        Ok(found.is_some())
    }

    async fn find_delivery_in_txn(
        &self,
        txn: &DatabaseTransaction,
        delivery_id: &str,
    ) -> Result<Option<entity::notification_deliveries::Model>> {
        let row = entity::notification_deliveries::Entity::find()
            .filter(entity::notification_deliveries::Column::DeliveryId.eq(delivery_id))
            .one(txn)
            .await?;

        Ok(row)
    }

    /// Record a delivery that never reaches reconciliation (test,
    /// unattributed, unparseable) so redeliveries short-circuit.
    async fn record_delivery(
        &self,
        delivery_id: &str,
        notification_type: i32,
        purchase_token: Option<&str>,
        event_time: OffsetDateTime,
        outcome: &str,
    ) -> Result<()> {
        let delivery = entity::notification_deliveries::ActiveModel {
            id: Set(Uuid::new_v4()),
            delivery_id: Set(delivery_id.to_string()),
            notification_type: Set(notification_type),
            purchase_token: Set(purchase_token.map(|t| t.to_string())),
            event_time: Set(event_time),
            outcome: Set(outcome.to_string()),
            received_at: Set(OffsetDateTime::now_utc()),
        };

        entity::notification_deliveries::Entity::insert(delivery)
            .on_conflict(
                OnConflict::column(entity::notification_deliveries::Column::DeliveryId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }
}
