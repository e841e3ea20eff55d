use crate::{
    error::{ApiError, Result},
    models::verify::VerificationOutcome,
};
use anyhow::anyhow;
use entity::sea_orm_active_enums::PaymentState;
use sea_orm::{
    entity::*, query::*, sea_query::OnConflict, DatabaseConnection, DatabaseTransaction,
    TransactionTrait,
};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Merges verification outcomes into stored entitlement records.
///
/// Ordering is by storefront event timestamp, never arrival order, so a
/// direct verification call and a pushed notification racing for the same
/// subscriber converge on the state with the latest event time. Writers
/// for one subscriber are serialized on the row lock; distinct subscribers
/// reconcile fully in parallel.
pub struct EntitlementReconciler {
    db: DatabaseConnection,
}

/// How an outcome landed against the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// First verification for this subscriber created the record
    Created,
    /// The outcome was newer and was applied
    Applied,
    /// Identical checksum: an idempotent replay, record untouched
    Duplicate,
    /// Older event time than the stored record: discarded, logged
    Stale,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
        }
    }
}

/// Decision against an existing record (creation is decided by absence).
fn decide(existing: &entity::entitlements::Model, incoming: &VerificationOutcome) -> Disposition {
    if incoming.checksum == existing.last_checksum {
        return Disposition::Duplicate;
    }
    // Only strictly older outcomes are stale; an equal event time with a
    // different checksum is a same-instant correction and applies.
    if incoming.event_time < existing.event_time {
        return Disposition::Stale;
    }
    Disposition::Applied
}

/// Entitlement fields derived from an outcome, given the previous expiry.
struct MergedFields {
    premium_active: bool,
    expiry_at: Option<OffsetDateTime>,
    auto_renew: bool,
}

fn merge(
    previous_expiry: Option<OffsetDateTime>,
    outcome: &VerificationOutcome,
    now: OffsetDateTime,
) -> MergedFields {
    match outcome.payment_state {
        PaymentState::Received => MergedFields {
            premium_active: outcome.expiry_at.map(|e| e > now).unwrap_or(false),
            expiry_at: outcome.expiry_at,
            auto_renew: outcome.auto_renew,
        },
        // Pending grants nothing and leaves any running paid period alone
        PaymentState::Pending => MergedFields {
            premium_active: previous_expiry.map(|e| e > now).unwrap_or(false),
            expiry_at: previous_expiry,
            auto_renew: outcome.auto_renew,
        },
        // Refunds revoke access immediately, even before natural expiry
        PaymentState::Refunded | PaymentState::Revoked => MergedFields {
            premium_active: false,
            expiry_at: outcome.expiry_at.or(previous_expiry),
            auto_renew: false,
        },
    }
}

impl EntitlementReconciler {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Reconcile one outcome in its own transaction. Idempotent for a
    /// given outcome (checksum dedup), so a caller seeing a storage error
    /// retries with the same input.
    #[instrument(skip(self, outcome), fields(subscriber = %outcome.subscriber_id))]
    pub async fn reconcile(
        &self,
        outcome: &VerificationOutcome,
    ) -> Result<(entity::entitlements::Model, Disposition)> {
        let txn = self.db.begin().await?;
        let applied = self.reconcile_in_txn(&txn, outcome).await?;
        txn.commit().await?;
        Ok(applied)
    }

    /// Reconcile within a caller-owned transaction. Used by the ingestor
    /// to commit the delivery-dedup row and the entitlement update
    /// together.
    pub async fn reconcile_in_txn(
        &self,
        txn: &DatabaseTransaction,
        outcome: &VerificationOutcome,
    ) -> Result<(entity::entitlements::Model, Disposition)> {
        let now = OffsetDateTime::now_utc();

        // FOR UPDATE serializes concurrent reconciliations per subscriber
        let existing = self.lock_row(txn, &outcome.subscriber_id).await?;

        let existing = match existing {
            Some(row) => row,
            None => {
                // First verification creates the record. A concurrent
                // creator may win the insert; conflict-do-nothing plus
                // re-read resolves the race either way.
                let id = Uuid::new_v4();
                entity::entitlements::Entity::insert(new_record(id, outcome, now))
                    .on_conflict(
                        OnConflict::column(entity::entitlements::Column::SubscriberId)
                            .do_nothing()
                            .to_owned(),
                    )
                    .exec_without_returning(txn)
                    .await?;

                let row = self
                    .lock_row(txn, &outcome.subscriber_id)
                    .await?
                    .ok_or_else(|| {
                        ApiError::Internal(anyhow!(
                            "entitlement row missing after insert for subscriber {}",
                            outcome.subscriber_id
                        ))
                    })?;

                if row.id == id {
                    info!(
                        "Created entitlement: subscriber={}, plan={}, state={:?}, revision={}",
                        row.subscriber_id, row.plan, row.payment_state, row.revision
                    );
                    return Ok((row, Disposition::Created));
                }

                // Lost the creation race: reconcile against the winner
                row
            }
        };

        match decide(&existing, outcome) {
            Disposition::Duplicate => {
                debug!(
                    "Duplicate outcome (checksum {}), record unchanged at revision {}",
                    outcome.checksum, existing.revision
                );
                Ok((existing, Disposition::Duplicate))
            }
            Disposition::Stale => {
                warn!(
                    "Discarding stale outcome: event_time={} older than stored {}",
                    outcome.event_time, existing.event_time
                );
                Ok((existing, Disposition::Stale))
            }
            Disposition::Applied | Disposition::Created => {
                let merged = merge(existing.expiry_at, outcome, now);
                let revision = existing.revision + 1;

                let mut active: entity::entitlements::ActiveModel = existing.into();
                active.product_id = Set(outcome.product_id.clone());
                active.plan = Set(outcome.plan.clone());
                active.premium_active = Set(merged.premium_active);
                active.payment_state = Set(outcome.payment_state);
                active.expiry_at = Set(merged.expiry_at);
                active.auto_renew = Set(merged.auto_renew);
                active.purchase_token = Set(outcome.purchase_token.clone());
                active.last_checksum = Set(outcome.checksum.clone());
                active.event_time = Set(outcome.event_time);
                active.revision = Set(revision);
                active.updated_at = Set(now);

                let updated = active.update(txn).await?;

                info!(
                    "Applied outcome: subscriber={}, state={:?}, premium={}, revision={}",
                    updated.subscriber_id, updated.payment_state, updated.premium_active, revision
                );

                Ok((updated, Disposition::Applied))
            }
        }
    }

    /// Keyed lookup for the authorization layer and the HTTP read path.
    #[instrument(skip(self))]
    pub async fn get(&self, subscriber_id: &str) -> Result<Option<entity::entitlements::Model>> {
        let record = entity::entitlements::Entity::find()
            .filter(entity::entitlements::Column::SubscriberId.eq(subscriber_id))
            .one(&self.db)
            .await?;

        Ok(record)
    }

    /// Attribute a purchase token to its subscriber. Notifications carry
    /// only the token; the binding was stored by the first verification.
    pub async fn find_by_token(
        &self,
        purchase_token: &str,
    ) -> Result<Option<entity::entitlements::Model>> {
        let record = entity::entitlements::Entity::find()
            .filter(entity::entitlements::Column::PurchaseToken.eq(purchase_token))
            .one(&self.db)
            .await?;

        Ok(record)
    }

    async fn lock_row(
        &self,
        txn: &DatabaseTransaction,
        subscriber_id: &str,
    ) -> Result<Option<entity::entitlements::Model>> {
        let row = entity::entitlements::Entity::find()
            .filter(entity::entitlements::Column::SubscriberId.eq(subscriber_id))
            .lock_exclusive()
            .one(txn)
            .await?;

        Ok(row)
    }
}

fn new_record(
    id: Uuid,
    outcome: &VerificationOutcome,
    now: OffsetDateTime,
) -> entity::entitlements::ActiveModel {
    let merged = merge(None, outcome, now);

    entity::entitlements::ActiveModel {
        id: Set(id),
        subscriber_id: Set(outcome.subscriber_id.clone()),
        product_id: Set(outcome.product_id.clone()),
        plan: Set(outcome.plan.clone()),
        premium_active: Set(merged.premium_active),
        payment_state: Set(outcome.payment_state),
        expiry_at: Set(merged.expiry_at),
        auto_renew: Set(merged.auto_renew),
        purchase_token: Set(outcome.purchase_token.clone()),
        last_checksum: Set(outcome.checksum.clone()),
        event_time: Set(outcome.event_time),
        revision: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(
        state: PaymentState,
        expiry_days: Option<i64>,
        event_offset_secs: i64,
        checksum: &str,
    ) -> VerificationOutcome {
        let now = OffsetDateTime::now_utc();
        VerificationOutcome {
            subscriber_id: "u1".to_string(),
            product_id: "premium_monthly".to_string(),
            plan: "premium".to_string(),
            purchase_token: "tok".to_string(),
            payment_state: state,
            expiry_at: expiry_days.map(|d| now + time::Duration::days(d)),
            auto_renew: true,
            event_time: now + time::Duration::seconds(event_offset_secs),
            checksum: checksum.to_string(),
        }
    }

    fn stored(event_offset_secs: i64, checksum: &str) -> entity::entitlements::Model {
        let now = OffsetDateTime::now_utc();
        entity::entitlements::Model {
            id: Uuid::new_v4(),
            subscriber_id: "u1".to_string(),
            product_id: "premium_monthly".to_string(),
            plan: "premium".to_string(),
            premium_active: true,
            payment_state: PaymentState::Received,
            expiry_at: Some(now + time::Duration::days(30)),
            auto_renew: true,
            purchase_token: "tok".to_string(),
            last_checksum: checksum.to_string(),
            event_time: now + time::Duration::seconds(event_offset_secs),
            revision: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn newer_event_applies() {
        let existing = stored(0, "cs-a");
        let incoming = outcome(PaymentState::Received, Some(30), 60, "cs-b");
        assert_eq!(decide(&existing, &incoming), Disposition::Applied);
    }

    #[test]
    fn older_event_is_stale() {
        // A renewal event with an earlier event time than the stored
        // record is discarded regardless of its content.
        let existing = stored(60, "cs-a");
        let incoming = outcome(PaymentState::Received, Some(15), 0, "cs-b");
        assert_eq!(decide(&existing, &incoming), Disposition::Stale);
    }

    #[test]
    fn identical_checksum_is_duplicate_regardless_of_timestamps() {
        let existing = stored(0, "cs-a");
        let incoming = outcome(PaymentState::Received, Some(30), 120, "cs-a");
        assert_eq!(decide(&existing, &incoming), Disposition::Duplicate);
    }

    #[test]
    fn equal_event_time_with_new_checksum_applies() {
        let existing = stored(0, "cs-a");
        let mut incoming = outcome(PaymentState::Received, Some(30), 0, "cs-b");
        incoming.event_time = existing.event_time;
        assert_eq!(decide(&existing, &incoming), Disposition::Applied);
    }

    #[test]
    fn received_grants_premium_with_future_expiry() {
        let now = OffsetDateTime::now_utc();
        let merged = merge(None, &outcome(PaymentState::Received, Some(30), 0, "cs"), now);
        assert!(merged.premium_active);
        assert!(merged.expiry_at.is_some());
    }

    #[test]
    fn received_with_past_expiry_does_not_grant() {
        let now = OffsetDateTime::now_utc();
        let merged = merge(None, &outcome(PaymentState::Received, Some(-1), 0, "cs"), now);
        assert!(!merged.premium_active);
    }

    #[test]
    fn refund_revokes_despite_future_expiry() {
        let now = OffsetDateTime::now_utc();
        let previous = Some(now + time::Duration::days(30));
        let merged = merge(previous, &outcome(PaymentState::Refunded, None, 0, "cs"), now);
        assert!(!merged.premium_active);
        assert!(!merged.auto_renew);
        // Expiry is retained for audit, access is cut regardless
        assert_eq!(merged.expiry_at, previous);
    }

    #[test]
    fn pending_grants_nothing_on_a_fresh_record() {
        let now = OffsetDateTime::now_utc();
        let merged = merge(None, &outcome(PaymentState::Pending, Some(30), 0, "cs"), now);
        assert!(!merged.premium_active);
        assert!(merged.expiry_at.is_none());
    }

    #[test]
    fn pending_leaves_a_running_paid_period_alone() {
        let now = OffsetDateTime::now_utc();
        let previous = Some(now + time::Duration::days(12));
        let merged = merge(previous, &outcome(PaymentState::Pending, None, 0, "cs"), now);
        assert!(merged.premium_active);
        assert_eq!(merged.expiry_at, previous);
    }
}
