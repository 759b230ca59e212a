use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use chrono::Utc;
use log::*;

use crate::{
    ce_api::{
        confirmation_objects::{BatchConfirmation, ConfirmationResult, OrderOutcome, OrderResult},
        errors::ConfirmationError,
        retry::{OverrideGuard, RetryPolicy},
    },
    db_types::{BatchId, ConfirmationTier, Order, OrderNumber, OrderStatusType, PaymentRail, PaymentReference},
    events::{EventProducers, OrderConfirmedEvent},
    traits::{OrderStore, StoreError},
};

/// The tiers are tried in this order. A tier only runs if the one before it failed with an error.
const TIERS: [ConfirmationTier; 3] =
    [ConfirmationTier::Atomic, ConfirmationTier::TwoStep, ConfirmationTier::ForcedOverride];

/// How often a batch confirmation re-reads the batch and chooses its reference again after a sibling turned out to
/// carry a different one.
const MAX_BATCH_ROUNDS: usize = 3;

/// Result of confirming one order.
enum Attempt {
    Settled(OrderOutcome),
    /// The order is a batch member and carries a reference other than the one the batch is being confirmed with.
    /// Carries the order as it was read.
    Diverged(Order),
}

/// Result of running one tier against one order.
enum TierOutcome {
    /// The write went through. Carries the order as it is now stored.
    Applied(Order),
    /// The write's preconditions did not hold. Usually someone else changed the order first.
    Preempted,
}

/// `ConfirmationApi` moves orders from `draft`/`pending_payment` to `confirmed` in response to payment signals.
///
/// Any number of callers (processor webhooks, client-side fallbacks, operator tools, the reconciliation sweepers) may
/// call it at the same time for the same order or batch. There is no locking here: every write is conditioned on the
/// order's current status, and the order is re-read before every tier so that a caller that lost a race finds out and
/// reports an idempotent no-op instead of writing again.
pub struct ConfirmationApi<B> {
    db: B,
    producers: EventProducers,
    retry: RetryPolicy,
    override_guard: Arc<OverrideGuard>,
}

impl<B> Debug for ConfirmationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConfirmationApi ({:?})", self.retry)
    }
}

impl<B: Clone> Clone for ConfirmationApi<B> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            producers: self.producers.clone(),
            retry: self.retry,
            override_guard: Arc::clone(&self.override_guard),
        }
    }
}

impl<B> ConfirmationApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers, retry: RetryPolicy::default(), override_guard: Arc::new(OverrideGuard::default()) }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the override guard. Pass the same `Arc` to every instance that should share one budget.
    pub fn with_override_guard(mut self, guard: Arc<OverrideGuard>) -> Self {
        self.override_guard = guard;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

impl<B> ConfirmationApi<B>
where B: OrderStore
{
    /// Confirms the order or batch identified by `target` with the given payment reference.
    ///
    /// `target` is matched against order numbers first, then numeric order ids, and finally batch ids. If the order
    /// belongs to a batch, the whole batch is confirmed. The rail, if given, is recorded on orders that do not have one
    /// yet.
    ///
    /// A single order that cannot be confirmed is reported as an error, so that a `Conflict` is never mistaken for a
    /// retryable failure. For batches, per-sibling failures are reported in the result, and only batch-level problems
    /// are returned as errors.
    pub async fn confirm(
        &self,
        target: &str,
        reference: &str,
        rail: Option<PaymentRail>,
    ) -> Result<ConfirmationResult, ConfirmationError> {
        let reference = Self::validate_reference(reference)?;
        let target = target.trim();
        if let Some(order) = self.resolve_order(target).await? {
            if let Some(batch_id) = order.batch_id.clone() {
                debug!("✅️ Order {} belongs to {batch_id}. Confirming the whole batch", order.order_number);
                let siblings = self.fetch_batch(&batch_id).await?;
                return self.confirm_siblings(batch_id, siblings, reference, rail, false).await.map(Into::into);
            }
            return self.confirm_single(order, reference, rail, false).await;
        }
        let batch_id = BatchId::from(target);
        let siblings = self.fetch_batch(&batch_id).await?;
        if siblings.is_empty() {
            return Err(ConfirmationError::OrderNotFound(target.to_string()));
        }
        self.confirm_siblings(batch_id, siblings, reference, rail, false).await.map(Into::into)
    }

    /// Confirms every order in the batch with one payment reference.
    ///
    /// If a sibling already carries a payment reference from an earlier, partial attempt, that reference is used for
    /// the whole batch instead of the one supplied, so that a batch never ends up split across two references. The
    /// exception is a batch whose siblings are all already confirmed with a different reference, which is a
    /// [`ConfirmationError::Conflict`].
    pub async fn confirm_batch(&self, batch_id: &BatchId, reference: &str) -> Result<BatchConfirmation, ConfirmationError> {
        let reference = Self::validate_reference(reference)?;
        let siblings = self.fetch_batch(batch_id).await?;
        if siblings.is_empty() {
            return Err(ConfirmationError::OrderNotFound(batch_id.as_str().to_string()));
        }
        self.confirm_siblings(batch_id.clone(), siblings, reference, None, false).await
    }

    /// Confirms an order on behalf of a reconciliation sweep. Batch members take their siblings with them. The
    /// confirmation is marked as a recovery in the payment metadata.
    pub async fn recover(&self, order: &Order, reference: &PaymentReference) -> Result<ConfirmationResult, ConfirmationError> {
        match order.batch_id.clone() {
            Some(batch_id) => {
                let siblings = self.fetch_batch(&batch_id).await?;
                self.confirm_siblings(batch_id, siblings, reference.clone(), order.rail, true).await.map(Into::into)
            },
            None => self.confirm_single(order.clone(), reference.clone(), order.rail, true).await,
        }
    }

    fn validate_reference(reference: &str) -> Result<PaymentReference, ConfirmationError> {
        let reference = PaymentReference::from(reference.trim());
        if reference.is_blank() {
            return Err(ConfirmationError::InvalidReference);
        }
        Ok(reference)
    }

    async fn resolve_order(&self, target: &str) -> Result<Option<Order>, ConfirmationError> {
        let number = OrderNumber::from(target);
        let order = self.retry.run("fetch order by number", || self.db.fetch_order_by_number(&number)).await?;
        if order.is_some() {
            return Ok(order);
        }
        match target.parse::<i64>() {
            Ok(id) => Ok(self.retry.run("fetch order", || self.db.fetch_order(id)).await?),
            Err(_) => Ok(None),
        }
    }

    async fn fetch_batch(&self, batch_id: &BatchId) -> Result<Vec<Order>, ConfirmationError> {
        Ok(self.retry.run("fetch batch", || self.db.fetch_batch(batch_id)).await?)
    }

    /// Fails if `reference` has already confirmed an order that is not one of `targets`. Payment references are
    /// unique across checkouts, and only siblings in a batch may share one.
    async fn check_reference_unused(&self, reference: &PaymentReference, targets: &[Order]) -> Result<(), ConfirmationError> {
        let holders = self.retry.run("fetch orders by reference", || self.db.fetch_confirmed_by_reference(reference)).await?;
        match holders.into_iter().find(|h| targets.iter().all(|t| t.id != h.id)) {
            Some(holder) => {
                warn!(
                    "✅️ Payment reference {reference} was offered again, but it already confirmed order {}",
                    holder.order_number
                );
                Err(ConfirmationError::ReferenceInUse { reference: reference.clone(), order: holder.order_number })
            },
            None => Ok(()),
        }
    }

    async fn confirm_single(
        &self,
        order: Order,
        reference: PaymentReference,
        rail: Option<PaymentRail>,
        recovered: bool,
    ) -> Result<ConfirmationResult, ConfirmationError> {
        self.check_reference_unused(&reference, std::slice::from_ref(&order)).await?;
        let outcome = match self.confirm_order(&order, &reference, rail, recovered).await? {
            Attempt::Settled(outcome) => outcome,
            // Only batch members can diverge
            Attempt::Diverged(current) => return Err(diverged_error(&current, &reference)),
        };
        Ok(ConfirmationResult::new(reference, vec![OrderResult::new(&order, outcome)]))
    }

    /// Confirms the siblings in rounds. Each round re-reads the batch, chooses the batch reference, propagates it to
    /// every open sibling and then confirms them one by one. If a sibling turns out to carry another reference (a
    /// concurrent caller chose differently), the round is abandoned and the next one starts from a fresh read.
    async fn confirm_siblings(
        &self,
        batch_id: BatchId,
        siblings: Vec<Order>,
        supplied: PaymentReference,
        rail: Option<PaymentRail>,
        recovered: bool,
    ) -> Result<BatchConfirmation, ConfirmationError> {
        let mut siblings = siblings;
        // Orders this call confirmed in an abandoned round
        let mut confirmed_earlier = BTreeMap::new();
        for round in 1..=MAX_BATCH_ROUNDS {
            let reference = choose_batch_reference(&siblings, &supplied)?;
            if reference != supplied {
                info!("✅️ {batch_id} already carries payment reference {reference}. Using it instead of {supplied}");
            }
            self.check_reference_unused(&reference, &siblings).await?;
            self.propagate_reference(&siblings, &reference, rail).await;
            let last_round = round == MAX_BATCH_ROUNDS;
            let mut results = Vec::with_capacity(siblings.len());
            let mut diverged = false;
            for order in &siblings {
                let outcome = match self.confirm_order(order, &reference, rail, recovered).await {
                    Ok(Attempt::Settled(outcome)) => outcome,
                    Ok(Attempt::Diverged(current)) if !last_round => {
                        debug!(
                            "✅️ Order {} in {batch_id} carries {:?} instead of {reference}. Starting round {}",
                            order.order_number,
                            current.payment_reference,
                            round + 1
                        );
                        diverged = true;
                        break;
                    },
                    Ok(Attempt::Diverged(current)) => {
                        OrderOutcome::Failed { error: diverged_error(&current, &reference) }
                    },
                    Err(error) => OrderOutcome::Failed { error },
                };
                if let OrderOutcome::Failed { error } = &outcome {
                    warn!("✅️ Order {} in {batch_id} could not be confirmed. {error}", order.order_number);
                }
                let outcome = match (confirmed_earlier.remove(&order.id), outcome) {
                    (Some(earlier), OrderOutcome::AlreadyConfirmed) => earlier,
                    (_, outcome) => outcome,
                };
                results.push(OrderResult::new(order, outcome));
            }
            if !diverged {
                return Ok(Self::finish_batch(batch_id, reference, results));
            }
            for result in results {
                if matches!(result.outcome, OrderOutcome::Confirmed { .. }) {
                    confirmed_earlier.insert(result.order_id, result.outcome);
                }
            }
            siblings = self.fetch_batch(&batch_id).await?;
        }
        // The last round never diverges
        Err(ConfirmationError::Contended(OrderNumber::from(batch_id.as_str())))
    }

    fn finish_batch(batch_id: BatchId, reference: PaymentReference, results: Vec<OrderResult>) -> BatchConfirmation {
        let batch = BatchConfirmation::new(batch_id, reference, results);
        if batch.is_complete() {
            info!("✅️ {} is fully confirmed ({} orders)", batch.batch_id, batch.total_count);
        } else {
            warn!(
                "✅️ {} is only partially confirmed: {}/{} orders. Failed order ids: {:?}",
                batch.batch_id,
                batch.confirmed_count,
                batch.total_count,
                batch.failed_order_ids()
            );
        }
        batch
    }

    /// Puts `reference` on every open sibling before any of them is confirmed: drafts get it attached, and pending
    /// siblings carrying another reference get theirs replaced. A run interrupted part-way therefore leaves the
    /// batch with one reference. Every write is conditioned on what was read, so a sibling that moved on is skipped.
    async fn propagate_reference(&self, siblings: &[Order], reference: &PaymentReference, rail: Option<PaymentRail>) {
        for order in siblings {
            let written = match (order.status, &order.payment_reference) {
                (OrderStatusType::Draft, None) => {
                    self.retry.run("attach reference", || self.db.advance_to_pending(order.id, reference, rail)).await
                },
                (OrderStatusType::PendingPayment, Some(previous)) if previous != reference => {
                    self.retry
                        .run("replace pending reference", || {
                            self.db.replace_pending_reference(order.id, previous, reference)
                        })
                        .await
                },
                _ => continue,
            };
            match written {
                Ok(Some(_)) => trace!("✅️ Order {} is now pending payment with {reference}", order.order_number),
                Ok(None) => debug!("✅️ Order {} moved on before {reference} could be attached", order.order_number),
                Err(e) => warn!("✅️ Could not attach {reference} to order {}. {e}", order.order_number),
            }
        }
    }

    /// Runs the tiers for one order until one of them applies, the order turns out to be settled already, or every
    /// tier has failed.
    async fn confirm_order(
        &self,
        order: &Order,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
        recovered: bool,
    ) -> Result<Attempt, ConfirmationError> {
        let number = &order.order_number;
        let in_batch = order.batch_id.is_some();
        let mut failed_tiers = 0;
        let mut last_error = None;
        for tier in TIERS {
            let mut current = self.reload(order.id, number).await?;
            if in_batch && carries_other_reference(&current, reference) {
                return Ok(Attempt::Diverged(current));
            }
            if let Some(outcome) = settled_outcome(&current, reference)? {
                return Ok(Attempt::Settled(outcome));
            }
            if tier == ConfirmationTier::ForcedOverride && failed_tiers < 2 {
                // The earlier tiers were preempted rather than broken. Forcing the write now would override another
                // caller instead of a broken store.
                break;
            }
            if let Some(previous) = current.payment_reference.clone().filter(|p| p != reference) {
                // A standalone order paid through a new attempt. The pending reference is superseded.
                match self.retry.run("replace pending reference", || {
                    self.db.replace_pending_reference(order.id, &previous, reference)
                })
                .await
                {
                    Ok(Some(replaced)) => {
                        warn!("✅️ Pending reference {previous} of order {number} was replaced by {reference}");
                        current = replaced;
                    },
                    Ok(None) => {
                        debug!("✅️ The pending reference of order {number} changed before it could be replaced");
                        continue;
                    },
                    Err(e) => {
                        warn!("✅️ The pending reference of order {number} could not be replaced. {e}");
                        failed_tiers += 1;
                        last_error = Some(ConfirmationError::from(e));
                        continue;
                    },
                }
            }
            match self.run_tier(tier, &current, reference, rail).await {
                Ok(TierOutcome::Applied(confirmed)) => {
                    self.after_confirmation(confirmed, tier, rail, recovered).await;
                    return Ok(Attempt::Settled(OrderOutcome::Confirmed { tier }));
                },
                Ok(TierOutcome::Preempted) => {
                    if let Some(attempt) = self.blocked_by_reference(order, reference).await? {
                        return Ok(attempt);
                    }
                    debug!("✅️ The {tier} confirmation of order {number} was preempted by a concurrent update");
                },
                Err(e) => {
                    warn!("✅️ The {tier} confirmation of order {number} failed. {e}");
                    failed_tiers += 1;
                    last_error = Some(e);
                },
            }
        }
        let current = self.reload(order.id, number).await?;
        if in_batch && carries_other_reference(&current, reference) {
            return Ok(Attempt::Diverged(current));
        }
        if let Some(outcome) = settled_outcome(&current, reference)? {
            return Ok(Attempt::Settled(outcome));
        }
        Err(last_error.unwrap_or_else(|| ConfirmationError::Contended(number.clone())))
    }

    /// Called when a confirming write did not apply. If the order itself would still have accepted the write, the
    /// reference conditions refused it: either `reference` confirmed another checkout in the meantime
    /// ([`ConfirmationError::ReferenceInUse`]), or a sibling now carries another reference and the batch has to
    /// choose again. Returns `None` if the order simply changed under us.
    async fn blocked_by_reference(
        &self,
        order: &Order,
        reference: &PaymentReference,
    ) -> Result<Option<Attempt>, ConfirmationError> {
        let current = self.reload(order.id, &order.order_number).await?;
        let acceptable = current.status.is_awaiting_payment() &&
            current.payment_reference.as_ref().map(|r| r == reference).unwrap_or(true);
        if !acceptable {
            return Ok(None);
        }
        let holders =
            self.retry.run("fetch orders by reference", || self.db.fetch_confirmed_by_reference(reference)).await?;
        let same_batch = |h: &Order| current.batch_id.is_some() && h.batch_id == current.batch_id;
        if let Some(holder) = holders.into_iter().find(|h| h.id != current.id && !same_batch(h)) {
            warn!(
                "✅️ Payment reference {reference} confirmed order {} while order {} was being confirmed with it",
                holder.order_number, current.order_number
            );
            return Err(ConfirmationError::ReferenceInUse { reference: reference.clone(), order: holder.order_number });
        }
        if let Some(batch_id) = &current.batch_id {
            let siblings = self.fetch_batch(batch_id).await?;
            if siblings.iter().any(|s| s.id != current.id && carries_other_reference(s, reference)) {
                return Ok(Some(Attempt::Diverged(current)));
            }
        }
        Ok(None)
    }

    async fn reload(&self, id: i64, number: &OrderNumber) -> Result<Order, ConfirmationError> {
        self.retry
            .run("reload order", || self.db.fetch_order(id))
            .await?
            .ok_or_else(|| ConfirmationError::OrderNotFound(number.as_str().to_string()))
    }

    async fn run_tier(
        &self,
        tier: ConfirmationTier,
        order: &Order,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<TierOutcome, ConfirmationError> {
        let id = order.id;
        let applied = match tier {
            ConfirmationTier::Atomic => {
                self.retry.run("atomic confirmation", || self.db.confirm_atomic(id, reference, rail)).await
            },
            ConfirmationTier::TwoStep => self.two_step(order, reference, rail).await,
            ConfirmationTier::ForcedOverride => {
                if !self.override_guard.try_acquire() {
                    error!(
                        "🚨️ FORCED OVERRIDE REFUSED for order {}: the override limit has been reached",
                        order.order_number
                    );
                    return Err(ConfirmationError::OverrideRateLimited(order.order_number.clone()));
                }
                error!(
                    "🚨️ FORCED OVERRIDE: confirming order {} (status {}) with {reference} without a status precondition",
                    order.order_number, order.status
                );
                self.retry.run("forced override", || self.db.force_confirm(id, reference, rail)).await
            },
        };
        Ok(applied?.map(TierOutcome::Applied).unwrap_or(TierOutcome::Preempted))
    }

    async fn two_step(
        &self,
        order: &Order,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<Option<Order>, StoreError> {
        let id = order.id;
        if order.status == OrderStatusType::Draft {
            let pending = self.retry.run("attach reference", || self.db.advance_to_pending(id, reference, rail)).await?;
            if pending.is_none() {
                // Somebody else moved it off `draft`. `mark_confirmed` accepts `pending_payment` as well, so carry on.
                trace!("✅️ Order {} was no longer a draft when the reference was attached", order.order_number);
            }
        }
        self.retry.run("confirm pending order", || self.db.mark_confirmed(id, reference)).await
    }

    /// Records how the order was confirmed and notifies subscribers. Neither step can undo the confirmation, so
    /// failures are only logged.
    async fn after_confirmation(
        &self,
        confirmed: Order,
        tier: ConfirmationTier,
        rail: Option<PaymentRail>,
        recovered: bool,
    ) {
        let now = Utc::now();
        let mut metadata = confirmed.payment_metadata.clone();
        let effective_rail = confirmed.rail.or(rail);
        if let (Some(requested), Some(recorded)) = (rail, confirmed.rail) {
            if requested != recorded {
                warn!(
                    "✅️ Order {} was confirmed via {requested}, but was created for the {recorded} rail",
                    confirmed.order_number
                );
            }
        }
        metadata.confirmed_via = rail.or(confirmed.rail);
        metadata.confirmation_tier = Some(tier);
        metadata.confirmed_at = Some(now);
        if recovered {
            metadata.recovered_at = Some(now);
        }
        let order = match self.db.update_payment_metadata(confirmed.id, &metadata).await {
            Ok(order) => order,
            Err(e) => {
                warn!("✅️ Order {} is confirmed, but its payment metadata could not be updated. {e}", confirmed.order_number);
                confirmed
            },
        };
        info!("✅️ Order {} confirmed via the {tier} tier", order.order_number);
        self.producers.publish_order_confirmed(OrderConfirmedEvent::new(order, tier, effective_rail)).await;
    }
}

/// If the order no longer needs confirming, says why. Cancelled orders, and orders confirmed with a different
/// reference, are errors.
fn settled_outcome(order: &Order, reference: &PaymentReference) -> Result<Option<OrderOutcome>, ConfirmationError> {
    if order.status == OrderStatusType::Cancelled {
        return Err(ConfirmationError::OrderCancelled(order.order_number.clone()));
    }
    if !order.status.is_confirmed_or_later() {
        return Ok(None);
    }
    if order.has_reference(reference) {
        trace!("✅️ Order {} is already confirmed with {reference}", order.order_number);
        Ok(Some(OrderOutcome::AlreadyConfirmed))
    } else {
        warn!(
            "✅️ Order {} is already confirmed with {:?}. Refusing to replace it with {reference}",
            order.order_number, order.payment_reference
        );
        Err(ConfirmationError::Conflict {
            order: order.order_number.clone(),
            existing: order.payment_reference.clone(),
            supplied: reference.clone(),
        })
    }
}

/// True if the order is live and carries a reference other than `reference`.
fn carries_other_reference(order: &Order, reference: &PaymentReference) -> bool {
    order.status != OrderStatusType::Cancelled &&
        order.payment_reference.as_ref().map(|r| !r.is_blank() && r != reference).unwrap_or(false)
}

/// The error reported for a sibling that still carries another reference once the batch has run out of rounds.
fn diverged_error(order: &Order, reference: &PaymentReference) -> ConfirmationError {
    if order.status.is_confirmed_or_later() {
        ConfirmationError::Conflict {
            order: order.order_number.clone(),
            existing: order.payment_reference.clone(),
            supplied: reference.clone(),
        }
    } else {
        ConfirmationError::Contended(order.order_number.clone())
    }
}

/// Picks the reference a batch should be confirmed with.
///
/// A reference on a confirmed sibling wins, then one on a pending sibling, then the supplied one. A batch that is
/// entirely confirmed with another reference is a conflict.
fn choose_batch_reference(siblings: &[Order], supplied: &PaymentReference) -> Result<PaymentReference, ConfirmationError> {
    let confirmed_ref = siblings
        .iter()
        .filter(|o| o.status.is_confirmed_or_later())
        .find_map(|o| o.payment_reference.clone().map(|r| (o, r)));
    if let Some((holder, existing)) = confirmed_ref {
        let open = siblings.iter().any(|o| o.status.is_awaiting_payment());
        if !open && existing != *supplied {
            return Err(ConfirmationError::Conflict {
                order: holder.order_number.clone(),
                existing: Some(existing),
                supplied: supplied.clone(),
            });
        }
        return Ok(existing);
    }
    let pending_ref = siblings
        .iter()
        .filter(|o| o.status.is_awaiting_payment())
        .find_map(|o| o.payment_reference.clone().filter(|r| !r.is_blank()));
    Ok(pending_ref.unwrap_or_else(|| supplied.clone()))
}
