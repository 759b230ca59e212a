use checkout_engine::{
    db_types::{BatchId, OrderStatusType, PaymentRail},
    ConfirmationStatus,
    ErrorKind,
    OrderStore,
};
use cucumber::{then, when};
use serde_json::json;

use crate::cucumber::CheckoutWorld;

fn parse_label<T: serde::de::DeserializeOwned>(label: &str) -> T {
    serde_json::from_value(json!(label)).unwrap_or_else(|e| panic!("'{label}' is not a valid label. {e}"))
}

#[when(expr = "I confirm {word} with reference {word}")]
async fn confirm(world: &mut CheckoutWorld, target: String, reference: String) {
    let result = world.api().confirm(&target, &reference, None).await;
    world.last_confirmation = Some(result);
    world.last_batch = None;
}

#[when(expr = "I confirm {word} with reference {word} via {word}")]
async fn confirm_with_rail(world: &mut CheckoutWorld, target: String, reference: String, rail: String) {
    let result = match rail.parse::<PaymentRail>() {
        Ok(rail) => world.api().confirm(&target, &reference, Some(rail)).await,
        Err(e) => Err(e.into()),
    };
    world.last_confirmation = Some(result);
    world.last_batch = None;
}

#[when(expr = "I confirm batch {word} with reference {word}")]
async fn confirm_batch(world: &mut CheckoutWorld, batch: String, reference: String) {
    let result = world.api().confirm_batch(&BatchId::from(batch), &reference).await;
    world.last_batch = Some(result);
    world.last_confirmation = None;
}

#[then(expr = "the confirmation status is {word}")]
async fn check_status(world: &mut CheckoutWorld, status: String) {
    let expected = parse_label::<ConfirmationStatus>(&status);
    let actual = match (&world.last_confirmation, &world.last_batch) {
        (Some(Ok(result)), _) => result.status,
        (_, Some(Ok(batch))) => ConfirmationStatus::from_outcomes(batch.results.iter().map(|r| &r.outcome)),
        _ => panic!("The last confirmation failed: {:?} {:?}", world.last_confirmation, world.last_batch),
    };
    assert_eq!(actual, expected);
}

#[then(expr = "{int} of {int} orders were confirmed")]
async fn check_batch_counts(world: &mut CheckoutWorld, confirmed: usize, total: usize) {
    let batch = match &world.last_batch {
        Some(Ok(batch)) => batch,
        other => panic!("No successful batch confirmation was recorded: {other:?}"),
    };
    assert_eq!((batch.confirmed_count, batch.total_count), (confirmed, total));
}

#[then(expr = "the confirmation fails with error kind {word}")]
async fn check_failure(world: &mut CheckoutWorld, kind: String) {
    let expected = parse_label::<ErrorKind>(&kind);
    let err = world.last_error();
    assert_eq!(err.kind(), expected, "Unexpected error: {err}");
}

#[then(expr = "order {word} is {word}")]
async fn check_order_status(world: &mut CheckoutWorld, number: String, status: String) {
    let expected = status.parse::<OrderStatusType>().expect("Not an order status");
    let order =
        world.db().fetch_order_by_number(&number.into()).await.expect("Error fetching order").expect("No such order");
    assert_eq!(order.status, expected);
}

#[then(expr = "order {word} is {word} with reference {word}")]
async fn check_order_reference(world: &mut CheckoutWorld, number: String, status: String, reference: String) {
    let expected = status.parse::<OrderStatusType>().expect("Not an order status");
    let order =
        world.db().fetch_order_by_number(&number.into()).await.expect("Error fetching order").expect("No such order");
    assert_eq!(order.status, expected);
    assert_eq!(order.payment_reference.map(|r| r.0), Some(reference));
}

#[then(expr = "order {word} was paid via {word}")]
async fn check_order_rail(world: &mut CheckoutWorld, number: String, rail: String) {
    let expected = rail.parse::<PaymentRail>().expect("Not a payment rail");
    let order =
        world.db().fetch_order_by_number(&number.into()).await.expect("Error fetching order").expect("No such order");
    assert_eq!(order.rail, Some(expected));
}
