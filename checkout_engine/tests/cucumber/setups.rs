use checkout_engine::{
    db_types::{NewOrder, PaymentRail, PaymentReference},
    OrderStore,
};
use cucumber::given;

use crate::cucumber::{CheckoutSystem, CheckoutWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut CheckoutWorld) {
    let system = CheckoutSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "a draft order {word}")]
async fn draft_order(world: &mut CheckoutWorld, number: String) {
    world.db().insert_order(NewOrder::new(number)).await.expect("Error inserting order");
}

#[given(expr = "a draft order {word} in batch {word}")]
async fn draft_order_in_batch(world: &mut CheckoutWorld, number: String, batch: String) {
    world.db().insert_order(NewOrder::new(number).in_batch(batch)).await.expect("Error inserting order");
}

#[given(expr = "a draft {word} order {word}")]
async fn draft_order_with_rail(world: &mut CheckoutWorld, rail: String, number: String) {
    let rail = rail.parse::<PaymentRail>().expect("Not a payment rail");
    world.db().insert_order(NewOrder::new(number).with_rail(rail)).await.expect("Error inserting order");
}

#[given(expr = "order {word} is awaiting payment with reference {word}")]
async fn awaiting_payment(world: &mut CheckoutWorld, number: String, reference: String) {
    let db = world.db();
    let order = db.fetch_order_by_number(&number.into()).await.expect("Error fetching order").expect("No such order");
    db.advance_to_pending(order.id, &PaymentReference::from(reference), None)
        .await
        .expect("Error updating order")
        .expect("Order was not a draft");
}

#[given(expr = "order {word} has been cancelled")]
async fn cancelled(world: &mut CheckoutWorld, number: String) {
    world.system().status_api.cancel(&number.into()).await.expect("Error cancelling order");
}
