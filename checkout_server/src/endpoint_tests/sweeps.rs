use actix_web::{http::StatusCode, web};
use checkout_engine::{
    db_types::{NewOrder, OrderStatusType, PaymentReference, TokenAmount},
    events::EventProducers,
    sweepers::PendingTransactionVerifier,
    test_utils::prepare_env::tear_down,
    traits::{BalanceChange, LedgerTransaction},
    ConfirmationApi,
    OrderStore,
    RetryPolicy,
    SqliteDatabase,
};
use chrono::{Duration, Utc};
use serde_json::Value;

use super::{
    helpers::{db, get_request, post_request, test_services},
    mocks::MockLedger,
};
use crate::{config::SweeperConfig, routes::VerifyPendingRoute, server::configure_routes};

const PAYER: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
const MERCHANT: &str = "HN7cABqLq46Es1jh92dQQisAq662SmxELLLsHHe4YWrH";

#[actix_web::test]
async fn manual_draft_sweep() {
    let _ = env_logger::try_init().ok();
    let services = test_services().await;
    let old = Utc::now() - Duration::hours(30);
    db(&services).insert_order(NewOrder::new("9001").created_at(old)).await.unwrap();
    db(&services).insert_order(NewOrder::new("9002")).await.unwrap();

    let (status, body) = post_request("/sweeps/stale_drafts", |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let report: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["removed"], 1);
    assert_eq!(report["removed_orders"][0], "9001");

    let (status, body) =
        post_request("/sweeps/stale_drafts?max_age_hours=0", |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert!(db(&services).fetch_order_by_number(&"9002".into()).await.unwrap().is_some());
    tear_down(db(&services)).await;
}

#[actix_web::test]
async fn pending_payment_report() {
    let _ = env_logger::try_init().ok();
    let services = test_services().await;
    let (order, _) = db(&services)
        .insert_order(NewOrder::new("9011").created_at(Utc::now() - Duration::hours(3)))
        .await
        .unwrap();
    db(&services).advance_to_pending(order.id, &PaymentReference::from("pi_9011"), None).await.unwrap();

    let (status, body) = get_request("/sweeps/pending_report", |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let report: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["total"], 1);
    assert_eq!(report["unclassified"]["orders"][0], "9011");
    assert_eq!(report["truncated"], false);

    let (status, body) =
        get_request("/sweeps/pending_report?max_age_hours=4", |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["total"], 0);
    tear_down(db(&services)).await;
}

#[actix_web::test]
async fn verification_needs_a_ledger() {
    let _ = env_logger::try_init().ok();
    let services = test_services().await;
    let (status, _) = post_request("/sweeps/verify_pending", |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    tear_down(db(&services)).await;
}

#[actix_web::test]
async fn manual_verification() {
    let _ = env_logger::try_init().ok();
    let services = test_services().await;
    let store = db(&services);
    let signature = "4".repeat(88);
    let (order, _) =
        store.insert_order(NewOrder::new("9021").expecting_transfer(TokenAmount::from_whole(5), PAYER)).await.unwrap();
    store.advance_to_pending(order.id, &PaymentReference::from(signature.as_str()), None).await.unwrap();

    let mut ledger = MockLedger::new();
    ledger.expect_fetch_transaction().times(1).returning(|sig| {
        let received = TokenAmount::from_whole(5);
        Ok(Some(LedgerTransaction {
            signature: sig.to_string(),
            error: None,
            balance_changes: vec![
                BalanceChange::new(PAYER, TokenAmount::from_base_units(-received.value() - 5_000)),
                BalanceChange::new(MERCHANT, received),
            ],
        }))
    });
    let confirmations = ConfirmationApi::new(store.clone(), EventProducers::default());
    let verifier = PendingTransactionVerifier::new(confirmations, ledger, EventProducers::default())
        .with_merchant_wallet(Some(MERCHANT.to_string()))
        .with_ledger_retry_policy(RetryPolicy::none());
    let verifier = web::Data::new(verifier);

    let (status, body) = post_request("/sweeps/verify_pending?limit=5", move |cfg| {
        cfg.app_data(verifier)
            .app_data(web::Data::new(SweeperConfig::default()))
            .service(VerifyPendingRoute::<SqliteDatabase, MockLedger>::new());
    })
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let report: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["examined"], 1);
    assert_eq!(report["confirmed"], 1);
    assert_eq!(report["results"][0]["outcome"], "confirmed");

    let order = store.fetch_order_by_number(&"9021".into()).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatusType::Confirmed);
    tear_down(store).await;
}
