use actix_web::http::StatusCode;
use checkout_engine::{
    db_types::NewOrder,
    test_utils::prepare_env::tear_down,
    OrderStore,
};
use serde_json::{json, Value};

use super::helpers::{db, post_json, post_request, test_services};
use crate::server::configure_routes;

fn parse(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("Response is not JSON. {e}. {body}"))
}

#[actix_web::test]
async fn confirm_an_order() {
    let _ = env_logger::try_init().ok();
    let services = test_services().await;
    db(&services).insert_order(NewOrder::new("8001")).await.unwrap();
    let body = json!({"target": "8001", "payment_reference": "pi_8001", "rail": "card"});

    let (status, res) = post_json("/confirm", &body, |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    let res = parse(&res);
    assert_eq!(res["status"], "confirmed");
    assert_eq!(res["payment_reference"], "pi_8001");
    assert_eq!(res["results"][0]["outcome"], "confirmed");

    let (status, res) = post_json("/confirm", &body, |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&res)["status"], "already_confirmed");
    tear_down(db(&services)).await;
}

#[actix_web::test]
async fn confirmation_errors() {
    let _ = env_logger::try_init().ok();
    let services = test_services().await;
    db(&services).insert_order(NewOrder::new("8011")).await.unwrap();
    let first = json!({"target": "8011", "payment_reference": "pi_first"});
    let (status, _) = post_json("/confirm", &first, |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::OK);

    let second = json!({"target": "8011", "payment_reference": "pi_second"});
    let (status, res) = post_json("/confirm", &second, |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse(&res)["kind"], "conflict");

    let missing = json!({"target": "no-such-order", "payment_reference": "pi_x"});
    let (status, res) = post_json("/confirm", &missing, |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse(&res)["kind"], "not_found");

    let bad_rail = json!({"target": "8011", "payment_reference": "pi_first", "rail": "barter"});
    let (status, res) = post_json("/confirm", &bad_rail, |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse(&res)["kind"], "invalid");

    let blank = json!({"target": "8011", "payment_reference": "  "});
    let (status, _) = post_json("/confirm", &blank, |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let incomplete = json!({"target": "8011"});
    let (status, _) = post_json("/confirm", &incomplete, |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    tear_down(db(&services)).await;
}

#[actix_web::test]
async fn confirm_a_batch() {
    let _ = env_logger::try_init().ok();
    let services = test_services().await;
    for number in ["8021", "8022"] {
        db(&services).insert_order(NewOrder::new(number).in_batch("cart-80")).await.unwrap();
    }
    let body = json!({"batch_id": "cart-80", "payment_reference": "ch_cart80"});
    let (status, res) = post_json("/confirm_batch", &body, |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    let res = parse(&res);
    assert_eq!(res["confirmed_count"], 2);
    assert_eq!(res["total_count"], 2);

    let unknown = json!({"batch_id": "cart-81", "payment_reference": "ch_cart81"});
    let (status, _) = post_json("/confirm_batch", &unknown, |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    tear_down(db(&services)).await;
}

#[actix_web::test]
async fn merchant_status_updates() {
    let _ = env_logger::try_init().ok();
    let services = test_services().await;
    db(&services).insert_order(NewOrder::new("8031")).await.unwrap();

    // Only confirmed orders move along the fulfilment flow
    let (status, _) = post_request("/orders/8031/advance", |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let body = json!({"target": "8031", "payment_reference": "pi_8031"});
    post_json("/confirm", &body, |cfg| configure_routes(cfg, &services)).await;
    let (status, res) = post_request("/orders/8031/advance", |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    assert_eq!(parse(&res)["status"], "preparing");

    let (status, res) = post_request("/orders/8031/cancel", |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&res)["status"], "cancelled");

    let (status, res) = post_request("/orders/8031/uncancel", |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&res)["status"], "preparing");

    let (status, _) = post_request("/orders/8099/cancel", |cfg| configure_routes(cfg, &services)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    tear_down(db(&services)).await;
}
