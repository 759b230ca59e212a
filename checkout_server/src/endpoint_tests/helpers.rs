use actix_web::{http::StatusCode, test, test::TestRequest, web::ServiceConfig, App};
use checkout_engine::{
    events::EventProducers,
    test_utils::prepare_env::new_test_db,
    SqliteDatabase,
};
use log::debug;
use serde::Serialize;

use crate::{
    config::ServerConfig,
    server::{build_services, Services},
};

/// Services backed by a fresh test database, with no ledger node and no notification hooks.
pub async fn test_services() -> Services {
    let db = new_test_db().await;
    build_services(&ServerConfig::default(), db, EventProducers::default()).expect("Error building services")
}

pub fn db(services: &Services) -> SqliteDatabase {
    services.db().clone()
}

pub async fn get_request<F>(path: &str, configure: F) -> (StatusCode, String)
where F: FnOnce(&mut ServiceConfig) {
    send(TestRequest::get().uri(path), configure).await
}

pub async fn post_request<F>(path: &str, configure: F) -> (StatusCode, String)
where F: FnOnce(&mut ServiceConfig) {
    send(TestRequest::post().uri(path), configure).await
}

pub async fn post_json<T, F>(path: &str, body: &T, configure: F) -> (StatusCode, String)
where
    T: Serialize,
    F: FnOnce(&mut ServiceConfig),
{
    send(TestRequest::post().uri(path).set_json(body), configure).await
}

async fn send<F>(req: TestRequest, configure: F) -> (StatusCode, String)
where F: FnOnce(&mut ServiceConfig) {
    let app = App::new().configure(configure);
    let service = test::init_service(app).await;
    debug!("Making request");
    let res = test::call_service(&service, req.to_request()).await;
    let status = res.status();
    let body = test::read_body(res).await;
    let body = String::from_utf8_lossy(&body).into_owned();
    (status, body)
}
