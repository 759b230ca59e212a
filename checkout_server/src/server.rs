use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, web::ServiceConfig, App, HttpServer};
use checkout_engine::{
    db_types::TokenAmount,
    db_url,
    events::EventProducers,
    ledger::RpcLedgerClient,
    sweepers::{PendingPaymentMonitor, PendingTransactionVerifier, StaleDraftCleanup},
    ConfirmationApi,
    OrderStatusApi,
    OverrideGuard,
    SqliteDatabase,
};
use log::*;

use crate::{
    config::{ServerConfig, SweeperConfig},
    errors::ServerError,
    notifier::create_notification_handlers,
    routes::{
        health,
        AdvanceOrderRoute,
        CancelOrderRoute,
        ConfirmBatchRoute,
        ConfirmRoute,
        PendingReportRoute,
        StaleDraftsRoute,
        UncancelOrderRoute,
        VerifyPendingRoute,
    },
    workers::{start_draft_cleanup_worker, start_pending_report_worker, start_verification_worker},
};

/// Everything the request handlers and the background workers share.
#[derive(Clone)]
pub struct Services {
    pub confirmations: ConfirmationApi<SqliteDatabase>,
    pub producers: EventProducers,
    pub ledger: Option<RpcLedgerClient>,
    pub merchant_wallet: Option<String>,
    pub amount_tolerance: TokenAmount,
    pub sweepers: SweeperConfig,
}

impl Services {
    pub fn db(&self) -> &SqliteDatabase {
        self.confirmations.db()
    }

    pub fn status_api(&self) -> OrderStatusApi<SqliteDatabase> {
        OrderStatusApi::new(self.db().clone()).with_retry_policy(self.confirmations.retry_policy())
    }

    pub fn draft_cleanup(&self) -> StaleDraftCleanup<SqliteDatabase> {
        StaleDraftCleanup::new(self.db().clone()).with_retry_policy(self.confirmations.retry_policy())
    }

    pub fn pending_monitor(&self) -> PendingPaymentMonitor<SqliteDatabase> {
        PendingPaymentMonitor::new(self.db().clone()).with_retry_policy(self.confirmations.retry_policy())
    }

    pub fn verifier(&self) -> Option<PendingTransactionVerifier<SqliteDatabase, RpcLedgerClient>> {
        self.ledger.clone().map(|ledger| {
            PendingTransactionVerifier::new(self.confirmations.clone(), ledger, self.producers.clone())
                .with_merchant_wallet(self.merchant_wallet.clone())
                .with_tolerance(self.amount_tolerance)
        })
    }
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let url = if config.database_url.is_empty() { db_url() } else { config.database_url.clone() };
    let db = SqliteDatabase::new_with_url(&url, 25).await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.run_migrations().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let handlers = create_notification_handlers(config.webhook_url.clone())?;
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let services = build_services(&config, db, producers)?;
    start_workers(&services);
    let srv = create_server_instance(config, services)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn build_services(
    config: &ServerConfig,
    db: SqliteDatabase,
    producers: EventProducers,
) -> Result<Services, ServerError> {
    let guard = Arc::new(OverrideGuard::new(config.override_limit, config.override_window));
    let confirmations = ConfirmationApi::new(db, producers.clone())
        .with_retry_policy(config.retry_policy())
        .with_override_guard(guard);
    let ledger = config
        .ledger_rpc_url
        .clone()
        .map(|url| RpcLedgerClient::new(url, config.ledger_timeout))
        .transpose()
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    Ok(Services {
        confirmations,
        producers,
        ledger,
        merchant_wallet: config.merchant_wallet.clone(),
        amount_tolerance: config.amount_tolerance,
        sweepers: config.sweepers.clone(),
    })
}

fn start_workers(services: &Services) {
    let cfg = &services.sweepers;
    let _ = start_draft_cleanup_worker(services.draft_cleanup(), cfg.draft_sweep_interval, cfg.draft_max_age);
    let _ = start_pending_report_worker(
        services.pending_monitor(),
        cfg.pending_sweep_interval,
        cfg.pending_max_age,
        cfg.pending_report_limit,
    );
    match services.verifier() {
        Some(verifier) => {
            let _ = start_verification_worker(verifier, cfg.verify_sweep_interval, cfg.verify_batch_size);
        },
        None => warn!("🕰️ No ledger node is configured, so blockchain payments will not be verified"),
    }
}

pub fn create_server_instance(config: ServerConfig, services: Services) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let services = services.clone();
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("cko::access_log"))
            .configure(move |cfg| configure_routes(cfg, &services))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}

/// Registers the app data and every route. The verification route only exists when a ledger node is configured.
pub fn configure_routes(cfg: &mut ServiceConfig, services: &Services) {
    cfg.app_data(web::Data::new(services.confirmations.clone()))
        .app_data(web::Data::new(services.status_api()))
        .app_data(web::Data::new(services.draft_cleanup()))
        .app_data(web::Data::new(services.pending_monitor()))
        .app_data(web::Data::new(services.sweepers.clone()))
        .service(health)
        .service(ConfirmRoute::<SqliteDatabase>::new())
        .service(ConfirmBatchRoute::<SqliteDatabase>::new())
        .service(AdvanceOrderRoute::<SqliteDatabase>::new())
        .service(CancelOrderRoute::<SqliteDatabase>::new())
        .service(UncancelOrderRoute::<SqliteDatabase>::new())
        .service(StaleDraftsRoute::<SqliteDatabase>::new())
        .service(PendingReportRoute::<SqliteDatabase>::new());
    if let Some(verifier) = services.verifier() {
        cfg.app_data(web::Data::new(verifier)).service(VerifyPendingRoute::<SqliteDatabase, RpcLedgerClient>::new());
    }
}
