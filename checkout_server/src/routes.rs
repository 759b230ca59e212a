//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! Every handler is async. Long-running work (database calls, ledger lookups) must be awaited rather than blocking the
//! worker thread, since each actix worker handles its requests sequentially.
use actix_web::{get, web, HttpResponse, Responder};
use checkout_engine::{
    db_types::{BatchId, OrderNumber, PaymentRail},
    sweepers::{PendingPaymentMonitor, PendingTransactionVerifier, StaleDraftCleanup},
    traits::{LedgerVerifier, OrderStore},
    ConfirmationApi,
    ConfirmationError,
    OrderStatusApi,
};
use chrono::Duration;
use log::*;

use crate::{
    config::SweeperConfig,
    data_objects::{ConfirmBatchRequest, ConfirmRequest, SweepParams},
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Confirmation  ----------------------------------------------------
route!(confirm => Post "/confirm" impl OrderStore);
/// Applies a payment signal to an order or batch.
///
/// The target is resolved as an order number first, then as an internal order id, then as a batch id. Confirming an
/// order that belongs to a batch confirms every order in the batch.
///
/// Repeating a request that already succeeded is harmless, and reports `already_confirmed`.
pub async fn confirm<B: OrderStore>(
    body: web::Json<ConfirmRequest>,
    api: web::Data<ConfirmationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let ConfirmRequest { target, payment_reference, rail } = body.into_inner();
    debug!("💻️ Confirmation request for {target} with reference {payment_reference}");
    let rail = rail.map(|r| r.parse::<PaymentRail>()).transpose().map_err(ConfirmationError::from)?;
    let result = api.confirm(&target, &payment_reference, rail).await.map_err(|e| {
        info!("💻️ Could not confirm {target}. {e}");
        e
    })?;
    Ok(HttpResponse::Ok().json(result))
}

route!(confirm_batch => Post "/confirm_batch" impl OrderStore);
pub async fn confirm_batch<B: OrderStore>(
    body: web::Json<ConfirmBatchRequest>,
    api: web::Data<ConfirmationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let ConfirmBatchRequest { batch_id, payment_reference } = body.into_inner();
    debug!("💻️ Batch confirmation request for {batch_id} with reference {payment_reference}");
    let result = api.confirm_batch(&BatchId::from(batch_id), &payment_reference).await?;
    Ok(HttpResponse::Ok().json(result))
}

//----------------------------------------------   Order status  ----------------------------------------------------
route!(advance_order => Post "/orders/{order_number}/advance" impl OrderStore);
/// Moves a confirmed order to the next fulfilment step: `preparing`, then `shipped`, then `delivered`.
pub async fn advance_order<B: OrderStore>(
    path: web::Path<String>,
    api: web::Data<OrderStatusApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let number = OrderNumber::from(path.into_inner());
    let order = api.advance_fulfilment(&number).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(cancel_order => Post "/orders/{order_number}/cancel" impl OrderStore);
pub async fn cancel_order<B: OrderStore>(
    path: web::Path<String>,
    api: web::Data<OrderStatusApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let number = OrderNumber::from(path.into_inner());
    info!("💻️ Cancel order request for {number}");
    let order = api.cancel(&number).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(uncancel_order => Post "/orders/{order_number}/uncancel" impl OrderStore);
pub async fn uncancel_order<B: OrderStore>(
    path: web::Path<String>,
    api: web::Data<OrderStatusApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let number = OrderNumber::from(path.into_inner());
    info!("💻️ Un-cancel order request for {number}");
    let order = api.uncancel(&number).await?;
    Ok(HttpResponse::Ok().json(order))
}

//----------------------------------------------   Sweeps  ----------------------------------------------------
route!(stale_drafts => Post "/sweeps/stale_drafts" impl OrderStore);
/// Deletes abandoned drafts now, rather than waiting for the scheduled sweep.
pub async fn stale_drafts<B: OrderStore>(
    params: web::Query<SweepParams>,
    defaults: web::Data<SweeperConfig>,
    sweeper: web::Data<StaleDraftCleanup<B>>,
) -> Result<HttpResponse, ServerError> {
    let max_age = params.max_age_hours.map(Duration::hours).unwrap_or(defaults.draft_max_age);
    debug!("💻️ Manual stale draft sweep. Max age: {}h", max_age.num_hours());
    let report = sweeper.run(max_age).await?;
    Ok(HttpResponse::Ok().json(report))
}

route!(pending_report => Get "/sweeps/pending_report" impl OrderStore);
pub async fn pending_report<B: OrderStore>(
    params: web::Query<SweepParams>,
    defaults: web::Data<SweeperConfig>,
    monitor: web::Data<PendingPaymentMonitor<B>>,
) -> Result<HttpResponse, ServerError> {
    let max_age = params.max_age_hours.map(Duration::hours).unwrap_or(defaults.pending_max_age);
    let limit = params.limit.unwrap_or(defaults.pending_report_limit);
    let report = monitor.run(max_age, limit).await?;
    Ok(HttpResponse::Ok().json(report))
}

route!(verify_pending => Post "/sweeps/verify_pending" impl OrderStore, LedgerVerifier);
/// Checks pending blockchain payments against the ledger now. Only registered when a ledger node is configured.
pub async fn verify_pending<B, L>(
    params: web::Query<SweepParams>,
    defaults: web::Data<SweeperConfig>,
    verifier: web::Data<PendingTransactionVerifier<B, L>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    L: LedgerVerifier,
{
    let limit = params.limit.unwrap_or(defaults.verify_batch_size);
    let report = verifier.run(limit).await?;
    Ok(HttpResponse::Ok().json(report))
}
