use checkout_engine::{
    events::EventProducers,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    BatchConfirmation,
    ConfirmationApi,
    ConfirmationError,
    ConfirmationResult,
    OrderStatusApi,
    SqliteDatabase,
};
use cucumber::World;
use log::*;

#[derive(Default, Debug, World)]
pub struct CheckoutWorld {
    pub system: Option<CheckoutSystem>,
    pub last_confirmation: Option<Result<ConfirmationResult, ConfirmationError>>,
    pub last_batch: Option<Result<BatchConfirmation, ConfirmationError>>,
}

#[derive(Debug)]
pub struct CheckoutSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub api: ConfirmationApi<SqliteDatabase>,
    pub status_api: OrderStatusApi<SqliteDatabase>,
}

impl CheckoutWorld {
    pub fn system(&self) -> &CheckoutSystem {
        self.system.as_ref().expect("Checkout system not initialised")
    }

    pub fn api(&self) -> &ConfirmationApi<SqliteDatabase> {
        &self.system().api
    }

    pub fn db(&self) -> &SqliteDatabase {
        &self.system().db
    }

    pub fn last_error(&self) -> ConfirmationError {
        match (&self.last_confirmation, &self.last_batch) {
            (Some(Err(e)), _) | (_, Some(Err(e))) => e.clone(),
            _ => panic!("The last confirmation did not fail"),
        }
    }
}

impl CheckoutSystem {
    pub async fn new() -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 1).await.expect("Error creating connection to database");
        debug!("Created database: {url}");
        let api = ConfirmationApi::new(db.clone(), EventProducers::default());
        let status_api = OrderStatusApi::new(db.clone());
        Self { db_path: url, db, api, status_api }
    }
}
