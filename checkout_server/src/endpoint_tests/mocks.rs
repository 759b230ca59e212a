use checkout_engine::traits::{LedgerError, LedgerTransaction, LedgerVerifier};
use mockall::mock;

mock! {
    pub Ledger {}
    impl LedgerVerifier for Ledger {
        async fn fetch_transaction(&self, signature: &str) -> Result<Option<LedgerTransaction>, LedgerError>;
    }
}
