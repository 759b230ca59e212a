pub mod flaky_store;
