use std::{env, time::Duration};

use checkout_common::{parse_boolean_flag, parse_duration_secs, Secret};
use checkout_engine::{
    db_types::TokenAmount,
    ledger::{DEFAULT_AMOUNT_TOLERANCE, DEFAULT_LEDGER_TIMEOUT},
    sweepers::{
        DEFAULT_DRAFT_MAX_AGE_HOURS,
        DEFAULT_PENDING_MAX_AGE_HOURS,
        DEFAULT_PENDING_REPORT_LIMIT,
        DEFAULT_VERIFY_BATCH_SIZE,
    },
    RetryPolicy,
};
use log::*;

const DEFAULT_CKO_HOST: &str = "127.0.0.1";
const DEFAULT_CKO_PORT: u16 = 8370;
const DEFAULT_DRAFT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_VERIFY_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
const DEFAULT_OVERRIDE_LIMIT: usize = 5;
const DEFAULT_OVERRIDE_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// JSON-RPC endpoint of the ledger node. Blockchain payments are not verified if this is not set.
    pub ledger_rpc_url: Option<Secret<String>>,
    pub ledger_timeout: Duration,
    /// When set, verified transfers must land in this wallet.
    pub merchant_wallet: Option<String>,
    /// The largest difference between a verified transfer and the expected amount that still counts as a match.
    pub amount_tolerance: TokenAmount,
    /// Where `OrderConfirmed` notifications are POSTed. They are only logged if this is not set.
    pub webhook_url: Option<String>,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    /// The most forced overrides allowed in any `override_window`.
    pub override_limit: usize,
    pub override_window: Duration,
    pub sweepers: SweeperConfig,
}

/// Schedules and thresholds for the background sweepers. An interval of zero disables that sweeper.
#[derive(Clone, Debug)]
pub struct SweeperConfig {
    pub draft_sweep_interval: Duration,
    pub draft_max_age: chrono::Duration,
    pub pending_sweep_interval: Duration,
    pub pending_max_age: chrono::Duration,
    pub pending_report_limit: u32,
    pub verify_sweep_interval: Duration,
    pub verify_batch_size: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            draft_sweep_interval: DEFAULT_DRAFT_SWEEP_INTERVAL,
            draft_max_age: chrono::Duration::hours(DEFAULT_DRAFT_MAX_AGE_HOURS),
            pending_sweep_interval: DEFAULT_PENDING_SWEEP_INTERVAL,
            pending_max_age: chrono::Duration::hours(DEFAULT_PENDING_MAX_AGE_HOURS),
            pending_report_limit: DEFAULT_PENDING_REPORT_LIMIT,
            verify_sweep_interval: DEFAULT_VERIFY_SWEEP_INTERVAL,
            verify_batch_size: DEFAULT_VERIFY_BATCH_SIZE,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CKO_HOST.to_string(),
            port: DEFAULT_CKO_PORT,
            database_url: String::default(),
            ledger_rpc_url: None,
            ledger_timeout: DEFAULT_LEDGER_TIMEOUT,
            merchant_wallet: None,
            amount_tolerance: DEFAULT_AMOUNT_TOLERANCE,
            webhook_url: None,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            override_limit: DEFAULT_OVERRIDE_LIMIT,
            override_window: DEFAULT_OVERRIDE_WINDOW,
            sweepers: SweeperConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("CKO_HOST").ok().unwrap_or_else(|| DEFAULT_CKO_HOST.into());
        let port = env::var("CKO_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for CKO_PORT. {e} Using the default, {DEFAULT_CKO_PORT}, instead."
                    );
                    DEFAULT_CKO_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_CKO_PORT);
        let database_url = env::var("CKO_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ CKO_DATABASE_URL is not set. Please set it to the URL for the checkout database.");
            String::default()
        });
        let ledger_rpc_url = non_empty_var("CKO_LEDGER_RPC_URL").map(Secret::new);
        if ledger_rpc_url.is_none() {
            warn!("🪛️ CKO_LEDGER_RPC_URL is not set. Blockchain payments will not be verified against the ledger.");
        }
        let ledger_timeout = duration_var("CKO_LEDGER_TIMEOUT", DEFAULT_LEDGER_TIMEOUT);
        let merchant_wallet = non_empty_var("CKO_MERCHANT_WALLET");
        let amount_tolerance = TokenAmount::from_base_units(number_var(
            "CKO_AMOUNT_TOLERANCE",
            DEFAULT_AMOUNT_TOLERANCE.value(),
        ));
        let webhook_url = non_empty_var("CKO_WEBHOOK_URL");
        let retry_attempts = number_var("CKO_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS);
        let retry_base_delay = env::var("CKO_RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().map_err(|e| warn!("🪛️ Invalid CKO_RETRY_BASE_DELAY_MS. {e}")).ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_BASE_DELAY);
        let override_limit = number_var("CKO_OVERRIDE_LIMIT", DEFAULT_OVERRIDE_LIMIT);
        let override_window = duration_var("CKO_OVERRIDE_WINDOW", DEFAULT_OVERRIDE_WINDOW);
        let sweepers = SweeperConfig::from_env_or_default();
        Self {
            host,
            port,
            database_url,
            ledger_rpc_url,
            ledger_timeout,
            merchant_wallet,
            amount_tolerance,
            webhook_url,
            retry_attempts,
            retry_base_delay,
            override_limit,
            override_window,
            sweepers,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_base_delay)
    }
}

impl SweeperConfig {
    pub fn from_env_or_default() -> Self {
        let defaults = Self::default();
        if !parse_boolean_flag(env::var("CKO_ENABLE_SWEEPERS").ok(), true) {
            info!("🪛️ Background sweepers are disabled. Sweeps can still be triggered through the API.");
            return Self {
                draft_sweep_interval: Duration::ZERO,
                pending_sweep_interval: Duration::ZERO,
                verify_sweep_interval: Duration::ZERO,
                ..defaults
            };
        }
        Self {
            draft_sweep_interval: duration_var("CKO_DRAFT_SWEEP_INTERVAL", defaults.draft_sweep_interval),
            draft_max_age: hours_var("CKO_DRAFT_MAX_AGE_HOURS", defaults.draft_max_age),
            pending_sweep_interval: duration_var("CKO_PENDING_SWEEP_INTERVAL", defaults.pending_sweep_interval),
            pending_max_age: hours_var("CKO_PENDING_MAX_AGE_HOURS", defaults.pending_max_age),
            pending_report_limit: number_var("CKO_PENDING_REPORT_LIMIT", defaults.pending_report_limit),
            verify_sweep_interval: duration_var("CKO_VERIFY_SWEEP_INTERVAL", defaults.verify_sweep_interval),
            verify_batch_size: number_var("CKO_VERIFY_BATCH_SIZE", defaults.verify_batch_size),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Reads a whole number of seconds.
fn duration_var(name: &str, default: Duration) -> Duration {
    match env::var(name) {
        Err(_) => default,
        Ok(s) => parse_duration_secs(Some(s.clone())).unwrap_or_else(|| {
            warn!("🪛️ Invalid configuration value for {name}: {s}. Using the default of {}s.", default.as_secs());
            default
        }),
    }
}

fn hours_var(name: &str, default: chrono::Duration) -> chrono::Duration {
    env::var(name)
        .map_err(|_| {
            info!("🪛️ {name} is not set. Using the default value of {} hrs.", default.num_hours());
        })
        .and_then(|s| {
            s.trim()
                .parse::<i64>()
                .map_err(|e| warn!("🪛️ Invalid configuration value for {name}. {e}"))
                .and_then(|h| {
                    if h > 0 {
                        Ok(chrono::Duration::hours(h))
                    } else {
                        warn!("🪛️ {name} must be a positive number of hours.");
                        Err(())
                    }
                })
        })
        .ok()
        .unwrap_or(default)
}

fn number_var<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Err(_) => default,
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            warn!("🪛️ Invalid configuration value for {name}: {s}. {e} Using the default, {default}.");
            default
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_CKO_PORT);
        assert!(config.ledger_rpc_url.is_none());
        assert_eq!(config.override_limit, 5);
        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(config.sweepers.draft_max_age, chrono::Duration::hours(24));
        assert_eq!(config.sweepers.pending_max_age, chrono::Duration::hours(2));
        assert_eq!(config.sweepers.verify_batch_size, 20);
    }

    #[test]
    fn reading_values() {
        env::set_var("CKO_TEST_HOURS", "36");
        env::set_var("CKO_TEST_BAD_HOURS", "-3");
        env::set_var("CKO_TEST_SECS", "90");
        env::set_var("CKO_TEST_NUMBER", "seven");
        env::set_var("CKO_TEST_BLANK", "   ");
        assert_eq!(hours_var("CKO_TEST_HOURS", chrono::Duration::hours(1)), chrono::Duration::hours(36));
        assert_eq!(hours_var("CKO_TEST_BAD_HOURS", chrono::Duration::hours(1)), chrono::Duration::hours(1));
        assert_eq!(duration_var("CKO_TEST_SECS", Duration::ZERO), Duration::from_secs(90));
        assert_eq!(number_var("CKO_TEST_NUMBER", 7u32), 7);
        assert_eq!(non_empty_var("CKO_TEST_BLANK"), None);
    }
}
