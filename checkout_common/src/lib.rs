mod helpers;
mod token_amount;

pub mod op;
mod secret;

pub use helpers::{parse_boolean_flag, parse_duration_secs};
pub use secret::Secret;
pub use token_amount::{TokenAmount, TokenAmountConversionError, BASE_UNITS_PER_TOKEN};
