//! Network helpers shared by registry clients.

mod retry;

pub use retry::{retry_transient, RetryConfig};
