pub mod retry;
pub mod timeout;

pub use retry::{backoff_delay, RetryConfig};
pub use timeout::TimeoutExt;
