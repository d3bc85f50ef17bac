//! 调度步骤

pub mod retry;
pub mod stream;

pub use retry::{AttemptError, Retrier, RetryConfig};
pub use stream::{metered_stream, SseStream, StreamMeter};
