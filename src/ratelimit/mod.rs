//! Rate limiting decisions and orchestration.

mod decision;
mod fixed;
mod limiter;
mod sliding;

pub use decision::{
    Decision, DenialResponse, HeaderApplier, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER,
};
pub use limiter::{DenialHandler, Evaluation, KeyGenerator, RateLimiter, RequestInfo};
