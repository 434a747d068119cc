//! Middleware for observability and rate limiting.
//!
//! This module provides:
//! - Request logging with latency tracking
//! - Rate limiting per IP address, per endpoint class

pub mod logging;
pub mod rate_limit;

pub use logging::{request_logging, request_logging_simple};
pub use rate_limit::{rate_limit_middleware, EndpointClass, RateLimitConfig, RateLimiter};
