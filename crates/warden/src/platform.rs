//! Platform plumbing shared by every client: error taxonomy and rate limiting.
//!
//! Rate limiting happens at two levels. [`ApiRateLimiter`] paces requests
//! proactively; [`SecondaryRateLimitTransport`] reacts to provider-issued
//! `Retry-After` signals by pausing every caller until the embargo lifts.

mod errors;
mod rate_limit;

pub use errors::{PlatformError, Result, short_error_message};
pub use rate_limit::{ApiRateLimiter, GITHUB_DEFAULT_RPS, SecondaryRateLimitTransport};
