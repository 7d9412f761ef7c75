//! # Folio Common
//!
//! Logging configuration and small helpers shared by the Folio crates.
//!
//! ## Features
//!
//! - Logging setup on top of `tracing-subscriber`
//! - Wall-clock timestamps for cache bookkeeping

use std::time::{SystemTime, UNIX_EPOCH};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};

/// Milliseconds since the Unix epoch.
///
/// Clocks set before the epoch report zero rather than failing.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 0);
        assert!(b >= a);
    }
}
