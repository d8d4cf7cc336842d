//! Conditional logging macros gated on a module-level `ENABLE_LOGS` flag.
//!
//! The sampling loop and the aggregator log on every tick, which is noisy at
//! a short interval. Each module that uses these macros declares its own flag
//! so its per-tick output can be silenced without touching `RUST_LOG`:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("tick {} folded", tick);
//! ```

/// Conditional `log::debug!`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Conditional `log::info!`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional `log::warn!`.
///
/// Warnings are still subject to the flag; keep `ENABLE_LOGS = true` in
/// modules where a failure must always surface.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}
