//! Logging entry point
//!
//! Crates pull in the macros with `use utils::log;` and call them as
//! `log::info!(...)`, `log::profiling!(...)` and so on. The level check
//! is shared, so guard expensive message construction with
//! `log::enabled(LogLevel::profiling)`.
#![allow(unused_imports)]
pub use crate::logging::{is_enabled as enabled, LogLevel, LOG_LEVEL_ENV};
pub use crate::{critical, debug, error, info, log_internal, profiling};
