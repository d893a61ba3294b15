// Category-based logging infrastructure
//
// This will be used from multiple threads (the tracking callbacks
// and the render thread), so it needs to be stateless apart from
// the level, which is decided once per process.
use lazy_static::lazy_static;

/// Environment variable that overrides the default log level.
///
/// Accepts either a level name (`"info"`) or its number (`"3"`).
pub const LOG_LEVEL_ENV: &str = "STRATUS_LOG_LEVEL";

#[allow(dead_code, non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogLevel {
    // in order of highest priority
    critical, // Urgent and must always be displayed
    error,
    debug,     // debugging related, not verbose
    info,      // more verbose
    profiling, // per-frame timing and decisions
}

impl LogLevel {
    pub fn get_name(&self) -> &'static str {
        match self {
            LogLevel::critical => "critical",
            LogLevel::error => "error",
            LogLevel::debug => "debug",
            LogLevel::info => "info",
            LogLevel::profiling => "profiling",
        }
    }

    pub fn get_level(&self) -> u32 {
        match self {
            LogLevel::critical => 0,
            LogLevel::error => 1,
            LogLevel::debug => 2,
            LogLevel::info => 3,
            LogLevel::profiling => 4,
        }
    }

    /// Parse a level from its name or its number
    pub fn from_str(name: &str) -> Option<LogLevel> {
        match name.trim().to_lowercase().as_str() {
            "critical" | "0" => Some(LogLevel::critical),
            "error" | "1" => Some(LogLevel::error),
            "debug" | "2" => Some(LogLevel::debug),
            "info" | "3" => Some(LogLevel::info),
            "profiling" | "4" => Some(LogLevel::profiling),
            _ => None,
        }
    }
}

lazy_static! {
    // Defaults to the debug level (2)
    static ref MAX_LOG_LEVEL: u32 = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|val| LogLevel::from_str(&val))
        .unwrap_or(LogLevel::debug)
        .get_level();
}

/// Returns true if messages at `level` should be printed
pub fn is_enabled(level: LogLevel) -> bool {
    level.get_level() <= *MAX_LOG_LEVEL
}

#[macro_export]
macro_rules! log_internal {
    ($loglevel:expr, $($format_args:tt)+) => ({
        let level = $loglevel;
        if $crate::logging::is_enabled(level) {
            println!("[{:?}]<{}> {}:{} - {}",
                     $crate::timing::get_current_millis(),
                     level.get_name(),
                     file!(),
                     line!(),
                     format!($($format_args)+)
            );
        }
    })
}

#[macro_export]
macro_rules! critical {
    ($($format_args:tt)+) => ({
        $crate::log_internal!($crate::logging::LogLevel::critical, $($format_args)+)
    })
}

#[macro_export]
macro_rules! error {
    ($($format_args:tt)+) => ({
        $crate::log_internal!($crate::logging::LogLevel::error, $($format_args)+)
    })
}

#[macro_export]
macro_rules! debug {
    ($($format_args:tt)+) => ({
        $crate::log_internal!($crate::logging::LogLevel::debug, $($format_args)+)
    })
}

#[macro_export]
macro_rules! info {
    ($($format_args:tt)+) => ({
        $crate::log_internal!($crate::logging::LogLevel::info, $($format_args)+)
    })
}

#[macro_export]
macro_rules! profiling {
    ($($format_args:tt)+) => ({
        $crate::log_internal!($crate::logging::LogLevel::profiling, $($format_args)+)
    })
}
