pub mod crash_log;
pub mod logging;

pub use crash_log::CrashLog;
pub use logging::truncate_text;
