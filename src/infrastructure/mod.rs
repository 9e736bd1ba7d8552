pub mod file_lock;
pub mod js_executor;

pub use file_lock::{FileLock, LockGuard};
pub use js_executor::JsExecutor;
