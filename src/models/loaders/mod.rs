pub mod task_loader;

pub use task_loader::{load_task_file, parse_inline_task, ClientRecord, TaskPayload};
