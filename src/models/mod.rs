pub mod case;
pub mod loaders;

pub use case::{normalize_id, Case, Credentials, Month, Period, PeriodKind, PeriodRow};
pub use loaders::{load_task_file, parse_inline_task};
