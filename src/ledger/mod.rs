pub mod entry;
pub mod progress_ledger;

pub use entry::{LedgerEntry, LedgerStatus};
pub use progress_ledger::{atomic_write, LedgerMap, ProgressLedger};
