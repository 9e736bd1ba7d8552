//! 流程层（Workflow Layer）
//!
//! 定义"一个案件"的完整处理流程，只依赖驱动能力接口。
//!
//! ```text
//! CaseFlow (一次尝试)
//!     ↓
//! ConvergenceSweep (第 3 页月份)
//!     ↓
//! WorkflowDriver (浏览器实现位于 browser/)
//! ```

pub mod artifacts;
pub mod case_ctx;
pub mod case_flow;
pub mod confirm;
pub mod driver;
pub mod executor;
pub mod sweep;

#[cfg(test)]
pub(crate) mod fake;

pub use artifacts::{DownloadSnapshot, ReceiptLocator};
pub use case_ctx::CaseCtx;
pub use case_flow::CaseFlow;
pub use confirm::{AutoConfirmer, ConfirmationOutcome, ConsoleConfirmer, CredentialConfirmer};
pub use driver::{CredentialOutcome, Receipt, StepId, StepOutcome, WorkflowDriver};
pub use executor::{ItemExecutor, ItemSuccess};
pub use sweep::{ConvergenceSweep, SweepReport, SweepSettings};
