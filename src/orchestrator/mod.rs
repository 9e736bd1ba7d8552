//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责多实例之间的分工与单实例内的调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `partition` - 批次分片
//! - 按实例编号步长切分批次，各实例的分片互不相交
//!
//! ### `retry` - 重试控制器
//! - 对单个案件调用执行器，终止性失败不重试
//! - 重试用尽时在原因前加上次数
//!
//! ### `reporter` - 结果上报器
//! - 主实例写账本，从实例经 IPC 上报
//! - 外部回调与 stdout 结果记录
//!
//! ### `run_coordinator` - 运行协调器
//! - 主循环状态机：分片 → 逐个处理 → 等待其他实例
//!
//! ## 层次关系
//!
//! ```text
//! run_coordinator (处理 Vec<Case>)
//!     ↓
//! retry (处理单个 Case 的多次尝试)
//!     ↓
//! workflow::CaseFlow (一次尝试)
//!     ↓
//! browser::ReapBrowserDriver (页面能力)
//! ```

pub mod partition;
pub mod reporter;
pub mod retry;
pub mod run_coordinator;

pub use partition::assign;
pub use reporter::{ResultRecord, ResultReporter};
pub use retry::{run_with_retry, ItemOutcome, RetryPolicy, RetryReport};
pub use run_coordinator::{RunCoordinator, RunState, RunSummary};
