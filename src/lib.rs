//! # REAP Dispatch
//!
//! 多实例并行的渔业年度申报（REAP）自动提交程序
//!
//! ## 架构设计
//!
//! 本系统采用分层架构，下层不依赖上层：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `JsExecutor` - 唯一的 page owner，提供 eval() 能力
//! - `FileLock` - 跨进程的建议性文件锁
//!
//! ### ② 数据与持久化（Models / Ledger / IPC）
//! - `models/` - 案件、月份段、任务加载
//! - `ledger/` - 进度账本，只有主实例写入
//! - `ipc/` - 从实例向主实例上报结果的加锁缓冲文件
//! - `clients/` - 外部回调
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个案件"的一次完整尝试
//! - `CaseFlow` - 登录 → 四个页面 → 回执
//! - `ConvergenceSweep` - 月份收敛扫描
//! - `browser/` - 基于 chromiumoxide 的驱动实现
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/partition` - 批次分片
//! - `orchestrator/retry` - 重试控制器
//! - `orchestrator/reporter` - 结果上报器
//! - `orchestrator/run_coordinator` - 单实例主循环
//!
//! ## 模块结构

pub mod browser;
pub mod cli;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod ipc;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::{connect_to_browser_and_page, ReapBrowserDriver};
pub use config::{Config, RunMode};
pub use error::{AppError, AppResult, FailureKind, ItemFailure};
pub use infrastructure::JsExecutor;
pub use ledger::{LedgerEntry, LedgerStatus, ProgressLedger};
pub use models::Case;
pub use orchestrator::{RunCoordinator, RunSummary};
pub use workflow::{CaseFlow, ConvergenceSweep, ItemExecutor, WorkflowDriver};
