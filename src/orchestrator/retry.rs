//! 重试控制器 - 编排层
//!
//! 对单个案件调用 [`ItemExecutor`]，按失败分类决定是否重试：
//! - 成功或终止性失败立即返回
//! - 可重试失败等待固定间隔后重做，直到达到上限
//! - 停止标志在每轮开始和等待期间都会被检查

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{FailureKind, ItemFailure};
use crate::ledger::LedgerStatus;
use crate::models::Case;
use crate::workflow::{ItemExecutor, ItemSuccess};

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let (max_attempts, delay) = config.retry_limits();
        Self::new(max_attempts, delay)
    }
}

/// 案件的最终结果分类
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Success(ItemSuccess),
    TerminalFailure(ItemFailure),
    RetryExhausted(ItemFailure),
    /// 操作员停止，不写账本
    Stopped,
}

/// 重试控制器的返回值
#[derive(Debug, Clone, PartialEq)]
pub struct RetryReport {
    pub outcome: ItemOutcome,
    /// 实际调用执行器的次数
    pub attempts: u32,
}

impl RetryReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Success(_))
    }

    /// 账本状态；停止的案件没有状态
    pub fn ledger_status(&self) -> Option<LedgerStatus> {
        match &self.outcome {
            ItemOutcome::Success(success) => Some(success.status()),
            ItemOutcome::TerminalFailure(failure) if failure.kind == FailureKind::ExternalPending => {
                Some(LedgerStatus::PendingExternal)
            }
            ItemOutcome::TerminalFailure(_) => Some(LedgerStatus::FailedTerminal),
            ItemOutcome::RetryExhausted(_) => Some(LedgerStatus::FailedAfterRetries),
            ItemOutcome::Stopped => None,
        }
    }

    /// 写入账本和回调的原因文本
    ///
    /// 重试用尽时带上次数前缀，与一次性的终止失败区分开。
    pub fn reason(&self) -> String {
        match &self.outcome {
            ItemOutcome::Success(success) => success.reason(),
            ItemOutcome::TerminalFailure(failure) => failure.reason(),
            ItemOutcome::RetryExhausted(failure) => {
                format!("FALHA APOS {} TENTATIVAS - {}", self.attempts, failure.reason())
            }
            ItemOutcome::Stopped => ItemFailure::stopped().reason(),
        }
    }
}

/// 带重试地处理一个案件
pub async fn run_with_retry<E: ItemExecutor + ?Sized>(
    executor: &E,
    case: &Case,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> RetryReport {
    let mut attempts = 0;
    let mut last_failure = None;

    while attempts < policy.max_attempts {
        if cancel.is_cancelled() {
            return RetryReport {
                outcome: ItemOutcome::Stopped,
                attempts,
            };
        }

        attempts += 1;
        info!(
            "🔄 {} 第 {}/{} 次尝试",
            case.short_name(),
            attempts,
            policy.max_attempts
        );

        match executor.execute(case, cancel).await {
            Ok(success) => {
                return RetryReport {
                    outcome: ItemOutcome::Success(success),
                    attempts,
                };
            }
            Err(failure) if failure.kind == FailureKind::Stopped => {
                return RetryReport {
                    outcome: ItemOutcome::Stopped,
                    attempts,
                };
            }
            Err(failure) if failure.is_terminal() => {
                warn!("⛔ {} 终止性失败: {}", case.short_name(), failure.reason());
                return RetryReport {
                    outcome: ItemOutcome::TerminalFailure(failure),
                    attempts,
                };
            }
            Err(failure) => {
                warn!(
                    "⚠️ {} 第 {} 次尝试失败: {}",
                    case.short_name(),
                    attempts,
                    failure.reason()
                );
                last_failure = Some(failure);
            }
        }

        if attempts < policy.max_attempts {
            log_retry_wait(policy.delay);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return RetryReport {
                        outcome: ItemOutcome::Stopped,
                        attempts,
                    };
                }
                _ = sleep(policy.delay) => {}
            }
        }
    }

    let failure = last_failure.unwrap_or_else(|| ItemFailure::driver("nenhuma tentativa executada"));
    RetryReport {
        outcome: ItemOutcome::RetryExhausted(failure),
        attempts,
    }
}

fn log_retry_wait(delay: Duration) {
    info!("  ↻ 等待 {:.1}s 后重试", delay.as_secs_f64());
}
