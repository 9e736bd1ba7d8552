//! 月份收敛扫描
//!
//! 反复询问驱动哪些月份尚未确认，只对未确认的月份重新填写，
//! 直到全部确认、单月达到重做上限或总超时。

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ItemFailure;
use crate::models::{Case, Month};
use crate::workflow::driver::{StepId, WorkflowDriver};

/// 扫描参数
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub max_attempts_per_period: u32,
    pub timeout: Duration,
    pub interval: Duration,
    /// 达到上限仍未确认的月份是否视为完成
    pub force_accept: bool,
}

impl SweepSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts_per_period: config.sweep_max_attempts_per_period,
            timeout: config.sweep_timeout,
            interval: config.sweep_interval,
            force_accept: config.sweep_force_accept,
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 一次扫描的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 被驱动确认的月份
    pub confirmed: BTreeSet<Month>,
    /// 达到上限后放弃确认的月份
    pub exhausted: BTreeSet<Month>,
    /// 超时时仍未确认的月份
    pub unconfirmed: BTreeSet<Month>,
    /// 每个月份的填写次数
    pub fills: BTreeMap<Month, u32>,
    pub passes: u32,
    pub timed_out: bool,
    /// exhausted 中的月份是否按完成处理
    pub force_accepted: bool,
}

impl SweepReport {
    /// 所有应确认的月份都已被驱动确认
    pub fn fully_confirmed(&self) -> bool {
        self.exhausted.is_empty() && self.unconfirmed.is_empty()
    }

    /// 是否可以继续提交
    pub fn may_proceed(&self) -> bool {
        self.exhausted.is_empty() || self.force_accepted
    }

    /// 未完全确认时的说明文字
    pub fn note(&self) -> Option<String> {
        if self.fully_confirmed() {
            return None;
        }
        let months: Vec<&str> = self
            .exhausted
            .iter()
            .chain(self.unconfirmed.iter())
            .map(|m| m.label())
            .collect();
        Some(format!("MESES NAO CONFIRMADOS: {}", months.join(", ")))
    }
}

/// 收敛扫描控制器
#[derive(Debug, Clone, Default)]
pub struct ConvergenceSweep {
    settings: SweepSettings,
}

impl ConvergenceSweep {
    pub fn new(settings: SweepSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// 对案件的全部应确认月份执行扫描
    ///
    /// 只有取消会返回错误；填写或校验失败都记为"未确认"并继续。
    pub async fn run<D>(
        &self,
        driver: &D,
        case: &Case,
        cancel: &CancellationToken,
    ) -> Result<SweepReport, ItemFailure>
    where
        D: WorkflowDriver + ?Sized,
    {
        let expected: Vec<Month> = case.expected_periods().map(|p| p.month).collect();
        let mut report = SweepReport {
            force_accepted: self.settings.force_accept,
            ..SweepReport::default()
        };
        if expected.is_empty() {
            return Ok(report);
        }

        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(ItemFailure::stopped());
            }
            if started.elapsed() >= self.settings.timeout {
                report.timed_out = true;
                report.unconfirmed = expected
                    .iter()
                    .copied()
                    .filter(|m| !report.confirmed.contains(m) && !report.exhausted.contains(m))
                    .collect();
                warn!(
                    "⏱️ 月份扫描超时 ({:?})，未确认: {:?}",
                    self.settings.timeout, report.unconfirmed
                );
                break;
            }

            report.passes += 1;
            let pending = self.collect_pending(driver, &expected, &mut report).await;

            if pending.is_empty() {
                if report.passes == 1 {
                    info!("✓ 第3页所有月份已确认，跳过填写");
                } else {
                    info!("✓ 月份扫描完成（第 {} 轮）", report.passes);
                }
                break;
            }

            info!("🔁 第 {} 轮：待确认月份 {:?}", report.passes, pending);
            for month in pending {
                if cancel.is_cancelled() {
                    return Err(ItemFailure::stopped());
                }
                *report.fills.entry(month).or_insert(0) += 1;
                if let Err(e) = driver.perform_step(StepId::Month(month), case).await {
                    warn!("⚠️ 填写 {} 失败: {}", month, e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ItemFailure::stopped()),
                _ = sleep(self.settings.interval) => {}
            }
        }

        Ok(report)
    }

    /// 询问驱动，返回本轮需要重新填写的月份
    async fn collect_pending<D>(
        &self,
        driver: &D,
        expected: &[Month],
        report: &mut SweepReport,
    ) -> Vec<Month>
    where
        D: WorkflowDriver + ?Sized,
    {
        let mut pending = Vec::new();
        for &month in expected {
            if report.confirmed.contains(&month) || report.exhausted.contains(&month) {
                continue;
            }

            let confirmed = match driver.is_step_confirmed(StepId::Month(month)).await {
                Ok(confirmed) => confirmed,
                Err(e) => {
                    debug!("校验 {} 出错，按未确认处理: {}", month, e);
                    false
                }
            };
            if confirmed {
                report.confirmed.insert(month);
                continue;
            }

            let attempts = report.fills.get(&month).copied().unwrap_or(0);
            if attempts >= self.settings.max_attempts_per_period {
                warn!(
                    "⚠️ 月份 {} 重做 {} 次仍未确认，放弃校验",
                    month, attempts
                );
                report.exhausted.insert(month);
                continue;
            }
            pending.push(month);
        }
        pending
    }
}
