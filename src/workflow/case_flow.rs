//! 案件处理流程 - 流程层
//!
//! 核心职责：定义"一个案件"的一次完整尝试
//!
//! 流程顺序：
//! 1. 登录（已提交则直接取回执）
//! 2. 第 1 页 → 第 2 页（执行后必须被确认）
//! 3. 第 3 页：月份收敛扫描，然后前进
//! 4. 第 4 页：提交声明
//! 5. 取回执

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{FailureKind, ItemFailure};
use crate::models::Case;
use crate::workflow::driver::{CredentialOutcome, StepId, StepOutcome, WorkflowDriver};
use crate::workflow::executor::{ItemExecutor, ItemSuccess};
use crate::workflow::sweep::{ConvergenceSweep, SweepSettings};

/// 案件处理流程
///
/// - 编排一次尝试的页面顺序
/// - 决定何时确认、何时放弃
/// - 不持有页面资源，只依赖驱动能力
pub struct CaseFlow<D: ?Sized> {
    driver: Arc<D>,
    sweep: ConvergenceSweep,
    step_max_attempts: u32,
    instance: usize,
}

impl<D: WorkflowDriver + ?Sized> CaseFlow<D> {
    pub fn new(driver: Arc<D>, config: &Config) -> Self {
        Self {
            driver,
            sweep: ConvergenceSweep::new(SweepSettings::from_config(config)),
            step_max_attempts: config.step_max_attempts.max(1),
            instance: config.instance,
        }
    }

    /// 执行单页步骤，直到驱动确认或达到上限
    async fn confirm_step(
        &self,
        step: StepId,
        case: &Case,
        cancel: &CancellationToken,
    ) -> Result<(), ItemFailure> {
        for attempt in 1..=self.step_max_attempts {
            ensure_running(cancel)?;

            if self.driver.perform_step(step, case).await? == StepOutcome::NotApplicable {
                info!("[实例 {}] {} 不在当前页面，跳过", self.instance, step);
                return Ok(());
            }

            if self.driver.is_step_confirmed(step).await.unwrap_or(false) {
                info!("[实例 {}] ✓ {} 已确认", self.instance, step);
                return Ok(());
            }
            warn!(
                "[实例 {}] ⚠️ {} 未确认，重做 ({}/{})",
                self.instance, step, attempt, self.step_max_attempts
            );
        }

        Err(ItemFailure::new(
            FailureKind::StepNotConfirmed,
            format!(
                "{} NAO CONFIRMADA APOS {} TENTATIVAS",
                step.code(),
                self.step_max_attempts
            ),
        ))
    }

    async fn fill_declaration(
        &self,
        case: &Case,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ItemFailure> {
        self.confirm_step(StepId::Location, case, cancel).await?;
        self.confirm_step(StepId::Commercialization, case, cancel).await?;

        ensure_running(cancel)?;
        let report = self.sweep.run(self.driver.as_ref(), case, cancel).await?;
        if !report.may_proceed() {
            let note = report.note().unwrap_or_default();
            return Err(ItemFailure::new(FailureKind::StepNotConfirmed, note));
        }
        let note = report.note();

        self.confirm_step(StepId::Monthly, case, cancel).await?;

        ensure_running(cancel)?;
        self.driver.perform_step(StepId::Declaration, case).await?;
        if !self
            .driver
            .is_step_confirmed(StepId::Declaration)
            .await
            .unwrap_or(false)
        {
            return Err(ItemFailure::new(
                FailureKind::SubmissionFailed,
                "ENVIO NAO CONFIRMADO",
            ));
        }
        info!("[实例 {}] 📨 声明已提交", self.instance);
        Ok(note)
    }
}

#[async_trait]
impl<D: WorkflowDriver + ?Sized> ItemExecutor for CaseFlow<D> {
    async fn execute(
        &self,
        case: &Case,
        cancel: &CancellationToken,
    ) -> Result<ItemSuccess, ItemFailure> {
        ensure_running(cancel)?;
        info!("[实例 {}] >> 处理: {}", self.instance, case.short_name());

        let mut success = ItemSuccess::default();
        match self.driver.login(case).await? {
            CredentialOutcome::Ready => {
                success.note = self.fill_declaration(case, cancel).await?;
            }
            CredentialOutcome::AlreadySubmitted => {
                info!("[实例 {}] ⏭️ 申报已提交过，直接获取回执", self.instance);
                success.already_submitted = true;
            }
            CredentialOutcome::Rejected(detail) => {
                return Err(ItemFailure::new(FailureKind::InvalidCredentials, detail));
            }
            CredentialOutcome::Pending(code) => {
                return Err(ItemFailure::new(FailureKind::ExternalPending, code));
            }
        }

        ensure_running(cancel)?;
        // 提交已成功，回执失败不再影响结果
        match self.driver.fetch_receipt(case).await {
            Ok(Some(receipt)) => {
                info!("[实例 {}] 📄 回执: {}", self.instance, receipt.path.display());
                success.artifact = Some(receipt.path);
                success.reference_year = receipt.reference_year;
            }
            Ok(None) => warn!("[实例 {}] ⚠️ 未找到回执 PDF", self.instance),
            Err(e) => warn!("[实例 {}] ⚠️ 获取回执失败: {}", self.instance, e),
        }

        Ok(success)
    }
}

fn ensure_running(cancel: &CancellationToken) -> Result<(), ItemFailure> {
    if cancel.is_cancelled() {
        Err(ItemFailure::stopped())
    } else {
        Ok(())
    }
}
