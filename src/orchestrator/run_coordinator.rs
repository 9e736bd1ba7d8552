//! 运行协调器 - 编排层
//!
//! 一个实例的主循环，按状态推进：
//!
//! ```text
//! Init → Partition → ProcessItem → (主实例) AwaitSiblings → Done
//! ```
//!
//! - 主实例处理每个案件前先吸收从实例的结果
//! - 从实例处理完自己的分片后发送若干次 WORKER_DONE
//! - 主实例等到每个从实例都发来完成信号，或其分片在账本中全部已结清（或被停止）后结束
//!
//! IPC 文件的清理由进程入口在启动浏览器之前完成，协调器本身不清理，
//! 以免删掉提前结束的从实例已经发出的完成信号。

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppResult, FailureKind, ItemFailure};
use crate::ipc::{IpcChannel, IpcMessage};
use crate::ledger::ProgressLedger;
use crate::models::Case;
use crate::orchestrator::partition;
use crate::orchestrator::reporter::ResultReporter;
use crate::orchestrator::retry::{run_with_retry, ItemOutcome, RetryPolicy, RetryReport};
use crate::utils::logging::log_partition;
use crate::workflow::{CaseCtx, ConfirmationOutcome, CredentialConfirmer, ItemExecutor};

/// 协调器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Partition,
    ProcessItem,
    AwaitSiblings,
    Done,
}

/// 一次运行的统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// 分到本实例的案件数
    pub assigned: usize,
    /// 账本中已完成而跳过的案件数
    pub skipped: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 从 IPC 吸收的从实例结果数（仅主实例）
    pub absorbed: usize,
    /// 运行是否被操作员停止
    pub stopped: bool,
}

/// 运行协调器
pub struct RunCoordinator<E: ?Sized, C: ?Sized> {
    config: Config,
    executor: Arc<E>,
    confirmer: Arc<C>,
    ledger: ProgressLedger,
    ipc: IpcChannel,
    reporter: ResultReporter,
    policy: RetryPolicy,
    state: RunState,
    finished_siblings: BTreeSet<usize>,
}

impl<E, C> RunCoordinator<E, C>
where
    E: ItemExecutor + ?Sized,
    C: CredentialConfirmer + ?Sized,
{
    pub fn new(config: Config, executor: Arc<E>, confirmer: Arc<C>) -> AppResult<Self> {
        let reporter = ResultReporter::from_config(&config)?;
        Ok(Self {
            ledger: ProgressLedger::from_config(&config),
            ipc: IpcChannel::from_config(&config),
            policy: RetryPolicy::from_config(&config),
            reporter,
            config,
            executor,
            confirmer,
            state: RunState::Init,
            finished_siblings: BTreeSet::new(),
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn instance(&self) -> usize {
        self.config.instance
    }

    fn transition(&mut self, next: RunState) {
        debug!("[实例 {}] 状态 {:?} -> {:?}", self.instance(), self.state, next);
        self.state = next;
    }

    /// 处理整个批次
    pub async fn run(&mut self, batch: &[Case], cancel: &CancellationToken) -> AppResult<RunSummary> {
        let mut summary = RunSummary::default();

        // Partition
        self.transition(RunState::Partition);
        let pending = self.pending_share(batch, &mut summary)?;

        // ProcessItem
        self.transition(RunState::ProcessItem);
        let total = pending.len();
        for (index, mut case) in pending.into_iter().enumerate() {
            if cancel.is_cancelled() {
                summary.stopped = true;
                break;
            }
            if self.config.is_primary() {
                self.absorb_sibling_messages(&mut summary).await;
            }

            let ctx = CaseCtx::new(self.instance(), index + 1, total, &case.id);
            info!("{} ▶️ {}", ctx, case.short_name());

            let report = self.process_one(&case, cancel).await;
            if report.outcome == ItemOutcome::Stopped {
                summary.stopped = true;
                self.reporter.report(&mut case, &report).await;
                break;
            }

            summary.processed += 1;
            if report.is_success() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            self.reporter.report(&mut case, &report).await;
        }
        summary.stopped |= cancel.is_cancelled();

        if self.config.is_primary() {
            self.transition(RunState::AwaitSiblings);
            self.await_siblings(batch, &mut summary, cancel).await;
        } else {
            self.announce_done().await;
        }

        self.transition(RunState::Done);
        log_summary(self.instance(), &summary);
        Ok(summary)
    }

    /// 本实例的分片中尚未完成的案件
    fn pending_share(&self, batch: &[Case], summary: &mut RunSummary) -> AppResult<Vec<Case>> {
        let share = partition::assign(batch, self.instance(), self.config.total_instances)?;
        let ledger = self.ledger.load();
        summary.assigned = share.len();

        let pending: Vec<Case> = share
            .into_iter()
            .map(|mut case| {
                case.status = ledger.get(&case.id).map(|entry| entry.status);
                case
            })
            .filter(|case| !case.status.is_some_and(|status| status.is_settled()))
            .collect();
        summary.skipped = summary.assigned - pending.len();

        log_partition(self.instance(), summary.assigned, pending.len(), batch.len());
        Ok(pending)
    }

    /// 人工确认后交给重试控制器
    async fn process_one(&self, case: &Case, cancel: &CancellationToken) -> RetryReport {
        let refused = match self.confirmer.confirm(case).await {
            ConfirmationOutcome::Ok => {
                return run_with_retry(self.executor.as_ref(), case, self.policy, cancel).await;
            }
            ConfirmationOutcome::PendingCode(code) => {
                ItemFailure::new(FailureKind::ExternalPending, code)
            }
            ConfirmationOutcome::Cancelled => {
                ItemFailure::new(FailureKind::ConfirmationCancelled, "")
            }
        };
        RetryReport {
            outcome: ItemOutcome::TerminalFailure(refused),
            attempts: 0,
        }
    }

    /// 取出 IPC 中的全部消息：结果写入账本，完成信号记入集合
    async fn absorb_sibling_messages(&mut self, summary: &mut RunSummary) {
        for message in self.ipc.drain_all().await {
            match message {
                IpcMessage::Result(entry) => {
                    debug!(
                        "[实例 {}] 📥 收到实例 {} 的结果: {} -> {}",
                        self.instance(),
                        entry.instance,
                        entry.id,
                        entry.status
                    );
                    self.ledger.upsert(entry).await;
                    summary.absorbed += 1;
                }
                IpcMessage::WorkerDone { instance } => {
                    if self.finished_siblings.insert(instance) {
                        info!("[实例 {}] 🏁 实例 {} 已完成", self.instance(), instance);
                    }
                }
            }
        }
    }

    /// 每个从实例要么发来过完成信号，要么其分片在账本中已全部结清
    fn siblings_finished(&self, batch: &[Case]) -> bool {
        let total = self.config.total_instances;
        let waiting: Vec<usize> = (1..=total)
            .filter(|&k| k != self.instance() && !self.finished_siblings.contains(&k))
            .collect();
        if waiting.is_empty() {
            return true;
        }

        let ledger = self.ledger.load();
        waiting.into_iter().all(|k| {
            let settled = partition::assign(batch, k, total).is_ok_and(|share| {
                share.iter().all(|case| {
                    ledger
                        .get(&case.id)
                        .is_some_and(|entry| entry.status.is_settled())
                })
            });
            if settled {
                debug!(
                    "[实例 {}] 实例 {} 的分片在账本中已全部结清",
                    self.instance(),
                    k
                );
            }
            settled
        })
    }

    async fn await_siblings(
        &mut self,
        batch: &[Case],
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) {
        if self.config.total_instances > 1 {
            info!(
                "[实例 {}] ⏳ 等待其他 {} 个实例完成...",
                self.instance(),
                self.config.total_instances - 1
            );
        }

        loop {
            self.absorb_sibling_messages(summary).await;
            if self.siblings_finished(batch) {
                break;
            }
            if cancel.is_cancelled() {
                summary.stopped = true;
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(self.config.sibling_poll_interval) => {}
            }
        }
    }

    /// 从实例重复发送完成信号，单条丢失不影响主实例结束
    async fn announce_done(&self) {
        let message = IpcMessage::WorkerDone {
            instance: self.instance(),
        };
        let repeats = self.config.sentinel_repeats.max(1);
        for round in 1..=repeats {
            if !self.ipc.append(&message).await {
                warn!(
                    "[实例 {}] ⚠️ 完成信号 {}/{} 未写入",
                    self.instance(),
                    round,
                    repeats
                );
            }
            if round < repeats {
                sleep(self.config.sentinel_interval).await;
            }
        }
        info!("[实例 {}] 📤 已通知主实例", self.instance());
    }
}

// ========== 日志辅助函数 ==========

fn log_summary(instance: usize, summary: &RunSummary) {
    info!("\n{}", "=".repeat(60));
    info!("📊 实例 {} 处理完成统计", instance);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📋 分配: {} (跳过 {})", summary.assigned, summary.skipped);
    info!("✅ 成功: {}/{}", summary.succeeded, summary.processed);
    info!("❌ 失败: {}", summary.failed);
    if summary.absorbed > 0 {
        info!("📥 来自其他实例: {}", summary.absorbed);
    }
    if summary.stopped {
        warn!("⏹️ 运行被操作员停止");
    }
    info!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::ledger::{LedgerEntry, LedgerStatus};
    use crate::workflow::fake::sample_case;
    use crate::workflow::{AutoConfirmer, ItemSuccess};

    /// 按案件标识返回预设结果，默认成功
    #[derive(Default)]
    struct MapExecutor {
        failures: Mutex<HashMap<String, ItemFailure>>,
        calls: AtomicU32,
    }

    impl MapExecutor {
        fn fail(&self, id: &str, failure: ItemFailure) {
            self.failures.lock().unwrap().insert(id.to_string(), failure);
        }
    }

    #[async_trait]
    impl ItemExecutor for MapExecutor {
        async fn execute(
            &self,
            case: &Case,
            _cancel: &CancellationToken,
        ) -> Result<ItemSuccess, ItemFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failures.lock().unwrap().get(&case.id) {
                Some(failure) => Err(failure.clone()),
                None => Ok(ItemSuccess::default()),
            }
        }
    }

    struct FixedConfirmer(ConfirmationOutcome);

    #[async_trait]
    impl CredentialConfirmer for FixedConfirmer {
        async fn confirm(&self, _case: &Case) -> ConfirmationOutcome {
            self.0.clone()
        }
    }

    fn config_in(dir: &std::path::Path, instance: usize, total: usize) -> Config {
        Config {
            instance,
            total_instances: total,
            work_dir: dir.to_path_buf(),
            stdout_results: false,
            batch_retry_delay: Duration::from_millis(5),
            lock_timeout: Duration::from_millis(500),
            lock_poll_interval: Duration::from_millis(5),
            ledger_write_retries: 2,
            ledger_retry_delay: Duration::from_millis(5),
            sentinel_repeats: 2,
            sentinel_interval: Duration::from_millis(5),
            sibling_poll_interval: Duration::from_millis(10),
            ..Config::default()
        }
    }

    fn batch(ids: &[&str]) -> Vec<Case> {
        ids.iter().map(|id| sample_case(id)).collect()
    }

    #[tokio::test]
    async fn single_instance_processes_everything_and_skips_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 1, 1);
        let executor = Arc::new(MapExecutor::default());
        executor.fail("2", ItemFailure::driver("instável"));
        let cases = batch(&["1", "2", "3"]);

        let mut coordinator =
            RunCoordinator::new(config.clone(), executor.clone(), Arc::new(AutoConfirmer)).unwrap();
        let summary = coordinator.run(&cases, &CancellationToken::new()).await.unwrap();

        assert_eq!(coordinator.state(), RunState::Done);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        // 3 个案件，案件 2 用尽 3 次尝试
        assert_eq!(executor.calls.load(Ordering::SeqCst), 5);

        let ledger = ProgressLedger::from_config(&config).load();
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger["2"].status, LedgerStatus::FailedAfterRetries);

        // 重启后只重做重试用尽的案件
        let rerun = Arc::new(MapExecutor::default());
        let mut coordinator =
            RunCoordinator::new(config.clone(), rerun.clone(), Arc::new(AutoConfirmer)).unwrap();
        let summary = coordinator.run(&cases, &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.processed, 1);
        assert_eq!(rerun.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            ProgressLedger::from_config(&config).load()["2"].status,
            LedgerStatus::NoPdfArtifact
        );
    }

    #[tokio::test]
    async fn secondary_reports_its_share_then_sends_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 2, 2);
        let executor = Arc::new(MapExecutor::default());

        let mut coordinator =
            RunCoordinator::new(config.clone(), executor.clone(), Arc::new(AutoConfirmer)).unwrap();
        let summary = coordinator
            .run(&batch(&["a", "b", "c", "d"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.processed, 2);
        assert!(ProgressLedger::from_config(&config).load().is_empty());

        let messages = IpcChannel::from_config(&config).drain_all().await;
        let ids: Vec<&str> = messages
            .iter()
            .filter_map(|m| match m {
                IpcMessage::Result(entry) => Some(entry.id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["b", "d"]);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3], IpcMessage::WorkerDone { instance: 2 });
    }

    #[tokio::test]
    async fn primary_absorbs_results_until_every_sibling_is_done() {
        let dir = tempfile::tempdir().unwrap();
        let primary_config = config_in(dir.path(), 1, 3);
        let cases = batch(&["1", "2", "3", "4", "5", "6"]);

        let primary = async {
            let mut coordinator = RunCoordinator::new(
                primary_config.clone(),
                Arc::new(MapExecutor::default()),
                Arc::new(AutoConfirmer),
            )
            .unwrap();
            coordinator.run(&cases, &CancellationToken::new()).await.unwrap()
        };
        let secondaries = async {
            sleep(Duration::from_millis(50)).await;
            for instance in [2, 3] {
                let mut coordinator = RunCoordinator::new(
                    config_in(dir.path(), instance, 3),
                    Arc::new(MapExecutor::default()),
                    Arc::new(AutoConfirmer),
                )
                .unwrap();
                coordinator.run(&cases, &CancellationToken::new()).await.unwrap();
            }
        };

        let (summary, ()) = tokio::join!(primary, secondaries);

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.absorbed, 4);
        let ledger = ProgressLedger::from_config(&primary_config).load();
        assert_eq!(ledger.len(), 6);
        assert_eq!(ledger["2"].instance, 2);
        assert_eq!(ledger["6"].instance, 3);
    }

    #[tokio::test]
    async fn confirmation_refusal_is_terminal_without_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 1, 1);
        let executor = Arc::new(MapExecutor::default());
        let confirmer = Arc::new(FixedConfirmer(ConfirmationOutcome::PendingCode(
            "2FA".to_string(),
        )));

        let mut coordinator = RunCoordinator::new(config.clone(), executor.clone(), confirmer).unwrap();
        coordinator
            .run(&batch(&["7"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        let entry: LedgerEntry = ProgressLedger::from_config(&config).load()["7"].clone();
        assert_eq!(entry.status, LedgerStatus::PendingExternal);
        assert_eq!(entry.reason, "PENDENCIA - 2FA");
    }

    #[tokio::test]
    async fn stopped_run_writes_nothing_but_secondary_still_signals() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 2, 2);
        let executor = Arc::new(MapExecutor::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut coordinator =
            RunCoordinator::new(config.clone(), executor.clone(), Arc::new(AutoConfirmer)).unwrap();
        let summary = coordinator.run(&batch(&["a", "b"]), &cancel).await.unwrap();

        assert!(summary.stopped);
        assert_eq!(summary.processed, 0);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        let messages = IpcChannel::from_config(&config).drain_all().await;
        assert!(messages
            .iter()
            .all(|m| matches!(m, IpcMessage::WorkerDone { instance: 2 })));
        assert_eq!(messages.len(), 2);
    }

    /// 执行第一个案件时操作员按下停止
    #[derive(Default)]
    struct StopOnFirstCall {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ItemExecutor for StopOnFirstCall {
        async fn execute(
            &self,
            _case: &Case,
            cancel: &CancellationToken,
        ) -> Result<ItemSuccess, ItemFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            cancel.cancel();
            Ok(ItemSuccess::default())
        }
    }

    #[tokio::test]
    async fn stop_mid_batch_starts_no_further_items() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 1, 1);
        let executor = Arc::new(StopOnFirstCall::default());
        let cancel = CancellationToken::new();

        let mut coordinator =
            RunCoordinator::new(config.clone(), executor.clone(), Arc::new(AutoConfirmer)).unwrap();
        let summary = coordinator.run(&batch(&["1", "2", "3"]), &cancel).await.unwrap();

        assert!(summary.stopped);
        assert_eq!(summary.processed, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state(), RunState::Done);

        let ledger = ProgressLedger::from_config(&config).load();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains_key("1"));
        assert!(!ledger.contains_key("2"));
        assert!(!ledger.contains_key("3"));
    }

    #[tokio::test]
    async fn primary_started_late_still_sees_early_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let primary_config = config_in(dir.path(), 1, 2);
        ProgressLedger::from_config(&primary_config)
            .upsert(LedgerEntry::new("b", "Pescador b", LedgerStatus::Ok, "OK").with_instance(2))
            .await;
        let cases = batch(&["a", "b"]);

        // 从实例的分片已全部完成，直接发出完成信号后退出
        let mut secondary = RunCoordinator::new(
            config_in(dir.path(), 2, 2),
            Arc::new(MapExecutor::default()),
            Arc::new(AutoConfirmer),
        )
        .unwrap();
        let secondary_summary = secondary.run(&cases, &CancellationToken::new()).await.unwrap();
        assert_eq!(secondary_summary.skipped, 1);

        let mut primary = RunCoordinator::new(
            primary_config,
            Arc::new(MapExecutor::default()),
            Arc::new(AutoConfirmer),
        )
        .unwrap();
        let summary = tokio::time::timeout(
            Duration::from_secs(3),
            primary.run(&cases, &CancellationToken::new()),
        )
        .await
        .expect("主实例应在超时前结束")
        .unwrap();

        assert_eq!(primary.state(), RunState::Done);
        assert_eq!(summary.processed, 1);
        assert!(!summary.stopped);
    }

    #[tokio::test]
    async fn sibling_with_settled_share_counts_as_finished() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 1, 3);
        let ledger = ProgressLedger::from_config(&config);
        ledger
            .upsert(LedgerEntry::new("2", "Pescador 2", LedgerStatus::Ok, "OK").with_instance(2))
            .await;
        ledger
            .upsert(
                LedgerEntry::new("3", "Pescador 3", LedgerStatus::FailedTerminal, "SENHA")
                    .with_instance(3),
            )
            .await;

        // 没有任何从实例在运行，也没有完成信号
        let mut primary = RunCoordinator::new(
            config,
            Arc::new(MapExecutor::default()),
            Arc::new(AutoConfirmer),
        )
        .unwrap();
        let summary = tokio::time::timeout(
            Duration::from_secs(3),
            primary.run(&batch(&["1", "2", "3"]), &CancellationToken::new()),
        )
        .await
        .expect("主实例应在超时前结束")
        .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.absorbed, 0);
    }

    #[tokio::test]
    async fn sibling_with_retryable_item_is_still_awaited() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 1, 2);
        ProgressLedger::from_config(&config)
            .upsert(
                LedgerEntry::new("b", "Pescador b", LedgerStatus::FailedAfterRetries, "FALHA")
                    .with_instance(2),
            )
            .await;

        let mut primary = RunCoordinator::new(
            config,
            Arc::new(MapExecutor::default()),
            Arc::new(AutoConfirmer),
        )
        .unwrap();
        let cases = batch(&["a", "b"]);
        let waited = tokio::time::timeout(
            Duration::from_millis(200),
            primary.run(&cases, &CancellationToken::new()),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn invalid_instance_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 3, 2);
        let mut coordinator = RunCoordinator::new(
            config,
            Arc::new(MapExecutor::default()),
            Arc::new(AutoConfirmer),
        )
        .unwrap();

        assert!(coordinator
            .run(&batch(&["1"]), &CancellationToken::new())
            .await
            .is_err());
    }
}
