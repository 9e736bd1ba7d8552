//! 结果上报器 - 编排层
//!
//! 每个案件结束后调用一次：
//! 1. 主实例直接写账本，从实例经 IPC 交给主实例
//! 2. 尝试一次外部回调（失败只记日志）
//! 3. 可选地向 stdout 输出机器可读的结果记录

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::clients::CallbackClient;
use crate::config::Config;
use crate::error::AppResult;
use crate::ipc::{IpcChannel, IpcMessage};
use crate::ledger::{LedgerEntry, ProgressLedger};
use crate::models::Case;
use crate::orchestrator::retry::{ItemOutcome, RetryReport};

const IPC_APPEND_ATTEMPTS: u32 = 3;
const IPC_RETRY_DELAY: Duration = Duration::from_millis(500);

/// stdout 上的结果记录（`RESULT_START{...}RESULT_END`）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    /// 上游系统的原始记录 ID，没有时使用案件标识
    pub id: Value,
    pub cpf: String,
    pub nome: String,
    pub success: bool,
    pub status: String,
    pub message: String,
    pub pdf: Option<String>,
    pub ano_base: Option<String>,
    pub instance: usize,
    pub attempts: u32,
    pub timestamp: String,
}

impl ResultRecord {
    fn new(case: &Case, entry: &LedgerEntry, report: &RetryReport) -> Self {
        let ano_base = match &report.outcome {
            ItemOutcome::Success(success) => success.reference_year.clone(),
            _ => None,
        };
        Self {
            id: case
                .external_ref
                .clone()
                .unwrap_or_else(|| Value::String(case.id.clone())),
            cpf: case.id.clone(),
            nome: case.name.clone(),
            success: entry.status.is_success(),
            status: entry.status.code().to_string(),
            message: entry.reason.clone(),
            pdf: entry.artifact.as_ref().map(|p| p.display().to_string()),
            ano_base,
            instance: entry.instance,
            attempts: report.attempts,
            timestamp: entry.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// 回调请求体中的 raw_data_json
    fn raw_data(&self) -> Value {
        json!({
            "id": self.id,
            "nome": self.nome,
            "pdf_path": self.pdf,
            "instancia": self.instance,
            "tentativas": self.attempts,
            "ano_base": self.ano_base,
            "timestamp": self.timestamp,
        })
    }

    pub fn to_line(&self) -> String {
        let body = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("RESULT_START{}RESULT_END", body)
    }
}

/// 结果上报器
pub struct ResultReporter {
    instance: usize,
    is_primary: bool,
    ledger: ProgressLedger,
    ipc: IpcChannel,
    callback: Option<CallbackClient>,
    stdout_results: bool,
}

impl ResultReporter {
    pub fn new(
        config: &Config,
        ledger: ProgressLedger,
        ipc: IpcChannel,
        callback: Option<CallbackClient>,
    ) -> Self {
        Self {
            instance: config.instance,
            is_primary: config.is_primary(),
            ledger,
            ipc,
            callback,
            stdout_results: config.stdout_results,
        }
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Ok(Self::new(
            config,
            ProgressLedger::from_config(config),
            IpcChannel::from_config(config),
            CallbackClient::from_config(config)?,
        ))
    }

    /// 上报一个案件的最终结果
    ///
    /// 停止的案件不上报，返回 None。上报后更新案件的最近状态。
    pub async fn report(&self, case: &mut Case, report: &RetryReport) -> Option<LedgerEntry> {
        let Some(status) = report.ledger_status() else {
            info!(
                "[实例 {}] ⏹️ {} 已停止，不写入账本",
                self.instance,
                case.short_name()
            );
            return None;
        };

        let artifact = match &report.outcome {
            ItemOutcome::Success(success) => success.artifact.clone(),
            _ => None,
        };
        let entry = LedgerEntry::new(&case.id, &case.name, status, report.reason())
            .with_artifact(artifact)
            .with_instance(self.instance);

        if self.is_primary {
            self.ledger.upsert(entry.clone()).await;
        } else {
            self.send_to_primary(&entry).await;
        }

        let record = ResultRecord::new(case, &entry, report);
        if let Some(callback) = &self.callback {
            callback
                .notify(&case.id, status.code(), &record.raw_data())
                .await;
        }
        if self.stdout_results {
            println!("{}", record.to_line());
        }

        case.status = Some(status);
        log_reported(self.instance, case, &entry);
        Some(entry)
    }

    async fn send_to_primary(&self, entry: &LedgerEntry) {
        let message = IpcMessage::Result(entry.clone());
        for attempt in 1..=IPC_APPEND_ATTEMPTS {
            if self.ipc.append(&message).await {
                return;
            }
            if attempt < IPC_APPEND_ATTEMPTS {
                sleep(IPC_RETRY_DELAY).await;
            }
        }
        error!(
            "[实例 {}] ❌ 无法通过 IPC 上报 {} ({})，结果已丢弃",
            self.instance, entry.id, entry.status
        );
    }
}

fn log_reported(instance: usize, case: &Case, entry: &LedgerEntry) {
    if entry.status.is_success() {
        info!(
            "[实例 {}] ✅ {} -> {} ({})",
            instance,
            case.short_name(),
            entry.status,
            entry.reason
        );
    } else {
        warn!(
            "[实例 {}] ❌ {} -> {} ({})",
            instance,
            case.short_name(),
            entry.status,
            entry.reason
        );
    }
}
