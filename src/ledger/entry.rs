use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 账本中的规范化状态码（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerStatus {
    /// 申报已提交并取得回执
    #[serde(rename = "OK")]
    Ok,
    /// 外部系统要求的行政待处理（验证码、授权等级等）
    #[serde(rename = "PENDENCIA")]
    PendingExternal,
    /// 已提交但未找到回执 PDF
    #[serde(rename = "SO FALTA PDF")]
    NoPdfArtifact,
    /// 终止性失败（凭据无效、弹窗取消）
    #[serde(rename = "FALHA TERMINAL")]
    FailedTerminal,
    /// 重试次数用尽
    #[serde(rename = "FALHA APOS TENTATIVAS")]
    FailedAfterRetries,
}

impl LedgerStatus {
    /// 重启时是否跳过该案件
    ///
    /// 只有重试用尽的案件会在下一次运行中再次尝试。
    pub fn is_settled(self) -> bool {
        !matches!(self, LedgerStatus::FailedAfterRetries)
    }

    pub fn code(self) -> &'static str {
        match self {
            LedgerStatus::Ok => "OK",
            LedgerStatus::PendingExternal => "PENDENCIA",
            LedgerStatus::NoPdfArtifact => "SO FALTA PDF",
            LedgerStatus::FailedTerminal => "FALHA TERMINAL",
            LedgerStatus::FailedAfterRetries => "FALHA APOS TENTATIVAS",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, LedgerStatus::Ok | LedgerStatus::NoPdfArtifact)
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 账本条目，以规范化的案件标识为键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub name: String,
    pub status: LedgerStatus,
    pub reason: String,
    #[serde(default)]
    pub artifact: Option<PathBuf>,
    /// 处理该案件的实例编号
    #[serde(default)]
    pub instance: usize,
    pub updated_at: DateTime<Local>,
}

impl LedgerEntry {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        status: LedgerStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            reason: reason.into(),
            artifact: None,
            instance: 1,
            updated_at: Local::now(),
        }
    }

    pub fn with_artifact(mut self, artifact: Option<PathBuf>) -> Self {
        self.artifact = artifact;
        self
    }

    pub fn with_instance(mut self, instance: usize) -> Self {
        self.instance = instance;
        self
    }
}
