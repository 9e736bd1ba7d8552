use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ItemFailure;
use crate::ledger::LedgerStatus;
use crate::models::Case;

/// 一次成功尝试的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemSuccess {
    /// 回执 PDF 的绝对路径
    pub artifact: Option<PathBuf>,
    pub reference_year: Option<String>,
    /// 申报在本次运行之前就已提交
    pub already_submitted: bool,
    /// 未完全确认时的补充说明
    pub note: Option<String>,
}

impl ItemSuccess {
    pub fn status(&self) -> LedgerStatus {
        if self.artifact.is_some() {
            LedgerStatus::Ok
        } else {
            LedgerStatus::NoPdfArtifact
        }
    }

    pub fn reason(&self) -> String {
        let base = match self.status() {
            LedgerStatus::Ok => "OK",
            _ => "SO FALTA PDF",
        };
        match &self.note {
            Some(note) => format!("{} ({})", base, note),
            None => base.to_string(),
        }
    }
}

/// 单个案件的一次完整尝试
///
/// 重试控制器只依赖这个 trait。
#[async_trait]
pub trait ItemExecutor: Send + Sync {
    async fn execute(&self, case: &Case, cancel: &CancellationToken)
        -> Result<ItemSuccess, ItemFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_is_still_success() {
        let success = ItemSuccess::default();
        assert_eq!(success.status(), LedgerStatus::NoPdfArtifact);
        assert!(success.status().is_success());
        assert_eq!(success.reason(), "SO FALTA PDF");

        let with_note = ItemSuccess {
            artifact: Some(PathBuf::from("/tmp/a.pdf")),
            note: Some("MESES NAO CONFIRMADOS: Abril".to_string()),
            ..ItemSuccess::default()
        };
        assert_eq!(with_note.reason(), "OK (MESES NAO CONFIRMADOS: Abril)");
    }
}
