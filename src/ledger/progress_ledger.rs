//! 进度账本 - 持久化层
//!
//! 以案件标识为键的 JSON 文档，写入时通过同目录临时文件原子替换，
//! 其他进程随时读取都只会看到完整的旧版本或新版本。
//! 系统中只有主实例写入账本。

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::ledger::entry::LedgerEntry;

pub type LedgerMap = BTreeMap<String, LedgerEntry>;

/// 进度账本
#[derive(Debug, Clone)]
pub struct ProgressLedger {
    path: PathBuf,
    write_retries: u32,
    retry_delay: Duration,
}

impl ProgressLedger {
    pub fn new(path: impl Into<PathBuf>, write_retries: u32, retry_delay: Duration) -> Self {
        Self {
            path: path.into(),
            write_retries: write_retries.max(1),
            retry_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ledger_path(),
            config.ledger_write_retries,
            config.ledger_retry_delay,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部条目
    ///
    /// 文件不存在或不可读时返回空表；内容损坏时先隔离再返回空表。
    pub fn load(&self) -> LedgerMap {
        match self.read_map() {
            Ok(map) => map,
            Err(e) => {
                warn!("⚠️ 无法读取进度账本 {}: {}", self.path.display(), e);
                LedgerMap::new()
            }
        }
    }

    /// 按标识合并写入一条记录
    ///
    /// 读取-修改-替换整体重试，重试用尽后丢弃本次写入并记录错误。
    /// 返回是否成功落盘。
    pub async fn upsert(&self, entry: LedgerEntry) -> bool {
        for attempt in 1..=self.write_retries {
            match self.try_upsert(&entry) {
                Ok(()) => {
                    debug!("账本已更新: {} -> {}", entry.id, entry.status);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "⚠️ 账本被占用或不可写 ({}/{}): {}",
                        attempt, self.write_retries, e
                    );
                    if attempt < self.write_retries {
                        sleep(self.retry_delay).await;
                    }
                }
            }
        }

        error!(
            "❌ 放弃写入账本 {}: {} ({} / {})",
            self.path.display(),
            entry.id,
            entry.status,
            entry.reason
        );
        false
    }

    fn try_upsert(&self, entry: &LedgerEntry) -> AppResult<()> {
        let mut map = self.read_map()?;
        map.insert(entry.id.clone(), entry.clone());
        let data = serde_json::to_vec_pretty(&map)?;
        atomic_write(&self.path, &data)
    }

    fn read_map(&self) -> AppResult<LedgerMap> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LedgerMap::new()),
            Err(e) => return Err(AppError::file(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(LedgerMap::new());
        }

        match serde_json::from_str::<LedgerMap>(&content) {
            Ok(map) => Ok(map),
            Err(e) => {
                error!("❌ 进度账本已损坏: {}", e);
                self.quarantine();
                Ok(LedgerMap::new())
            }
        }
    }

    /// 把损坏的文件改名移到一旁
    fn quarantine(&self) {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let file_name = self
            .path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let target = self
            .path
            .with_file_name(format!("{}.corrupt-{}", file_name, stamp));

        match std::fs::rename(&self.path, &target) {
            Ok(()) => info!("已隔离损坏的账本: {}", target.display()),
            Err(e) => warn!("⚠️ 隔离损坏账本失败: {}", e),
        }
    }

    /// 导出人工查看用的 CSV 表格
    ///
    /// 列：ID, NOME, STATUS, MOTIVO, ARQUIVO_PDF, DATA。返回导出的行数。
    pub fn export_csv(&self, target: &Path) -> AppResult<usize> {
        let map = self.read_map()?;
        let mut out = String::from("ID,NOME,STATUS,MOTIVO,ARQUIVO_PDF,DATA\n");
        for entry in map.values() {
            let artifact = entry
                .artifact
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let fields = [
                entry.id.clone(),
                entry.name.clone(),
                entry.status.code().to_string(),
                entry.reason.clone(),
                artifact,
                entry.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ];
            let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        atomic_write(target, out.as_bytes())?;
        Ok(map.len())
    }
}

/// 写入同目录临时文件后原子替换目标
pub fn atomic_write(path: &Path, data: &[u8]) -> AppResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| AppError::file(dir, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| AppError::file(dir, e))?;
    tmp.write_all(data).map_err(|e| AppError::file(path, e))?;
    tmp.as_file().sync_all().map_err(|e| AppError::file(path, e))?;
    tmp.persist(path).map_err(|e| AppError::file(path, e.error))?;
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::LedgerStatus;

    fn ledger_in(dir: &Path) -> ProgressLedger {
        ProgressLedger::new(dir.join("progresso.json"), 3, Duration::from_millis(10))
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ledger_in(dir.path()).load().is_empty());
    }

    #[tokio::test]
    async fn upsert_same_id_keeps_single_latest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(dir.path());

        let first = LedgerEntry::new("111", "Ana", LedgerStatus::FailedAfterRetries, "timeout");
        let second = LedgerEntry::new("111", "Ana", LedgerStatus::Ok, "OK")
            .with_artifact(Some(PathBuf::from("/tmp/ana.pdf")));
        assert!(ledger.upsert(first).await);
        assert!(ledger.upsert(second.clone()).await);
        assert!(ledger
            .upsert(LedgerEntry::new("222", "Bia", LedgerStatus::PendingExternal, "2FA"))
            .await);

        let map = ledger.load();
        assert_eq!(map.len(), 2);
        assert_eq!(map["111"], second);
    }

    #[tokio::test]
    async fn corrupt_file_is_quarantined_and_write_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(dir.path());
        std::fs::write(ledger.path(), "{ isto não é json").unwrap();

        assert!(ledger
            .upsert(LedgerEntry::new("333", "Caio", LedgerStatus::Ok, "OK"))
            .await);

        assert_eq!(ledger.load().len(), 1);
        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(quarantined, 1);
    }

    #[tokio::test]
    async fn persistent_write_failure_is_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("arquivo");
        std::fs::write(&blocker, "x").unwrap();
        // 父路径是普通文件，无法创建目录也无法写入
        let ledger = ProgressLedger::new(blocker.join("progresso.json"), 2, Duration::from_millis(5));

        let written = ledger
            .upsert(LedgerEntry::new("444", "Davi", LedgerStatus::Ok, "OK"))
            .await;
        assert!(!written);
        assert!(ledger.load().is_empty());
    }

    #[tokio::test]
    async fn export_csv_quotes_fields() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(dir.path());
        ledger
            .upsert(LedgerEntry::new(
                "555",
                "Silva, Eva",
                LedgerStatus::FailedTerminal,
                "LOGIN INVALIDO",
            ))
            .await;

        let csv_path = dir.path().join("base.csv");
        assert_eq!(ledger.export_csv(&csv_path).unwrap(), 1);
        let text = std::fs::read_to_string(csv_path).unwrap();
        assert!(text.starts_with("ID,NOME,STATUS"));
        assert!(text.contains("555,\"Silva, Eva\",FALHA TERMINAL,LOGIN INVALIDO,,"));
    }
}
