//! 崩溃记录
//!
//! 运行准备阶段出现的致命错误追加写入 `<crash_dir>/crash_log.txt`。

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::error::{AppError, AppResult};

pub const CRASH_LOG_FILE: &str = "crash_log.txt";

/// 崩溃记录写入器
pub struct CrashLog {
    path: PathBuf,
}

impl CrashLog {
    pub fn new(crash_dir: impl AsRef<Path>) -> Self {
        Self {
            path: crash_dir.as_ref().join(CRASH_LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条带时间戳的崩溃记录
    pub fn write(&self, instance: usize, message: &str) -> AppResult<()> {
        debug!("写入崩溃记录: {}", self.path.display());

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| AppError::file(dir, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AppError::file(&self.path, e))?;

        let record = format!(
            "[{}] 实例 {}\n{}\n{}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            instance,
            message,
            "-".repeat(50)
        );
        file.write_all(record.as_bytes())
            .map_err(|e| AppError::file(&self.path, e))?;
        Ok(())
    }

    /// 写入失败时只记日志
    pub fn record(&self, instance: usize, message: &str) {
        if let Err(e) = self.write(instance, message) {
            error!("无法写入崩溃记录: {}", e);
        }
    }
}
