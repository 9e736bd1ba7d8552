//! 跨进程建议锁 - 基础设施层
//!
//! 基于操作系统的建议性文件锁（flock / LockFileEx）。
//! 持锁的进程崩溃时锁由内核自动释放，不会留下陈旧的标记。

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// 文件锁
///
/// 只负责"拿到锁 / 放开锁"，不关心被保护的内容。
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 尝试一次，不等待
    pub fn try_acquire(&self) -> AppResult<Option<LockGuard>> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| AppError::file(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(|e| AppError::file(&self.path, e))?;

        match file.try_lock() {
            Ok(()) => Ok(Some(LockGuard {
                file,
                path: self.path.clone(),
            })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(AppError::file(&self.path, e)),
        }
    }

    /// 按固定间隔轮询直到拿到锁或超时
    ///
    /// 超时返回 None，调用方应视为"稍后再试"。
    pub async fn acquire(&self, timeout: Duration) -> Option<LockGuard> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_acquire() {
                Ok(Some(guard)) => return Some(guard),
                Ok(None) => {}
                Err(e) => warn!("⚠️ 获取锁失败: {}", e),
            }
            if Instant::now() >= deadline {
                debug!("等待锁超时: {}", self.path.display());
                return None;
            }
            sleep(self.poll_interval).await;
        }
    }

    /// 删除锁文件（仅在全新运行开始时由主实例调用）
    pub fn remove(&self) -> AppResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::file(&self.path, e)),
        }
    }
}

/// 持锁凭证，drop 时释放
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("释放锁失败 {}: {}", self.path.display(), e);
        }
    }
}
