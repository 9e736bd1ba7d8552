//! 锁保护的共享缓冲区
//!
//! 缓冲文件是一个 JSON 数组，所有"读-改-写"都在持有 [`FileLock`] 时完成。
//! 多个从实例并发追加，只有主实例读取并清空。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::FileLock;
use crate::ipc::message::IpcMessage;
use crate::ledger::atomic_write;

#[derive(Debug, Clone)]
pub struct IpcChannel {
    buffer_path: PathBuf,
    lock: FileLock,
    lock_timeout: Duration,
}

impl IpcChannel {
    pub fn new(
        buffer_path: impl Into<PathBuf>,
        lock_path: impl Into<PathBuf>,
        lock_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            buffer_path: buffer_path.into(),
            lock: FileLock::new(lock_path, poll_interval),
            lock_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ipc_buffer_path(),
            config.ipc_lock_path(),
            config.lock_timeout,
            config.lock_poll_interval,
        )
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    /// 追加一条消息
    ///
    /// 拿不到锁或写入失败时返回 false，由调用方决定是否再试。
    pub async fn append(&self, message: &IpcMessage) -> bool {
        let Some(guard) = self.lock.acquire(self.lock_timeout).await else {
            warn!("⚠️ IPC 锁等待超时，消息未写入");
            return false;
        };

        let result = self.read_buffer().and_then(|mut messages| {
            messages.push(message.clone());
            let data = serde_json::to_vec(&messages)?;
            atomic_write(&self.buffer_path, &data)
        });
        guard.release();

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ 写入 IPC 缓冲失败: {}", e);
                false
            }
        }
    }

    /// 取出全部待处理消息并清空缓冲
    ///
    /// 拿不到锁时返回空列表，下一轮再取。
    pub async fn drain_all(&self) -> Vec<IpcMessage> {
        let Some(guard) = self.lock.acquire(self.lock_timeout).await else {
            debug!("IPC 锁被占用，本轮跳过读取");
            return Vec::new();
        };

        let result = self.read_buffer().and_then(|messages| {
            if !messages.is_empty() {
                atomic_write(&self.buffer_path, b"[]")?;
            }
            Ok(messages)
        });
        guard.release();

        match result {
            Ok(messages) => {
                if !messages.is_empty() {
                    debug!("从 IPC 缓冲取出 {} 条消息", messages.len());
                }
                messages
            }
            Err(e) => {
                warn!("⚠️ 读取 IPC 缓冲失败: {}", e);
                Vec::new()
            }
        }
    }

    /// 删除缓冲和锁文件，丢弃上次崩溃残留的状态
    pub fn reset(&self) -> AppResult<()> {
        match std::fs::remove_file(&self.buffer_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(AppError::file(&self.buffer_path, e)),
        }
        self.lock.remove()
    }

    fn read_buffer(&self) -> AppResult<Vec<IpcMessage>> {
        let content = match std::fs::read_to_string(&self.buffer_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::file(&self.buffer_path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<Value> = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("⚠️ IPC 缓冲内容损坏，已丢弃: {}", e);
                return Ok(Vec::new());
            }
        };

        Ok(raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("⚠️ 跳过无法解析的 IPC 消息: {}", e);
                    None
                }
            })
            .collect())
    }
}
