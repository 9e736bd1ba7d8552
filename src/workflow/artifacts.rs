//! 回执 PDF 定位
//!
//! 在下载目录（及用户的 Downloads 目录）中寻找最近下载完成的 PDF，
//! 移动到目标文件名并返回绝对路径。
//!
//! 只接受请求回执之后才出现的文件：调用方先取 [`DownloadSnapshot`]，
//! 已经按 `<姓名> - REAP <年度>.pdf` 命名的回执永远不会被再次认领。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("正则表达式无效"));

static RECEIPT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i) - REAP \d{4}\.pdf$").expect("正则表达式无效"));

/// 去掉文件名中不允许的字符
pub fn sanitize_file_name(name: &str) -> String {
    UNSAFE_CHARS.replace_all(name.trim(), "").into_owned()
}

/// 回执文件名：`<姓名> - REAP <年度>.pdf`
pub fn receipt_file_name(name: &str, year: &str) -> String {
    format!("{} - REAP {}.pdf", sanitize_file_name(name), year)
}

/// 是否已是定位器命名过的回执
pub fn is_named_receipt(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| RECEIPT_NAME.is_match(name))
}

/// 请求回执之前各目录中已有的 PDF
#[derive(Debug, Clone, Default)]
pub struct DownloadSnapshot {
    existing: HashSet<PathBuf>,
}

impl DownloadSnapshot {
    fn contains(&self, path: &Path) -> bool {
        self.existing.contains(path)
    }
}

/// 回执定位器
#[derive(Debug, Clone)]
pub struct ReceiptLocator {
    download_dir: PathBuf,
    fallback_dirs: Vec<PathBuf>,
    max_age: Duration,
    min_size: u64,
    polls: u32,
    poll_interval: Duration,
    stability_wait: Duration,
}

impl ReceiptLocator {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            fallback_dirs: Vec::new(),
            max_age: Duration::from_secs(60),
            min_size: 1000,
            polls: 30,
            poll_interval: Duration::from_millis(500),
            stability_wait: Duration::from_secs(1),
        }
    }

    /// 追加用户主目录下的 Downloads 作为备用目录
    pub fn with_user_downloads(mut self) -> Self {
        let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
        if let Some(home) = home {
            let downloads = PathBuf::from(home).join("Downloads");
            if downloads.is_dir() && downloads != self.download_dir {
                self.fallback_dirs.push(downloads);
            }
        }
        self
    }

    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dirs.push(dir.into());
        self
    }

    pub fn with_polling(mut self, polls: u32, interval: Duration, stability_wait: Duration) -> Self {
        self.polls = polls.max(1);
        self.poll_interval = interval;
        self.stability_wait = stability_wait;
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// 记录当前已有的 PDF，之后的 [`locate`](Self::locate) 会忽略它们
    pub fn snapshot(&self) -> DownloadSnapshot {
        DownloadSnapshot {
            existing: self.pdf_entries().map(|(path, _)| path).collect(),
        }
    }

    /// 轮询寻找快照之后出现的回执并移动为 `target_name`
    pub async fn locate(
        &self,
        target_name: &str,
        before: &DownloadSnapshot,
    ) -> AppResult<Option<PathBuf>> {
        std::fs::create_dir_all(&self.download_dir)
            .map_err(|e| AppError::file(&self.download_dir, e))?;
        let target = self.download_dir.join(target_name);

        for poll in 1..=self.polls {
            if let Some((candidate, size)) = self.newest_candidate(before) {
                sleep(self.stability_wait).await;
                let stable = std::fs::metadata(&candidate)
                    .map(|m| m.len() == size)
                    .unwrap_or(false);
                if stable {
                    move_file(&candidate, &target)?;
                    let absolute = std::path::absolute(&target)
                        .map_err(|e| AppError::file(&target, e))?;
                    info!("📄 回执已定位: {}", absolute.display());
                    return Ok(Some(absolute));
                }
                debug!("PDF 仍在写入: {}", candidate.display());
            }
            if poll < self.polls {
                sleep(self.poll_interval).await;
            }
        }

        warn!("⚠️ {} 次轮询后仍未找到回执", self.polls);
        Ok(None)
    }

    /// 所有目录中的 PDF 文件及其元数据
    fn pdf_entries(&self) -> impl Iterator<Item = (PathBuf, std::fs::Metadata)> + '_ {
        std::iter::once(&self.download_dir)
            .chain(self.fallback_dirs.iter())
            .filter_map(|dir| std::fs::read_dir(dir).ok())
            .flatten()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
            })
            .filter_map(|path| {
                let meta = std::fs::metadata(&path).ok()?;
                meta.is_file().then_some((path, meta))
            })
    }

    /// 快照之后出现的、最新且足够新、足够大的 PDF
    fn newest_candidate(&self, before: &DownloadSnapshot) -> Option<(PathBuf, u64)> {
        let now = SystemTime::now();
        self.pdf_entries()
            .filter(|(path, _)| !before.contains(path) && !is_named_receipt(path))
            .filter_map(|(path, meta)| {
                let modified = meta.modified().ok()?;
                let age = now.duration_since(modified).unwrap_or_default();
                (age <= self.max_age && meta.len() > self.min_size)
                    .then(|| (path, meta.len(), modified))
            })
            .max_by_key(|(_, _, modified)| *modified)
            .map(|(path, size, _)| (path, size))
    }
}

fn move_file(from: &Path, to: &Path) -> AppResult<()> {
    if from == to {
        return Ok(());
    }
    if to.exists() {
        std::fs::remove_file(to).map_err(|e| AppError::file(to, e))?;
    }
    // 跨文件系统时 rename 会失败，退回复制后删除
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to).map_err(|e| AppError::file(to, e))?;
        std::fs::remove_file(from).map_err(|e| AppError::file(from, e))?;
    }
    Ok(())
}
