use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// 运行模式：批量或单任务，决定重试上限与间隔
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Batch,
    SingleTask,
}

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 当前实例编号（从 1 开始，1 为主实例）
    pub instance: usize,
    /// 实例总数
    pub total_instances: usize,
    /// 运行模式
    pub mode: RunMode,
    /// 工作目录，账本和 IPC 文件都放在这里
    pub work_dir: PathBuf,
    /// 进度账本文件名
    pub ledger_file: String,
    /// IPC 缓冲文件名
    pub ipc_buffer_file: String,
    /// IPC 锁文件名
    pub ipc_lock_file: String,
    /// 崩溃记录目录
    pub crash_dir: PathBuf,
    /// PDF 下载根目录，每个实例使用其下的 `inst_<N>`
    pub download_dir: PathBuf,
    /// 是否向 stdout 输出机器可读的结果记录
    pub stdout_results: bool,

    // --- 回调 ---
    pub callback_url: Option<String>,
    pub callback_timeout: Duration,

    // --- 重试 ---
    pub batch_max_attempts: u32,
    pub single_task_max_attempts: u32,
    pub batch_retry_delay: Duration,
    pub single_task_retry_delay: Duration,
    /// 单页步骤（第 1、2、3 页）确认失败时的重做次数
    pub step_max_attempts: u32,

    // --- 月份扫描 ---
    pub sweep_max_attempts_per_period: u32,
    pub sweep_timeout: Duration,
    pub sweep_interval: Duration,
    /// 超过上限仍未确认的月份是否强制视为完成
    pub sweep_force_accept: bool,

    // --- IPC ---
    pub lock_timeout: Duration,
    pub lock_poll_interval: Duration,
    pub sentinel_repeats: u32,
    pub sentinel_interval: Duration,
    pub sibling_poll_interval: Duration,

    // --- 账本 ---
    pub ledger_write_retries: u32,
    pub ledger_retry_delay: Duration,

    // --- 浏览器 ---
    /// 浏览器调试端口基数，实例 N 使用 base + N - 1
    pub browser_debug_port: u16,
    pub target_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance: 1,
            total_instances: 1,
            mode: RunMode::Batch,
            work_dir: PathBuf::from("."),
            ledger_file: "progresso_final.json".to_string(),
            ipc_buffer_file: "buffer_bot2.json".to_string(),
            ipc_lock_file: "buffer_bot2.lock".to_string(),
            crash_dir: PathBuf::from("erros_robo"),
            download_dir: PathBuf::from("downloads"),
            stdout_results: true,
            callback_url: None,
            callback_timeout: Duration::from_secs(10),
            batch_max_attempts: 3,
            single_task_max_attempts: 2,
            batch_retry_delay: Duration::from_secs(5),
            single_task_retry_delay: Duration::from_secs(3),
            step_max_attempts: 3,
            sweep_max_attempts_per_period: 3,
            sweep_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(2),
            sweep_force_accept: true,
            lock_timeout: Duration::from_secs(5),
            lock_poll_interval: Duration::from_millis(100),
            sentinel_repeats: 5,
            sentinel_interval: Duration::from_secs(1),
            sibling_poll_interval: Duration::from_secs(2),
            ledger_write_retries: 10,
            ledger_retry_delay: Duration::from_secs(5),
            browser_debug_port: 9222,
            target_url: "https://pesqbrasil-pescadorprofissional.mpa.gov.br".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            instance: env_parse("REAP_INSTANCE").unwrap_or(default.instance),
            total_instances: env_parse("REAP_TOTAL_INSTANCES").unwrap_or(default.total_instances),
            work_dir: env_string("REAP_WORK_DIR").map(PathBuf::from).unwrap_or(default.work_dir),
            crash_dir: env_string("REAP_CRASH_DIR").map(PathBuf::from).unwrap_or(default.crash_dir),
            download_dir: env_string("REAP_DOWNLOAD_DIR").map(PathBuf::from).unwrap_or(default.download_dir),
            stdout_results: env_parse("REAP_STDOUT_RESULTS").unwrap_or(default.stdout_results),
            callback_url: env_string("REAP_CALLBACK_URL").or(default.callback_url),
            callback_timeout: env_secs("REAP_CALLBACK_TIMEOUT_SECS").unwrap_or(default.callback_timeout),
            batch_max_attempts: env_parse("REAP_BATCH_MAX_ATTEMPTS").unwrap_or(default.batch_max_attempts),
            batch_retry_delay: env_secs("REAP_RETRY_DELAY_SECS").unwrap_or(default.batch_retry_delay),
            sweep_timeout: env_secs("REAP_SWEEP_TIMEOUT_SECS").unwrap_or(default.sweep_timeout),
            sweep_force_accept: env_parse("REAP_SWEEP_FORCE_ACCEPT").unwrap_or(default.sweep_force_accept),
            lock_timeout: env_secs("REAP_LOCK_TIMEOUT_SECS").unwrap_or(default.lock_timeout),
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT").unwrap_or(default.browser_debug_port),
            target_url: env_string("TARGET_URL").unwrap_or(default.target_url),
            ..default
        }
    }

    /// 校验实例编号与各项上限
    pub fn validate(&self) -> AppResult<()> {
        if self.total_instances == 0 {
            return Err(AppError::Config("实例总数必须大于 0".to_string()));
        }
        if self.instance == 0 || self.instance > self.total_instances {
            return Err(AppError::Config(format!(
                "实例编号 {} 超出范围 [1, {}]",
                self.instance, self.total_instances
            )));
        }
        if self.batch_max_attempts == 0 || self.single_task_max_attempts == 0 {
            return Err(AppError::Config("重试上限必须大于 0".to_string()));
        }
        if self.sweep_max_attempts_per_period == 0 || self.step_max_attempts == 0 {
            return Err(AppError::Config("步骤重做上限必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 是否为主实例（唯一的账本写入者）
    pub fn is_primary(&self) -> bool {
        self.instance == 1
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.work_dir.join(&self.ledger_file)
    }

    pub fn ipc_buffer_path(&self) -> PathBuf {
        self.work_dir.join(&self.ipc_buffer_file)
    }

    pub fn ipc_lock_path(&self) -> PathBuf {
        self.work_dir.join(&self.ipc_lock_file)
    }

    /// 当前实例独占的下载目录，避免实例之间互相认领回执
    pub fn instance_download_dir(&self) -> PathBuf {
        self.download_dir.join(format!("inst_{}", self.instance))
    }

    /// 当前实例对应的浏览器调试端口
    pub fn instance_debug_port(&self) -> u16 {
        self.browser_debug_port
            .saturating_add(self.instance.saturating_sub(1) as u16)
    }

    /// 按运行模式返回 (最大尝试次数, 重试间隔)
    pub fn retry_limits(&self) -> (u32, Duration) {
        match self.mode {
            RunMode::Batch => (self.batch_max_attempts, self.batch_retry_delay),
            RunMode::SingleTask => (self.single_task_max_attempts, self.single_task_retry_delay),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}
