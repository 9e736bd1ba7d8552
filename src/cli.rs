//! 命令行参数
//!
//! 环境变量先构成 [`Config`]，命令行参数再覆盖其上。

use std::path::PathBuf;

use clap::{ArgGroup, Parser, ValueEnum};

use crate::config::{Config, RunMode};

/// 渔业年度申报多实例自动提交
#[derive(Debug, Parser)]
#[command(name = "reap_dispatch", version, about)]
#[command(group(ArgGroup::new("task").required(true).args(["json_task", "task_file"])))]
pub struct Cli {
    /// 实例编号（从 1 开始，1 为主实例）
    #[arg(long = "instancia", short = 'i', env = "REAP_INSTANCE")]
    pub instance: Option<usize>,

    /// 实例总数
    #[arg(long, short = 'n', env = "REAP_TOTAL_INSTANCES")]
    pub total_instances: Option<usize>,

    /// 内联任务：JSON 文本或其 base64 编码
    #[arg(long)]
    pub json_task: Option<String>,

    /// 任务文件（.json 或 .toml）
    #[arg(long)]
    pub task_file: Option<PathBuf>,

    /// 运行模式，决定重试上限
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// PDF 下载目录
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// 每个案件结束后通知的地址
    #[arg(long)]
    pub callback_url: Option<String>,

    /// 账本和 IPC 文件所在目录
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// 月份达到重做上限仍未确认时视为失败
    #[arg(long, default_value_t = false)]
    pub strict_sweep: bool,

    /// 每个案件开始前在终端等待人工确认
    #[arg(long, default_value_t = false)]
    pub confirm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Batch,
    Single,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Batch => RunMode::Batch,
            ModeArg::Single => RunMode::SingleTask,
        }
    }
}

impl Cli {
    /// 把命令行参数覆盖到配置上
    pub fn apply(&self, config: &mut Config) {
        if let Some(instance) = self.instance {
            config.instance = instance;
        }
        if let Some(total) = self.total_instances {
            config.total_instances = total;
        }
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if let Some(dir) = &self.download_dir {
            config.download_dir = dir.clone();
        }
        if let Some(url) = &self.callback_url {
            config.callback_url = Some(url.clone());
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if self.strict_sweep {
            config.sweep_force_accept = false;
        }
    }
}
