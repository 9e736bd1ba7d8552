//! 日志工具模块
//!
//! 日志统一输出到 stderr，stdout 留给机器可读的结果记录。

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, RunMode};

/// 初始化全局日志订阅器
///
/// 级别由 `RUST_LOG` 控制，默认 `info`。重复调用不会报错。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    let mode = match config.mode {
        RunMode::Batch => "批量模式",
        RunMode::SingleTask => "单任务模式",
    };
    let role = if config.is_primary() { "主实例" } else { "从实例" };

    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - {}", mode);
    info!(
        "🤖 实例 {}/{} ({})",
        config.instance, config.total_instances, role
    );
    info!("📂 工作目录: {}", config.work_dir.display());
    info!("{}", "=".repeat(60));
}

/// 记录分片信息
pub fn log_partition(instance: usize, assigned: usize, pending: usize, total: usize) {
    info!("[实例 {}] 📋 批次共 {} 个案件，本实例分到 {} 个", instance, total, assigned);
    if pending < assigned {
        info!(
            "[实例 {}] ⏭️ 其中 {} 个已在账本中完成，将跳过",
            instance,
            assigned - pending
        );
    }
    info!("[实例 {}] 💡 待处理: {}\n", instance, pending);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_by_chars_not_bytes() {
        assert_eq!(truncate_text("João da Conceição", 4), "João...");
        assert_eq!(truncate_text("Ana", 10), "Ana");
    }
}
