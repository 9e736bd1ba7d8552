use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use reap_dispatch::browser::{allow_downloads, connect_to_browser_and_page, launch_instance_browser};
use reap_dispatch::cli::Cli;
use reap_dispatch::ipc::IpcChannel;
use reap_dispatch::models::{load_task_file, parse_inline_task};
use reap_dispatch::utils::{logging, CrashLog};
use reap_dispatch::workflow::{AutoConfirmer, ConsoleConfirmer, CredentialConfirmer, ReceiptLocator};
use reap_dispatch::{CaseFlow, Config, JsExecutor, ReapBrowserDriver, RunCoordinator};

/// 两次 Ctrl-C 之间的确认窗口
const STOP_CONFIRM_WINDOW: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    let cli = Cli::parse();

    // 加载配置：环境变量 → 命令行
    let mut config = Config::from_env();
    cli.apply(&mut config);

    let crash_log = CrashLog::new(&config.crash_dir);
    let instance = config.instance;

    if let Err(e) = run(&cli, config).await {
        error!("[实例 {}] ❌ 致命错误: {:#}", instance, e);
        crash_log.record(instance, &format!("{:#}", e));
        return Err(e);
    }
    Ok(())
}

async fn run(cli: &Cli, config: Config) -> Result<()> {
    config.validate()?;
    logging::log_startup(&config);

    // 主实例最先清理上次运行残留的 IPC 文件，之后从实例发出的完成信号才会保留
    if config.is_primary() {
        if let Err(e) = IpcChannel::from_config(&config).reset() {
            warn!("[实例 {}] ⚠️ 清理 IPC 残留失败: {}", config.instance, e);
        }
    }

    let cases = match (&cli.json_task, &cli.task_file) {
        (Some(text), _) => parse_inline_task(text).context("无法解析内联任务")?,
        (None, Some(path)) => load_task_file(path)
            .await
            .with_context(|| format!("无法加载任务文件 {}", path.display()))?,
        (None, None) => anyhow::bail!("必须提供 --json-task 或 --task-file"),
    };
    if cases.is_empty() {
        warn!("⚠️ 任务中没有有效案件，程序结束");
        return Ok(());
    }

    // 优先连接已在运行的浏览器，否则启动新的
    let (_browser, page) = match connect_to_browser_and_page(
        config.instance_debug_port(),
        Some(&config.target_url),
        None,
    )
    .await
    {
        Ok(pair) => pair,
        Err(e) => {
            warn!("⚠️ 无法连接已有浏览器 ({})，启动新浏览器", e);
            launch_instance_browser(&config).await?
        }
    };
    let download_dir = config.instance_download_dir();
    allow_downloads(&page, &download_dir).await?;

    let locator = ReceiptLocator::new(download_dir).with_user_downloads();
    let driver = Arc::new(ReapBrowserDriver::new(
        JsExecutor::new(page),
        config.target_url.clone(),
        locator,
        config.instance,
    ));
    let flow = Arc::new(CaseFlow::new(driver, &config));
    let confirmer: Arc<dyn CredentialConfirmer> = if cli.confirm {
        Arc::new(ConsoleConfirmer)
    } else {
        Arc::new(AutoConfirmer)
    };

    let cancel = CancellationToken::new();
    spawn_stop_listener(cancel.clone(), config.instance);

    let mut coordinator = RunCoordinator::new(config, flow, confirmer)?;
    let summary = coordinator.run(&cases, &cancel).await?;
    if summary.stopped {
        info!("⏹️ 已按操作员要求停止");
    }
    Ok(())
}

/// 第一次 Ctrl-C 只提示，窗口内再按一次才真正停止
fn spawn_stop_listener(cancel: CancellationToken, instance: usize) {
    tokio::spawn(async move {
        let mut last_press: Option<Instant> = None;
        while tokio::signal::ctrl_c().await.is_ok() {
            let now = Instant::now();
            if last_press.is_some_and(|t| now.duration_since(t) <= STOP_CONFIRM_WINDOW) {
                warn!("[实例 {}] ⏹️ 停止已确认，当前步骤结束后退出", instance);
                cancel.cancel();
                break;
            }
            warn!(
                "[实例 {}] 再按一次 Ctrl-C（{} 秒内）确认停止",
                instance,
                STOP_CONFIRM_WINDOW.as_secs()
            );
            last_press = Some(now);
        }
    });
}
