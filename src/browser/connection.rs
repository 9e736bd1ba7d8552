use std::path::Path;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{AppError, AppResult, BrowserError};

/// 连接到已在调试端口上运行的浏览器并获取页面
pub async fn connect_to_browser_and_page(
    port: u16,
    target_url: Option<&str>,
    target_title: Option<&str>,
) -> AppResult<(Browser, Page)> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);
    debug!("目标 URL: {:?}, 目标标题: {:?}", target_url, target_title);

    let (browser, handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        BrowserError::ConnectionFailed {
            port,
            message: e.to_string(),
        }
    })?;
    debug!("浏览器连接成功");
    spawn_handler(handler);

    // 等待浏览器状态同步
    sleep(Duration::from_millis(300)).await;

    let pages = browser.pages().await?;
    debug!("获取到 {} 个页面", pages.len());

    if let Some(title) = target_title {
        for p in pages.iter() {
            if let Ok(Some(page_title)) = p.get_title().await {
                if page_title.contains(title) {
                    info!("✓ 找到目标页面: {}", page_title);
                    return Ok((browser, p.clone()));
                }
            }
        }
        debug!("未找到匹配的页面，将创建新页面");
    }

    let page = open_page(&browser, target_url).await?;
    Ok((browser, page))
}

/// 启动带独立用户目录的有界面浏览器
///
/// 每个实例使用 `<work_dir>/chrome_profile_<N>`，调试端口为基数 + N - 1。
pub async fn launch_instance_browser(config: &Config) -> AppResult<(Browser, Page)> {
    let profile_dir = config
        .work_dir
        .join(format!("chrome_profile_{}", config.instance));
    std::fs::create_dir_all(&profile_dir).map_err(|e| AppError::file(&profile_dir, e))?;
    let port = config.instance_debug_port();
    info!("🚀 启动浏览器 (端口 {}, 用户目录 {})", port, profile_dir.display());

    let browser_config = BrowserConfig::builder()
        .with_head()
        .user_data_dir(&profile_dir)
        .port(port)
        .args(vec![
            "--start-maximized",
            "--disable-popup-blocking",
            "--disable-notifications",
            "--ignore-certificate-errors",
        ])
        .build()
        .map_err(|message| BrowserError::ConnectionFailed { port, message })?;

    let (browser, handler) = Browser::launch(browser_config).await.map_err(|e| {
        error!("启动浏览器失败: {}", e);
        BrowserError::ConnectionFailed {
            port,
            message: e.to_string(),
        }
    })?;
    spawn_handler(handler);
    sleep(Duration::from_millis(300)).await;

    let page = open_page(&browser, Some(&config.target_url)).await?;
    Ok((browser, page))
}

/// 让浏览器把下载直接保存到指定目录
pub async fn allow_downloads(page: &Page, download_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(download_dir).map_err(|e| AppError::file(download_dir, e))?;
    let absolute =
        std::path::absolute(download_dir).map_err(|e| AppError::file(download_dir, e))?;
    let params = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Allow)
        .download_path(absolute.to_string_lossy().into_owned())
        .build()
        .map_err(BrowserError::ScriptExecutionFailed)?;
    page.execute(params).await?;
    debug!("下载目录: {}", absolute.display());
    Ok(())
}

fn spawn_handler(mut handler: Handler) {
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });
}

async fn open_page(browser: &Browser, target_url: Option<&str>) -> AppResult<Page> {
    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建新页面失败: {}", e);
        e
    })?;
    if let Some(url) = target_url {
        page.goto(url).await.map_err(|e| BrowserError::NavigationFailed {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        info!("已导航到: {}", url);
    }
    Ok(page)
}
