//! JS 执行器 - 基础设施层
//!
//! 持有唯一的 page 资源，只暴露"执行 JS / 导航 / 等待"的能力

use std::time::Duration;

use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::time::{sleep, Instant};

use crate::error::{AppError, AppResult, BrowserError};

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval() 能力
/// - 不认识 Case / Period
/// - 不处理业务流程
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> AppResult<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result
            .into_value()
            .map_err(|e| BrowserError::ScriptExecutionFailed(e.to_string()))?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> AppResult<T> {
        let json_value = self.eval(js_code).await?;
        Ok(serde_json::from_value(json_value)?)
    }

    /// 执行返回布尔值的脚本，非布尔结果视为 false
    pub async fn eval_bool(&self, js_code: impl Into<String>) -> AppResult<bool> {
        Ok(self.eval(js_code).await?.as_bool().unwrap_or(false))
    }

    /// 轮询脚本直到返回 true 或超时
    pub async fn wait_until(
        &self,
        js_code: &str,
        timeout: Duration,
        interval: Duration,
    ) -> AppResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.eval_bool(js_code).await.unwrap_or(false) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(interval).await;
        }
    }

    pub async fn goto(&self, url: &str) -> AppResult<()> {
        self.page.goto(url).await.map_err(|e| {
            AppError::Browser(BrowserError::NavigationFailed {
                url: url.to_string(),
                message: e.to_string(),
            })
        })?;
        Ok(())
    }
}
