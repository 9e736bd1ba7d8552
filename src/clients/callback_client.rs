//! 外部回调客户端
//!
//! 每个案件结束后向上游系统 POST 一次状态，失败只记录日志。

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::AppResult;

/// 回调请求体
#[derive(Debug, Serialize)]
pub struct CallbackBody<'a> {
    pub case_number: &'a str,
    pub status_text: &'a str,
    pub raw_data_json: &'a Value,
}

/// 回调客户端
pub struct CallbackClient {
    url: String,
    client: Client,
}

impl CallbackClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// 未配置回调地址时返回 None
    pub fn from_config(config: &Config) -> AppResult<Option<Self>> {
        config
            .callback_url
            .as_deref()
            .map(|url| Self::new(url, config.callback_timeout))
            .transpose()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 发送一次状态更新
    pub async fn send(&self, case_number: &str, status_text: &str, raw: &Value) -> AppResult<()> {
        let body = CallbackBody {
            case_number,
            status_text,
            raw_data_json: raw,
        };
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// 发送并吞掉错误，返回是否成功
    pub async fn notify(&self, case_number: &str, status_text: &str, raw: &Value) -> bool {
        match self.send(case_number, status_text, raw).await {
            Ok(()) => {
                debug!("回调成功: {} -> {}", case_number, status_text);
                true
            }
            Err(e) => {
                warn!("⚠️ 回调失败 ({}): {}", case_number, e);
                false
            }
        }
    }
}
