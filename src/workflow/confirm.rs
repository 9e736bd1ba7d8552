//! 人工确认凭据
//!
//! 每个案件开始前调用一次。确认界面可以是任何阻塞式交互。

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::models::Case;

/// 确认结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Ok,
    /// 操作员报告了一个待处理代码（如 2FA、NIVEL）
    PendingCode(String),
    Cancelled,
}

#[async_trait]
pub trait CredentialConfirmer: Send + Sync {
    async fn confirm(&self, case: &Case) -> ConfirmationOutcome;
}

/// 无人值守：总是确认
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirmer;

#[async_trait]
impl CredentialConfirmer for AutoConfirmer {
    async fn confirm(&self, _case: &Case) -> ConfirmationOutcome {
        ConfirmationOutcome::Ok
    }
}

/// 终端确认：提示写到 stderr，从 stdin 读一行
///
/// 空行确认，`c` 取消，其他文本作为待处理代码。
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleConfirmer;

impl ConsoleConfirmer {
    pub fn interpret(line: Option<&str>) -> ConfirmationOutcome {
        match line.map(str::trim) {
            None => ConfirmationOutcome::Cancelled,
            Some("") => ConfirmationOutcome::Ok,
            Some(answer) if answer.eq_ignore_ascii_case("c") => ConfirmationOutcome::Cancelled,
            Some(code) => ConfirmationOutcome::PendingCode(code.to_uppercase()),
        }
    }
}

#[async_trait]
impl CredentialConfirmer for ConsoleConfirmer {
    async fn confirm(&self, case: &Case) -> ConfirmationOutcome {
        eprintln!(
            "\n🔐 {} ({}) 请在浏览器中完成登录。回车=确认, c=取消, 其他=待处理代码:",
            case.short_name(),
            case.id
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let outcome = match lines.next_line().await {
            Ok(line) => Self::interpret(line.as_deref()),
            Err(e) => {
                warn!("⚠️ 读取确认输入失败: {}", e);
                ConfirmationOutcome::Cancelled
            }
        };
        info!("确认结果: {:?}", outcome);
        outcome
    }
}
