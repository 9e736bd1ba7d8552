use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
///
/// 只描述基础设施层面的失败（文件、配置、浏览器、网络）。
/// 单个案件的业务失败使用 [`ItemFailure`]，由重试控制器分类处理。
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),

    /// 文件操作错误
    #[error("文件错误 ({path}): {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 任务数据解析失败
    #[error("任务数据错误: {0}")]
    Task(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    #[error("HTTP 错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML 解析错误: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {message}")]
    ConnectionFailed { port: u16, message: String },

    /// 导航失败
    #[error("导航到 {url} 失败: {message}")]
    NavigationFailed { url: String, message: String },

    /// 执行脚本失败
    #[error("执行脚本失败: {0}")]
    ScriptExecutionFailed(String),
}

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(BrowserError::ScriptExecutionFailed(err.to_string()))
    }
}

impl AppError {
    /// 创建文件错误并附带路径
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File {
            path: path.into(),
            source,
        }
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

// ========== 案件级失败 ==========

/// 失败分类：在失败发生处一次性决定，下游不再解析文本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 终止性失败，绝不重试
    Terminal,
    /// 可重试失败
    Retryable,
}

/// 失败种类（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 账号或密码无效
    InvalidCredentials,
    /// 外部系统报告行政性待处理状态（需要验证码、授权等级不足等）
    ExternalPending,
    /// 操作员在确认弹窗中取消
    ConfirmationCancelled,
    /// 操作员要求停止
    Stopped,
    /// 某个页面步骤未被确认完成
    StepNotConfirmed,
    /// 提交声明失败
    SubmissionFailed,
    /// 驱动层瞬时错误（超时、页面状态异常等）
    Driver,
}

impl FailureKind {
    /// 该种类固有的分类
    pub fn class(self) -> FailureClass {
        match self {
            FailureKind::InvalidCredentials
            | FailureKind::ExternalPending
            | FailureKind::ConfirmationCancelled
            | FailureKind::Stopped => FailureClass::Terminal,
            FailureKind::StepNotConfirmed | FailureKind::SubmissionFailed | FailureKind::Driver => {
                FailureClass::Retryable
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::InvalidCredentials => "LOGIN INVALIDO",
            FailureKind::ExternalPending => "PENDENCIA",
            FailureKind::ConfirmationCancelled => "CANCELADO",
            FailureKind::Stopped => "PARADO PELO USUARIO",
            FailureKind::StepNotConfirmed => "ETAPA NAO CONFIRMADA",
            FailureKind::SubmissionFailed => "ERRO AO ENVIAR",
            FailureKind::Driver => "ERRO DE AUTOMACAO",
        };
        f.write_str(label)
    }
}

/// 单个案件一次尝试的失败
///
/// `class` 在构造时由 `kind` 决定，保证重试控制器只看结构化字段。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct ItemFailure {
    pub class: FailureClass,
    pub kind: FailureKind,
    pub detail: String,
}

impl ItemFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            class: kind.class(),
            kind,
            detail: detail.into(),
        }
    }

    pub fn stopped() -> Self {
        Self::new(FailureKind::Stopped, "operador solicitou parada")
    }

    pub fn driver(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Driver, detail)
    }

    pub fn is_terminal(&self) -> bool {
        self.class == FailureClass::Terminal
    }

    /// 用于账本和回调的原因文本
    pub fn reason(&self) -> String {
        if self.detail.is_empty() {
            self.kind.to_string()
        } else {
            format!("{} - {}", self.kind, self.detail)
        }
    }
}

impl From<AppError> for ItemFailure {
    fn from(err: AppError) -> Self {
        ItemFailure::driver(err.to_string())
    }
}
