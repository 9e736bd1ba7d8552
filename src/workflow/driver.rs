//! 外部表单驱动的能力接口
//!
//! 流程层只依赖这里的 trait，不关心 DOM 细节。
//! 驱动返回的任何错误都不能被解释为"已确认"。

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::ItemFailure;
use crate::models::{Case, Month};

/// 表单中的一个步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepId {
    /// 第 1 页：作业地点
    Location,
    /// 第 2 页：销售信息
    Commercialization,
    /// 第 3 页中的单个月份段
    Month(Month),
    /// 第 3 页整体：前进到声明页
    Monthly,
    /// 第 4 页：勾选责任声明并提交
    Declaration,
}

impl StepId {
    /// 进度条上的步骤编号（单个月份段没有编号）
    pub fn step_number(self) -> Option<u8> {
        match self {
            StepId::Location => Some(1),
            StepId::Commercialization => Some(2),
            StepId::Monthly => Some(3),
            StepId::Declaration => Some(4),
            StepId::Month(_) => None,
        }
    }

    /// 写入失败原因时使用的步骤代码，与状态码同为葡语大写
    pub fn code(self) -> String {
        match self {
            StepId::Location => "TELA 1 (LOCAL)".to_string(),
            StepId::Commercialization => "TELA 2 (COMERCIALIZACAO)".to_string(),
            StepId::Month(month) => format!("MES {}", month.to_string().to_uppercase()),
            StepId::Monthly => "TELA 3 (MENSAL)".to_string(),
            StepId::Declaration => "TELA 4 (DECLARACAO)".to_string(),
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepId::Location => f.write_str("第1页(地点)"),
            StepId::Commercialization => f.write_str("第2页(销售)"),
            StepId::Month(month) => write!(f, "月份 {}", month),
            StepId::Monthly => f.write_str("第3页(月报)"),
            StepId::Declaration => f.write_str("第4页(声明)"),
        }
    }
}

/// 执行一个步骤后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// 已执行填写/点击动作
    Performed,
    /// 当前页面不处于该步骤，无需执行
    NotApplicable,
}

/// 登录结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOutcome {
    /// 已进入可编辑的申报
    Ready,
    /// 本年度申报已提交过，直接取回执
    AlreadySubmitted,
    /// 账号或密码被拒绝
    Rejected(String),
    /// 外部系统要求额外处理（验证码、授权等级等）
    Pending(String),
}

/// 回执文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub path: PathBuf,
    /// 回执上的申报年度
    pub reference_year: Option<String>,
}

/// 表单驱动
#[async_trait]
pub trait WorkflowDriver: Send + Sync {
    /// 登录并进入当年的申报
    async fn login(&self, case: &Case) -> Result<CredentialOutcome, ItemFailure>;

    /// 执行一个步骤
    async fn perform_step(&self, step: StepId, case: &Case) -> Result<StepOutcome, ItemFailure>;

    /// 询问步骤是否已被外部系统确认完成
    async fn is_step_confirmed(&self, step: StepId) -> Result<bool, ItemFailure>;

    /// 下载并定位回执，找不到时返回 None
    async fn fetch_receipt(&self, case: &Case) -> Result<Option<Receipt>, ItemFailure>;
}
