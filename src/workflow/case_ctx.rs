//! 案件处理上下文
//!
//! 封装"哪个实例正在处理第几个案件"这一信息，只用于日志

use std::fmt::Display;

/// 案件处理上下文
#[derive(Debug, Clone)]
pub struct CaseCtx {
    /// 当前实例编号
    pub instance: usize,
    /// 案件在本实例分片中的序号（从 1 开始）
    pub position: usize,
    /// 本实例分片的案件总数
    pub total: usize,
    /// 规范化后的案件标识
    pub case_id: String,
}

impl CaseCtx {
    pub fn new(instance: usize, position: usize, total: usize, case_id: impl Into<String>) -> Self {
        Self {
            instance,
            position,
            total,
            case_id: case_id.into(),
        }
    }
}

impl Display for CaseCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[实例 {} 案件 {}/{} CPF#{}]",
            self.instance, self.position, self.total, self.case_id
        )
    }
}
