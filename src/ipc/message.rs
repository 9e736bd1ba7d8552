use serde::{Deserialize, Serialize};

use crate::ledger::LedgerEntry;

/// 从实例发给主实例的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpcMessage {
    /// 一个案件的最终结果
    Result(LedgerEntry),
    /// 从实例已处理完自己的分片
    WorkerDone { instance: usize },
}

impl IpcMessage {
    pub fn sender(&self) -> usize {
        match self {
            IpcMessage::Result(entry) => entry.instance,
            IpcMessage::WorkerDone { instance } => *instance,
        }
    }
}
