//! 批次分片
//!
//! 实例 k（从 1 开始）分到下标 `k-1, k-1+N, k-1+2N, ...` 的案件。
//! 只依赖批次顺序，同一批次在所有实例上得到互不相交且覆盖全集的分片。

use crate::error::{AppError, AppResult};

/// 按步长取出本实例的分片
pub fn assign<T: Clone>(items: &[T], worker_index: usize, worker_count: usize) -> AppResult<Vec<T>> {
    if worker_count == 0 || worker_index == 0 || worker_index > worker_count {
        return Err(AppError::Config(format!(
            "实例编号 {} 不在 1..={} 范围内",
            worker_index, worker_count
        )));
    }

    Ok(items
        .iter()
        .skip(worker_index - 1)
        .step_by(worker_count)
        .cloned()
        .collect())
}
