//! 对账 - 根据两端清单决定哪些对象需要复制
//!
//! 大小是唯一的相等依据，不比较内容。目标端独有的对象只报告，从不删除。

use super::inventory::Inventory;
use std::collections::BTreeSet;
use tracing::debug;

/// 需要复制的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyReason {
    /// 目标端没有该对象
    Missing,
    /// 目标端大小不同
    SizeMismatch { dest_size: u64 },
}

/// 单个源对象的对账结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip,
    Copy(CopyReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCopy {
    pub name: String,
    pub size: u64,
    pub reason: CopyReason,
}

/// 对账计划
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    /// 按源清单顺序排列
    pub copy_set: Vec<PlannedCopy>,
    pub skipped: usize,
    /// 只存在于目标端的对象
    pub extra: BTreeSet<String>,
}

impl ReconcilePlan {
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            skip_count: self.skipped,
            extra_count: self.extra.len(),
            ..Default::default()
        };
        for planned in &self.copy_set {
            match planned.reason {
                CopyReason::Missing => summary.missing_count += 1,
                CopyReason::SizeMismatch { .. } => summary.mismatch_count += 1,
            }
            summary.copy_bytes += planned.size;
        }
        summary
    }
}

/// 计划统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub missing_count: usize,
    pub mismatch_count: usize,
    pub skip_count: usize,
    pub extra_count: usize,
    pub copy_bytes: u64,
}

impl PlanSummary {
    pub fn copy_count(&self) -> usize {
        self.missing_count + self.mismatch_count
    }
}

/// 判断单个源对象
pub fn classify(size: u64, dest_size: Option<u64>) -> Decision {
    match dest_size {
        None => Decision::Copy(CopyReason::Missing),
        Some(dest_size) if dest_size != size => {
            Decision::Copy(CopyReason::SizeMismatch { dest_size })
        }
        Some(_) => Decision::Skip,
    }
}

/// 对账两份清单
pub fn plan(source: &Inventory, destination: &Inventory) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    for (name, &size) in source {
        match classify(size, destination.get(name).copied()) {
            Decision::Skip => plan.skipped += 1,
            Decision::Copy(reason) => {
                if let CopyReason::SizeMismatch { dest_size } = reason {
                    debug!("大小不同: {} (src={}, dst={})", name, size, dest_size);
                }
                plan.copy_set.push(PlannedCopy {
                    name: name.clone(),
                    size,
                    reason,
                });
            }
        }
    }

    plan.extra = destination
        .keys()
        .filter(|name| !source.contains_key(*name))
        .cloned()
        .collect();

    plan
}
