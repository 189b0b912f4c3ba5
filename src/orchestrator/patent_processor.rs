//! 专利条目处理器 - 编排层
//!
//! ## 职责
//!
//! 把 `ItemFlow` 包装成批处理器需要的 `stage_fn`。
//!
//! ## 核心功能
//!
//! 1. **复用流程**：`ItemFlow` 只创建一次，通过 `Arc` 共享给所有尝试
//! 2. **阶段分派**：extract / enrich 各自的 stage 函数
//! 3. **统计输出**：记录新处理和复用已有输出的数量

use crate::error::StageResult;
use crate::models::{BatchReport, WorkItem};
use crate::orchestrator::batch_processor::BatchProcessor;
use crate::workflow::{ItemFlow, ItemOutput};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::info;

/// 条目处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ItemStats {
    /// 本次新处理
    pub processed: usize,
    /// 直接复用已有输出
    pub reused: usize,
    pub failed: usize,
}

impl ItemStats {
    pub fn from_report(report: &BatchReport<ItemOutput>) -> Self {
        let reused = report
            .successes()
            .filter_map(|o| o.value())
            .filter(|output| output.reused())
            .count();
        Self {
            processed: report.succeeded - reused,
            reused,
            failed: report.failed,
        }
    }
}

/// 按条目自身的阶段执行一次尝试
pub fn stage_fn(
    flow: Arc<ItemFlow>,
) -> impl Fn(WorkItem) -> BoxFuture<'static, StageResult<ItemOutput>> {
    move |item| {
        let flow = flow.clone();
        Box::pin(async move { flow.run(&item).await })
    }
}

/// 用给定的批处理器处理一批条目
pub async fn process_items(
    processor: &BatchProcessor,
    flow: Arc<ItemFlow>,
    items: Vec<WorkItem>,
) -> BatchReport<ItemOutput> {
    let report = processor.run(items, stage_fn(flow)).await;

    let stats = ItemStats::from_report(&report);
    info!(
        "📦 新处理 {} 个，复用已有输出 {} 个，失败 {} 个",
        stats.processed, stats.reused, stats.failed
    );
    report
}
