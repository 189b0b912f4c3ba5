//! 批处理结果模型
//!
//! - `BatchOutcome<T>`：单个条目的最终结果（成功值或已耗尽的失败）
//! - `BatchReport<T>`：一次运行的汇总，运行结束后只读
//! - `ReportManifest`：报告的可序列化形式，失败列表可直接用于重放

use crate::error::{ErrorClass, ErrorKind};
use crate::models::work_item::{Stage, WorkItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个条目的结果
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    pub item: WorkItem,
    /// 成功值，或最后一次尝试的错误
    pub result: Result<T, ErrorKind>,
    /// 实际执行的尝试次数（因取消而从未执行时为 0）
    pub attempts: u32,
}

impl<T> BatchOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        self.result.as_ref().err()
    }
}

/// 一次批处理运行的汇总
#[derive(Debug, Clone)]
pub struct BatchReport<T> {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 运行期间是否收到取消信号
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 按输入顺序排列，每个输入条目恰好一条
    pub outcomes: Vec<BatchOutcome<T>>,
}

impl<T> BatchReport<T> {
    /// 空输入的合法报告
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            cancelled: false,
            started_at: now,
            finished_at: now,
            outcomes: Vec::new(),
        }
    }

    /// 由按输入顺序排列的结果组装报告
    pub fn from_outcomes(
        outcomes: Vec<BatchOutcome<T>>,
        cancelled: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let total = outcomes.len();
        Self {
            total,
            succeeded,
            failed: total - succeeded,
            cancelled,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        }
    }

    /// 失败条目（按输入顺序）
    pub fn failures(&self) -> impl Iterator<Item = &BatchOutcome<T>> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn successes(&self) -> impl Iterator<Item = &BatchOutcome<T>> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    /// 失败条目对应的 WorkItem，可直接作为下一次运行的输入
    pub fn failed_items(&self) -> Vec<WorkItem> {
        self.failures().map(|o| o.item.clone()).collect()
    }

    /// 可序列化的报告
    pub fn manifest(&self, stage: Option<Stage>) -> ReportManifest {
        ReportManifest {
            stage,
            started_at: self.started_at,
            finished_at: self.finished_at,
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            cancelled: self.cancelled,
            succeeded_items: self
                .successes()
                .map(|o| o.item.identifier().to_string())
                .collect(),
            failures: self
                .failures()
                .filter_map(|o| {
                    o.error().map(|e| FailureEntry {
                        item: o.item.clone(),
                        attempts: o.attempts,
                        error_code: e.code().to_string(),
                        error_class: e.class(),
                        message: e.to_string(),
                    })
                })
                .collect(),
        }
    }
}

/// 报告中的一条失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub item: WorkItem,
    pub attempts: u32,
    pub error_code: String,
    pub error_class: ErrorClass,
    pub message: String,
}

/// 写入磁盘的批处理报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub succeeded_items: Vec<String>,
    pub failures: Vec<FailureEntry>,
}

impl ReportManifest {
    /// 重放用的条目列表
    pub fn replay_items(&self) -> Vec<WorkItem> {
        self.failures.iter().map(|f| f.item.clone()).collect()
    }
}
