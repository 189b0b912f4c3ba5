//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批处理器
//! - 管理应用生命周期（初始化、运行、写报告）
//! - 控制并发数量（Semaphore）
//! - 每个条目的重试状态机、单次超时、panic 隔离
//! - 响应取消信号
//! - 输出全局统计信息
//!
//! ### `patent_processor` - 专利条目处理器
//! - 把 `ItemFlow` 包装成 stage 函数
//! - 输出新处理 / 复用的统计
//!
//! ### `retry_policy` - 重试策略
//! - 纯函数：尝试次数 + 错误分类 → 重试（等待多久）或放弃
//!
//! ### `cancel` - 取消信号
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<WorkItem>)
//!     ↓
//! patent_processor (stage_fn)
//!     ↓
//! workflow::ItemFlow (处理单个条目的一次尝试)
//!     ↓
//! services (能力层：fetcher / extractor / enricher / output_store)
//!     ↓
//! infrastructure (基础设施：HttpSession)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管调度，patent_processor 管单个条目
//! 2. **资源隔离**：只有编排层持有 HTTP 会话和 LLM 客户端
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **无业务逻辑**：只做调度和统计，错误是否重试只看错误分类

pub mod batch_processor;
pub mod cancel;
pub mod patent_processor;
pub mod retry_policy;

// 重新导出主要类型
pub use batch_processor::{
    run_batch, App, BatchOptions, BatchProcessor, ItemState, OutcomeEvent, RunSummary,
};
pub use cancel::CancelToken;
pub use patent_processor::{process_items, stage_fn, ItemStats};
pub use retry_policy::{Backoff, RetryDecision, RetryPolicy};
