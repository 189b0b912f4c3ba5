//! # Patent Batch
//!
//! 批量获取、解析并标注专利文档的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `HttpSession` - 共享的 HTTP 连接池，单次 GET
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个文档
//! - `Fetcher` - 获取专利页或读取本地文件
//! - `extractor` - HTML → `PatentRecord`
//! - `Enricher` / `LlmService` - 结构化标注
//! - `OutputStore` / `RunLog` - 写记录、标注、报告和运行日志
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个条目"的完整处理流程
//! - `ItemCtx` - 上下文封装（条目序号 + 尝试次数）
//! - `ItemFlow` - 流程编排（复用已有输出 → 获取 → 解析 / 标注 → 写入）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批处理器，管理并发、重试、超时和取消
//! - `orchestrator/patent_processor` - 把 `ItemFlow` 包装成 stage 函数
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{ErrorClass, ErrorKind, StageResult};
pub use infrastructure::HttpSession;
pub use models::{BatchOutcome, BatchReport, PatentRecord, Stage, WorkItem};
pub use orchestrator::{run_batch, App, BatchOptions, BatchProcessor, CancelToken};
pub use workflow::{ItemCtx, ItemFlow, ItemOutput};
