//! 运行日志写入服务 - 业务能力层
//!
//! 只负责"写纯文本运行日志"能力，不关心流程

use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::{BatchOutcome, BatchReport, Stage};

/// 运行日志
///
/// 职责：
/// - 写日志头、每条失败一行、结尾汇总
/// - 每次追加打开文件，多个 worker 可以并发调用
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    /// 创建日志文件并写入日志头
    pub fn create(path: impl Into<PathBuf>, stage: Stage, total: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let header = format!(
            "{}\n专利批处理日志 - {} - 阶段: {} - 条目: {}\n{}\n\n",
            "=".repeat(60),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            stage,
            total,
            "=".repeat(60)
        );
        fs::write(&path, header)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条失败记录
    pub fn write_failure<T>(&self, outcome: &BatchOutcome<T>) -> Result<()> {
        let Some(error) = outcome.error() else {
            return Ok(());
        };
        debug!("写入运行日志: {} | {}", outcome.item.identifier(), error.code());

        let line = format!(
            "[{}] {} | 尝试 {} 次 | {} | {}\n",
            chrono::Local::now().format("%H:%M:%S"),
            outcome.item.identifier(),
            outcome.attempts,
            error.code(),
            error
        );
        self.append(&line)
    }

    /// 追加结尾汇总
    pub fn write_summary<T>(&self, report: &BatchReport<T>) -> Result<()> {
        let summary = format!(
            "\n{}\n总数: {} | 成功: {} | 失败: {}{}\n{}\n",
            "-".repeat(60),
            report.total,
            report.succeeded,
            report.failed,
            if report.cancelled { " | 已取消" } else { "" },
            "-".repeat(60)
        );
        self.append(&summary)
    }

    fn append(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }
}
