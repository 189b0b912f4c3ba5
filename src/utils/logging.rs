/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use crate::models::{BatchReport, Stage};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// 初始化 tracing（`RUST_LOG` 优先，默认 `info`）
///
/// 重复调用是安全的，第二次起什么都不做。
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(stage: Stage, total: usize, max_workers: usize, max_retries: u32) {
    info!("{}", "=".repeat(60));
    info!("🚀 批处理启动 - 阶段: {}", stage);
    info!("📋 待处理条目: {}", total);
    info!("📊 最大并发数: {} | 最大重试次数: {}", max_workers, max_retries);
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats<T>(report: &BatchReport<T>, log_file_path: &str) {
    let elapsed = report.finished_at - report.started_at;

    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("耗时: {:.1} 秒", elapsed.num_milliseconds() as f64 / 1000.0);
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", report.succeeded, report.total);
    info!("❌ 失败: {}", report.failed);
    if report.cancelled {
        info!("⏹️ 批处理被取消，未完成的条目已记为失败");
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("专利批处理", 2), "专利...");
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
