use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use patent_batch::config::OutputFormat;
use patent_batch::models::{load_items, load_items_from_dir, load_replay_items, Stage, WorkItem};
use patent_batch::utils::logging;
use patent_batch::{App, Config};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "patent-batch")]
#[command(about = "批量获取、解析并标注专利文档")]
#[command(version)]
struct Cli {
    /// 最大并发数（覆盖 MAX_WORKERS）
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// 最大重试次数（覆盖 MAX_RETRIES）
    #[arg(short, long, global = true)]
    retries: Option<u32>,

    /// 输出目录（覆盖 OUTPUT_DIR）
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// 输出格式：json / toml
    #[arg(long, global = true)]
    format: Option<OutputFormat>,

    /// 已有输出时仍然重新处理
    #[arg(long, global = true)]
    force: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 获取并解析专利页（输入：每行一个专利号或 URL，或 CSV）
    Extract {
        input: PathBuf,
        /// 只处理前 N 个条目（0 = 不限）
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// 为已提取的记录或本地文本生成标注（输入：条目列表文件或文本目录）
    Enrich {
        input: PathBuf,
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// 重新处理上一次运行的失败条目（报告 .json 或失败清单 .txt）
    Replay {
        report: PathBuf,
        /// 失败清单不带阶段信息时使用的阶段
        #[arg(long, default_value = "extract")]
        stage: Stage,
    },

    /// 汇总已提取记录的被引用专利，写成 URL 列表
    CitedBy {
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// 导出全部标注为 CSV
    ExportCsv {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env 可选
    let _ = dotenvy::dotenv();
    logging::init();

    let cli = Cli::parse();
    let config = apply_overrides(Config::from_env()?, &cli);
    let app = App::initialize(config)?;

    // Ctrl-C：不再开始新的尝试，等执行中的尝试结束后写报告
    let cancel = app.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️ 收到 Ctrl-C，正在停止...");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Extract { input, limit } => {
            let items = load_items(&input, Stage::Extract, Some(limit)).await?;
            run(&app, Stage::Extract, items).await?;
        }
        Commands::Enrich { input, limit } => {
            let mut items = if input.is_dir() {
                load_items_from_dir(&input, Stage::Enrich).await?
            } else {
                load_items(&input, Stage::Enrich, None).await?
            };
            if limit > 0 {
                items.truncate(limit);
            }
            run(&app, Stage::Enrich, items).await?;
        }
        Commands::Replay { report, stage } => {
            let items = load_replay_items(&report, stage).await?;
            let stage = items.first().map(WorkItem::stage).unwrap_or(stage);
            info!("🔁 重新处理 {} 个失败条目", items.len());
            run(&app, stage, items).await?;
        }
        Commands::CitedBy { output } => {
            app.write_cited_by(output).await?;
        }
        Commands::ExportCsv { output } => {
            app.export_csv(output.as_deref()).await?;
        }
    }

    Ok(())
}

async fn run(app: &App, stage: Stage, items: Vec<WorkItem>) -> Result<()> {
    if items.is_empty() {
        warn!("没有需要处理的条目");
        return Ok(());
    }
    let summary = app.run(stage, items).await?;
    if summary.report.cancelled {
        warn!("批处理被取消，可以用 replay 继续: {}", summary.paths.manifest.display());
    }
    Ok(())
}

fn apply_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(workers) = cli.workers {
        config.max_workers = workers;
    }
    if let Some(retries) = cli.retries {
        config.max_retries = retries;
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(format) = cli.format {
        config.output_format = format;
    }
    if cli.force {
        config.force_reprocess = true;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_stage_is_parsed_by_clap() {
        let cli = Cli::try_parse_from(["patent-batch", "replay", "failed.txt", "--stage", "Enrich"])
            .unwrap();
        match cli.command {
            Commands::Replay { stage, .. } => assert_eq!(stage, Stage::Enrich),
            _ => panic!("expected replay"),
        }

        let cli = Cli::try_parse_from(["patent-batch", "replay", "failed.txt"]).unwrap();
        assert!(matches!(cli.command, Commands::Replay { stage: Stage::Extract, .. }));

        assert!(Cli::try_parse_from(["patent-batch", "replay", "r.json", "--stage", "load"]).is_err());
    }
}
