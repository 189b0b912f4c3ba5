//! 批处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量条目的调度和资源管理。
//!
//! ## 核心功能
//!
//! 1. **并发控制**：使用 Semaphore 限制同时执行的尝试数（`max_workers`）
//! 2. **重试调度**：每个条目一个状态机，按 `RetryPolicy` 决定重试或放弃
//! 3. **单次超时**：每次尝试都有 `attempt_timeout`，超时按可重试错误处理
//! 4. **故障隔离**：stage 函数 panic 只影响该条目
//! 5. **取消**：收到取消信号后不再开始新的尝试
//! 6. **资源管理**：`App` 持有 HTTP 会话、LLM 客户端和输出目录
//!
//! ## 调度模型
//!
//! ```text
//!                 ┌──────────── dispatcher（唯一持有队列和状态）────────────┐
//! items ──► ready 队列 ──try_acquire──► tokio::spawn(尝试) ──Event──► 处理结果
//!                 ▲                                                       │
//!                 └──────── 重试定时器（sleep / 取消）◄── RetryScheduled ──┘
//! ```
//!
//! worker 只通过 channel 回报事件，不直接修改任何共享状态，
//! 所以不会出现重复出队或丢失更新。

use crate::config::Config;
use crate::error::{ErrorKind, StageResult};
use crate::infrastructure::HttpSession;
use crate::models::{BatchOutcome, BatchReport, Stage, WorkItem};
use crate::orchestrator::cancel::CancelToken;
use crate::orchestrator::patent_processor;
use crate::orchestrator::retry_policy::{Backoff, RetryDecision, RetryPolicy};
use crate::services::{
    citations, csv_export, Enricher, Fetcher, LlmService, OutputStore, ReportPaths, RunLog,
};
use crate::utils::logging::{log_startup, print_final_stats};
use crate::workflow::{ItemCtx, ItemFlow, ItemOutput};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

/// 批处理参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// 同时执行的尝试数（0 按 1 处理）
    pub max_workers: usize,
    /// 首次失败后的最大重试次数
    pub max_retries: u32,
    /// 单次尝试超时
    pub attempt_timeout: Duration,
    pub backoff: Backoff,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: 10,
            max_retries: 3,
            attempt_timeout: Duration::from_secs(60),
            backoff: Backoff::default(),
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.max_workers,
            max_retries: config.max_retries,
            attempt_timeout: config.attempt_timeout,
            backoff: Backoff {
                base: config.backoff_base,
                max: config.backoff_max,
                hint_max: config.retry_hint_max,
            },
        }
    }
}

/// 单个条目的调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    InFlight { attempt: u32 },
    RetryScheduled { attempt: u32 },
    Succeeded,
    ExhaustedFailed,
}

/// 实时推送的条目结果（不含成功值）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeEvent {
    /// 条目在输入中的位置（从 0 开始）
    pub index: usize,
    pub item: WorkItem,
    pub attempts: u32,
    /// 成功时为 `None`
    pub error: Option<ErrorKind>,
}

enum Event<T> {
    AttemptDone { index: usize, result: StageResult<T> },
    RetryDue { index: usize },
}

/// 批处理器
///
/// ```no_run
/// # use patent_batch::orchestrator::{BatchOptions, BatchProcessor};
/// # use patent_batch::models::WorkItem;
/// # async fn example() {
/// let items = vec![WorkItem::extract("US0000001"), WorkItem::extract("US0000002")];
/// let report = BatchProcessor::new(BatchOptions::default())
///     .run(items, |item| async move { Ok(item.identifier().len()) })
///     .await;
/// assert_eq!(report.total, 2);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    options: BatchOptions,
    cancel: CancelToken,
    listener: Option<mpsc::UnboundedSender<OutcomeEvent>>,
}

impl BatchProcessor {
    pub fn new(options: BatchOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::new(),
            listener: None,
        }
    }

    /// 使用外部的取消信号
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 每个条目完成时推送一条事件
    pub fn with_listener(mut self, listener: mpsc::UnboundedSender<OutcomeEvent>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// 处理一批条目
    ///
    /// 每个输入条目在报告中恰好对应一条结果，按输入顺序排列。
    pub async fn run<T, F, Fut>(&self, items: Vec<WorkItem>, stage_fn: F) -> BatchReport<T>
    where
        T: Send + 'static,
        F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StageResult<T>> + Send + 'static,
    {
        if items.is_empty() {
            return BatchReport::empty();
        }

        let started_at = Utc::now();
        let mut dispatcher = Dispatcher::new(self, items, Arc::new(stage_fn));
        dispatcher.run().await;
        dispatcher.into_report(started_at)
    }
}

/// 调度器：唯一持有待处理队列和条目状态
struct Dispatcher<'a, T, F> {
    processor: &'a BatchProcessor,
    policy: RetryPolicy,
    stage_fn: Arc<F>,
    semaphore: Arc<Semaphore>,
    items: Vec<WorkItem>,
    states: Vec<ItemState>,
    attempts: Vec<u32>,
    results: Vec<Option<StageResult<T>>>,
    ready: VecDeque<usize>,
    finished: usize,
    cancelled: bool,
    tx: mpsc::UnboundedSender<Event<T>>,
    rx: mpsc::UnboundedReceiver<Event<T>>,
}

impl<'a, T, F, Fut> Dispatcher<'a, T, F>
where
    T: Send + 'static,
    F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageResult<T>> + Send + 'static,
{
    fn new(processor: &'a BatchProcessor, items: Vec<WorkItem>, stage_fn: Arc<F>) -> Self {
        let total = items.len();
        let options = &processor.options;
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            processor,
            policy: RetryPolicy::new(options.max_retries, options.backoff),
            stage_fn,
            semaphore: Arc::new(Semaphore::new(options.max_workers.max(1))),
            items,
            states: vec![ItemState::Pending; total],
            attempts: vec![0; total],
            results: (0..total).map(|_| None).collect(),
            ready: (0..total).collect(),
            finished: 0,
            cancelled: false,
            tx,
            rx,
        }
    }

    fn ctx(&self, index: usize) -> ItemCtx {
        ItemCtx::new(
            index + 1,
            self.items.len(),
            self.items[index].identifier(),
            self.attempts[index],
        )
    }

    async fn run(&mut self) {
        loop {
            if !self.cancelled && self.processor.cancel.is_cancelled() {
                self.on_cancel();
            }
            if !self.cancelled {
                self.launch_ready();
            }
            if self.finished == self.items.len() {
                break;
            }

            let cancel = self.processor.cancel.clone();
            let cancelled = self.cancelled;
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(Event::AttemptDone { index, result }) => self.on_attempt_done(index, result),
                    Some(Event::RetryDue { index }) => self.on_retry_due(index),
                    // dispatcher 自己持有 tx，channel 不会关闭
                    None => break,
                },
                _ = cancel.cancelled(), if !cancelled => self.on_cancel(),
            }
        }
    }

    /// 在并发上限内启动尽可能多的尝试
    fn launch_ready(&mut self) {
        while let Some(&index) = self.ready.front() {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                break;
            };
            self.ready.pop_front();
            self.spawn_attempt(index, permit);
        }
    }

    fn spawn_attempt(&mut self, index: usize, permit: OwnedSemaphorePermit) {
        self.attempts[index] += 1;
        let attempt = self.attempts[index];
        self.states[index] = ItemState::InFlight { attempt };
        debug!("{} ▶️ 开始尝试", self.ctx(index));

        let item = self.items[index].clone();
        let stage_fn = self.stage_fn.clone();
        let tx = self.tx.clone();
        let attempt_timeout = self.processor.options.attempt_timeout;
        // stage 函数里的日志都带上条目上下文
        let span = self.ctx(index).span();

        tokio::spawn(async move {
            // 内层任务隔离 panic，外层负责超时
            let mut handle = tokio::spawn(async move { stage_fn(item).await }.instrument(span));
            let result = match tokio::time::timeout(attempt_timeout, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => Err(ErrorKind::Panicked(panic_message(join_error))),
                Err(_) => {
                    handle.abort();
                    Err(ErrorKind::Timeout(attempt_timeout))
                }
            };
            // 先释放名额再回报，dispatcher 收到事件时名额一定可用
            drop(permit);
            let _ = tx.send(Event::AttemptDone { index, result });
        });
    }

    fn on_attempt_done(&mut self, index: usize, result: StageResult<T>) {
        let ctx = self.ctx(index);
        let error = match result {
            Ok(value) => {
                info!("{} ✅ 成功", ctx);
                self.states[index] = ItemState::Succeeded;
                self.finish(index, Ok(value));
                return;
            }
            Err(error) => error,
        };

        match self.policy.decide(self.attempts[index], &error) {
            RetryDecision::Retry { delay } if !self.cancelled => {
                warn!(
                    "{} ⚠️ 失败（{}），{:.1} 秒后重试: {}",
                    ctx,
                    error.code(),
                    delay.as_secs_f64(),
                    error
                );
                self.states[index] = ItemState::RetryScheduled {
                    attempt: self.attempts[index],
                };
                self.schedule_retry(index, delay);
            }
            RetryDecision::Retry { .. } => {
                warn!("{} ⏹️ 已取消，不再重试: {}", ctx, error);
                self.states[index] = ItemState::ExhaustedFailed;
                self.finish(index, Err(ErrorKind::Cancelled));
            }
            RetryDecision::GiveUp => {
                error!("{} ❌ 最终失败（{}）: {}", ctx, error.code(), error);
                self.states[index] = ItemState::ExhaustedFailed;
                self.finish(index, Err(error));
            }
        }
    }

    fn schedule_retry(&self, index: usize, delay: Duration) {
        let tx = self.tx.clone();
        let cancel = self.processor.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {}
            }
            let _ = tx.send(Event::RetryDue { index });
        });
    }

    fn on_retry_due(&mut self, index: usize) {
        if !matches!(self.states[index], ItemState::RetryScheduled { .. }) {
            return;
        }
        if self.cancelled {
            self.states[index] = ItemState::ExhaustedFailed;
            self.finish(index, Err(ErrorKind::Cancelled));
        } else {
            self.states[index] = ItemState::Pending;
            self.ready.push_back(index);
        }
    }

    /// 取消：待处理的条目直接记为 Cancelled，执行中的尝试照常完成
    fn on_cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        warn!(
            "⏹️ 收到取消信号，{} 个条目未开始，执行中的尝试会继续完成",
            self.ready.len()
        );

        while let Some(index) = self.ready.pop_front() {
            self.states[index] = ItemState::ExhaustedFailed;
            self.finish(index, Err(ErrorKind::Cancelled));
        }
    }

    fn finish(&mut self, index: usize, result: StageResult<T>) {
        if let Some(listener) = &self.processor.listener {
            let _ = listener.send(OutcomeEvent {
                index,
                item: self.items[index].clone(),
                attempts: self.attempts[index],
                error: result.as_ref().err().cloned(),
            });
        }
        self.results[index] = Some(result);
        self.finished += 1;
    }

    fn into_report(self, started_at: chrono::DateTime<Utc>) -> BatchReport<T> {
        let outcomes = self
            .items
            .into_iter()
            .zip(self.results)
            .zip(self.attempts)
            .map(|((item, result), attempts)| BatchOutcome {
                item,
                result: result.unwrap_or(Err(ErrorKind::Cancelled)),
                attempts,
            })
            .collect();
        BatchReport::from_outcomes(outcomes, self.cancelled, started_at)
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    if error.is_cancelled() {
        return "任务被中止".to_string();
    }
    let payload = error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}

/// 以默认超时和退避运行一批条目
pub async fn run_batch<T, F, Fut>(
    items: Vec<WorkItem>,
    stage_fn: F,
    max_workers: usize,
    max_retries: u32,
) -> BatchReport<T>
where
    T: Send + 'static,
    F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageResult<T>> + Send + 'static,
{
    BatchProcessor::new(BatchOptions {
        max_workers,
        max_retries,
        ..BatchOptions::default()
    })
    .run(items, stage_fn)
    .await
}

// ========== 应用入口 ==========

/// 一次运行的汇总结果
pub struct RunSummary {
    pub report: BatchReport<ItemOutput>,
    pub paths: ReportPaths,
}

/// 应用主结构
///
/// 唯一持有运行期资源：HTTP 会话（在 Fetcher 里）、LLM 客户端、输出目录。
pub struct App {
    config: Config,
    flow: Arc<ItemFlow>,
    store: OutputStore,
    cancel: CancelToken,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config) -> Result<Self> {
        config.validate().context("配置不合法")?;

        let session = HttpSession::new(&config.user_agent, config.http_timeout)?;
        let fetcher = Fetcher::new(
            session,
            config.patent_base_url.clone(),
            config.status_policy.clone(),
        );
        let enricher = Enricher::new(Arc::new(LlmService::new(&config)));
        Ok(Self::with_parts(config, fetcher, enricher))
    }

    /// 用给定的能力组件组装应用（测试里替换标注服务）
    pub fn with_parts(config: Config, fetcher: Fetcher, enricher: Enricher) -> Self {
        let store = OutputStore::new(config.output_dir.clone(), config.output_format);
        let flow = ItemFlow::new(
            fetcher,
            enricher,
            store.clone(),
            config.enrichment_schema.clone(),
            config.force_reprocess,
        );
        Self {
            config,
            flow: Arc::new(flow),
            store,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    /// 取消信号（例如绑定到 Ctrl-C）
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// 运行一批条目并写出报告
    pub async fn run(&self, stage: Stage, items: Vec<WorkItem>) -> Result<RunSummary> {
        log_startup(stage, items.len(), self.config.max_workers, self.config.max_retries);

        // 三个报告文件共用同一个时间戳
        let paths = self.store.report_paths(stage, Utc::now());
        let run_log = RunLog::create(&paths.run_log, stage, items.len())?;

        // processor 持有唯一的 listener，跑完后随 async 块一起丢弃，日志循环随之结束
        let (tx, mut rx) = mpsc::unbounded_channel();
        let processor = BatchProcessor::new(BatchOptions::from_config(&self.config))
            .with_cancel(self.cancel.clone())
            .with_listener(tx);
        let flow = self.flow.clone();
        let run = async move { patent_processor::process_items(&processor, flow, items).await };

        let log_events = async {
            while let Some(event) = rx.recv().await {
                let Some(error) = event.error else {
                    continue;
                };
                let failure = BatchOutcome::<()> {
                    item: event.item,
                    result: Err(error),
                    attempts: event.attempts,
                };
                if let Err(e) = run_log.write_failure(&failure) {
                    warn!("⚠️ 写运行日志失败: {}", e);
                }
            }
        };

        let (report, ()) = tokio::join!(run, log_events);

        run_log.write_summary(&report)?;
        self.store
            .write_report(&report, stage, &paths)
            .await
            .context("写批处理报告失败")?;

        print_final_stats(&report, &run_log.path().display().to_string());
        info!("📄 报告: {}", paths.manifest.display());
        if report.failed > 0 {
            info!("🔁 失败条目: {}", paths.failed_list.display());
        }

        Ok(RunSummary { report, paths })
    }

    /// 汇总已提取记录的被引用专利，写成 URL 列表
    pub async fn write_cited_by(&self, output: Option<PathBuf>) -> Result<(PathBuf, usize)> {
        let records = self.store.list_records().await?;
        let numbers = citations::collect_forward_citations(&records);
        let urls = citations::citation_urls(&numbers, &self.config.patent_base_url);
        let path = output.unwrap_or_else(|| self.store.root().join("cited_by_urls.txt"));
        citations::write_url_list(&path, &urls).await?;
        info!(
            "🔗 从 {} 条记录中汇总出 {} 个被引用专利: {}",
            records.len(),
            urls.len(),
            path.display()
        );
        Ok((path, urls.len()))
    }

    /// 导出全部标注为 CSV
    pub async fn export_csv(&self, output: Option<&Path>) -> Result<(PathBuf, usize)> {
        let enrichments = self.store.list_enrichments().await?;
        let records = self.store.list_records().await?;
        let path = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.store.root().join("enrichments.csv"));
        let rows = csv_export::export_enrichments(
            &path,
            &enrichments,
            &records,
            &self.config.patent_base_url,
        )
        .await?;
        info!("📊 已导出 {} 条标注: {}", rows, path.display());
        Ok((path, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, ParseError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn options(max_workers: usize, max_retries: u32) -> BatchOptions {
        BatchOptions {
            max_workers,
            max_retries,
            attempt_timeout: Duration::from_secs(5),
            backoff: Backoff {
                base: Duration::from_millis(1),
                max: Duration::from_millis(5),
                ..Backoff::default()
            },
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report: BatchReport<()> = BatchProcessor::new(options(2, 2))
            .run(Vec::new(), |_| async { Ok(()) })
            .await;
        assert_eq!(report.total, 0);
        assert!(report.outcomes.is_empty());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let report = BatchProcessor::new(options(1, 3))
            .run(vec![WorkItem::extract("US1")], move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ErrorKind::from(FetchError::NetworkTimeout {
                            identifier: "US1".into(),
                            message: "timed out".into(),
                        }))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.outcomes[0].attempts, 3);
        assert_eq!(report.outcomes[0].value(), Some(&3));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let report: BatchReport<()> = BatchProcessor::new(options(1, 3))
            .run(vec![WorkItem::extract("US1")], |_| async {
                Err(ErrorKind::from(ParseError::missing("title")))
            })
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.outcomes[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let report = BatchProcessor::new(options(2, 2))
            .run(
                vec![WorkItem::extract("boom"), WorkItem::extract("US1")],
                |item| async move {
                    if item.identifier() == "boom" {
                        panic!("stage exploded");
                    }
                    Ok(())
                },
            )
            .await;
        assert_eq!(report.succeeded, 1);
        assert!(matches!(
            report.outcomes[0].error(),
            Some(ErrorKind::Panicked(msg)) if msg.contains("stage exploded")
        ));
        assert_eq!(report.outcomes[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_hanging_attempt_times_out_and_counts_as_attempt() {
        let mut opts = options(1, 1);
        opts.attempt_timeout = Duration::from_millis(20);
        let report: BatchReport<()> = BatchProcessor::new(opts)
            .run(vec![WorkItem::extract("US1")], |_| async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;
        assert_eq!(report.outcomes[0].attempts, 2);
        assert!(matches!(report.outcomes[0].error(), Some(ErrorKind::Timeout(_))));
    }

    #[tokio::test]
    async fn test_listener_receives_every_outcome() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let items: Vec<_> = (0..5).map(|i| WorkItem::extract(format!("US{}", i))).collect();
        let report = BatchProcessor::new(options(2, 0))
            .with_listener(tx)
            .run(items, |_| async { Ok(()) })
            .await;
        assert_eq!(report.succeeded, 5);

        let mut indexes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert!(event.error.is_none());
            indexes.push(event.index);
        }
        indexes.sort();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
    }

    /// 收集日志输出
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stage_logs_carry_item_ctx() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let report = BatchProcessor::new(options(1, 0))
            .run(
                vec![WorkItem::extract("US1"), WorkItem::extract("US2")],
                |item| async move {
                    info!("stage body ran for {}", item.identifier());
                    Ok(())
                },
            )
            .await;
        assert_eq!(report.succeeded, 2);

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|line| line.contains("stage body ran for US2"))
            .unwrap();
        assert!(line.contains("[专利 2/2 US2 第1次]"), "{}", line);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let processor = BatchProcessor::new(options(0, 0));
        let dispatcher: Dispatcher<'_, (), _> = Dispatcher::new(
            &processor,
            vec![WorkItem::extract("US1")],
            Arc::new(|_: WorkItem| async { Ok::<(), ErrorKind>(()) }),
        );
        assert_eq!(dispatcher.semaphore.available_permits(), 1);
    }
}
