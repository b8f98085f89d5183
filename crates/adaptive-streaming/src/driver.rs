//! Streaming Driver (SD): orchestrates TA -> SS -> ECO -> CH -> CR and drives
//! the consumer.
//!
//! Concurrency primitives follow the teacher's idiom in
//! `backpressure.rs`/`progress.rs`: a `Semaphore` bounds in-flight work, an
//! `mpsc` channel fans results back to a single ordering point. Cancellation
//! is a locally-implemented `Arc<AtomicBool>` + `Notify` pair rather than
//! `tokio_util::sync::CancellationToken`, keeping the dependency list aligned
//! with what the workspace already pulls in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use adaptive_html::analyzer::{analyze, Analysis, ComplexityWeights};
use adaptive_html::chunker::{chunk as chunk_html, Chunk, ChunkStrategy as HtmlChunkStrategy};
use adaptive_html::html_model::HtmlModel;
use adaptive_html::optimizer::{advanced_registry, basic_registry, optimize, OptimizerConfig};
use tokio::sync::{mpsc, Notify};

use crate::backpressure::BackpressureController;
use crate::config::RenderOptions;
use crate::plan_cache::{NoCache, PlanCache};
use crate::progress::{NullObserver, ProgressObserver, ProgressPublisher};
use crate::renderer::{ChunkContext, ChunkRenderError, ChunkRenderer};
use crate::strategy::{select_plan, ChunkStrategy, ExecutionMode, OptimizerTier, RenderPlan};

/// Fatal error taxonomy per the error-handling design's error taxonomy:
/// everything else (parse warnings, transform skips, single-chunk render
/// errors) is recoverable and travels in [`RenderMetrics`] instead.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("invalid input: {0}")]
    InputError(String),
    #[error("consumer error: {0}")]
    ConsumerError(String),
    #[error("render cancelled")]
    Cancelled,
    #[error("memory exhausted: estimate {estimate} exceeds hard ceiling {ceiling}")]
    MemoryExhausted { estimate: u64, ceiling: u64 },
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Per-chunk error surfaced to the consumer through [`ChunkMeta::error`]; it
/// never bubbles as a [`RenderError`] on its own.
#[derive(Debug, Clone)]
pub struct ChunkErrorInfo {
    pub message: String,
    pub source_chunk: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub index: usize,
    pub total: usize,
    pub is_first: bool,
    pub is_last: bool,
    pub progress_percent: u8,
    pub render_time_ms: u64,
    pub error: Option<ChunkErrorInfo>,
}

/// Recoverable conditions counted across a render, returned alongside the
/// final output rather than raised as errors.
#[derive(Debug, Clone, Default)]
pub struct RenderMetrics {
    pub parse_warnings: usize,
    pub transform_skips: usize,
    pub chunk_render_errors: usize,
    pub peak_memory_estimate: u64,
    pub elapsed: Duration,
    /// `true` if the reactive memory policy degraded concurrency mid-render
    /// (the running estimate crossed `memory_limit`).
    pub aggressive_mode_triggered: bool,
}

/// A cheaply-cloneable handle that can cancel an in-flight render from
/// another task. Once set, no further CR work is dispatched, in-flight
/// results are discarded, and `on_chunk` is not called again.
#[derive(Clone)]
pub struct CancellationHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer port. `render_streaming` awaits this once per chunk, in document
/// order, before picking up the next chunk's work.
#[async_trait::async_trait]
pub trait ChunkSink: Send + Sync {
    async fn on_chunk(&self, bytes: Vec<u8>, meta: ChunkMeta) -> Result<(), String>;
}

/// Adapts a plain async closure into a [`ChunkSink`] so callers don't need
/// to hand-write a trait impl for the common case.
pub struct FnSink<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> ChunkSink for FnSink<F>
where
    F: Fn(Vec<u8>, ChunkMeta) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), String>> + Send,
{
    async fn on_chunk(&self, bytes: Vec<u8>, meta: ChunkMeta) -> Result<(), String> {
        (self.0)(bytes, meta).await
    }
}

/// Orchestrates TA -> SS -> ECO -> CH -> CR. One instance drives one render
/// at a time: it is not `Sync` over concurrent `render*` calls, matching the
/// concurrency model's single-threaded-cooperative driver level.
pub struct StreamingDriver<C: PlanCache = NoCache> {
    options: RenderOptions,
    renderer: Arc<ChunkRenderer>,
    plan_cache: C,
    progress: Arc<dyn ProgressObserver>,
}

/// Voluntary yield cadence: after every K completed chunks, let the host
/// reclaim memory (concurrency model's suspension points).
const YIELD_EVERY: usize = 5;

/// Runs one chunk render on the blocking pool under `deadline`. CR is
/// synchronous CPU work, so enforcing a deadline needs `spawn_blocking` +
/// `timeout` rather than racing against the render call directly — a
/// render that never yields would otherwise never notice it ran over.
async fn render_with_deadline(
    renderer: Arc<ChunkRenderer>,
    html: String,
    data: serde_json::Value,
    ctx: ChunkContext,
    deadline: Duration,
) -> Result<String, ChunkRenderError> {
    let task = tokio::task::spawn_blocking(move || renderer.render(&html, &data, &ctx));
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(_join_error)) => Err(ChunkRenderError::Timeout),
        Err(_elapsed) => Err(ChunkRenderError::Timeout),
    }
}

impl StreamingDriver<NoCache> {
    pub fn new(options: RenderOptions) -> Self {
        Self { options, renderer: Arc::new(ChunkRenderer::new()), plan_cache: NoCache, progress: Arc::new(NullObserver) }
    }
}

impl<C: PlanCache> StreamingDriver<C> {
    pub fn with_cache(options: RenderOptions, plan_cache: C) -> Self {
        Self { options, renderer: Arc::new(ChunkRenderer::new()), plan_cache, progress: Arc::new(NullObserver) }
    }

    /// Subscribes `observer` to this driver's progress events (spec's
    /// progress-events interface). Optional: a driver that never calls this
    /// pays nothing beyond the no-op [`NullObserver`].
    pub fn with_progress_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = observer;
        self
    }

    /// True iff `template` exceeds `enhanced_threshold` or is structurally
    /// an HTML document over `streaming_threshold / 5`.
    pub fn is_streamable(&self, template: &str) -> bool {
        let hm = HtmlModel::parse(template);
        let analysis = analyze(&hm, template.as_bytes(), ComplexityWeights::default());
        analysis.byte_size_kb > self.options.enhanced_threshold_kb
            || (hm.has_body() && analysis.byte_size_kb > self.options.streaming_threshold_kb / 5.0)
    }

    /// Runs TA -> SS -> ECO and produces the chunk sequence plus the bits of
    /// [`RenderMetrics`] collected before any chunk is rendered.
    fn prepare(&self, template: &[u8]) -> RenderResult<(Vec<Chunk>, RenderPlan, usize, u64)> {
        if template.is_empty() {
            return Err(RenderError::InputError("input is empty".to_string()));
        }
        let text = std::str::from_utf8(template).map_err(|e| RenderError::InputError(e.to_string()))?;

        let hm = HtmlModel::parse(text);
        let mut hm = hm;
        let analysis: Analysis = analyze(&hm, template, ComplexityWeights::default());

        let content_hash = {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            template.hash(&mut hasher);
            hasher.finish()
        };

        let plan = match self.plan_cache.lookup(content_hash) {
            Some(cached) => cached,
            None => {
                let computed = select_plan(&analysis, &self.options);
                self.plan_cache.record(content_hash, computed.clone());
                computed
            }
        };

        let registry = match plan.optimizer_tier {
            OptimizerTier::None => Vec::new(),
            OptimizerTier::Basic => basic_registry(OptimizerConfig::default(), self.options.viewport_analysis),
            OptimizerTier::Advanced => advanced_registry(OptimizerConfig::default(), self.options.viewport_analysis),
        };
        let report = optimize(&mut hm, &analysis, &registry);
        let transform_skips = report.outcomes.iter().filter(|o| o.skipped.is_some()).count();

        let strategy = match plan.chunk_strategy {
            ChunkStrategy::Size => HtmlChunkStrategy::Size,
            ChunkStrategy::Section => HtmlChunkStrategy::Section,
            ChunkStrategy::Dom => HtmlChunkStrategy::Dom,
        };
        let chunks = chunk_html(&hm, strategy, plan.chunk_target_size);

        Ok((chunks, plan, transform_skips, content_hash))
    }

    /// Renders one chunk and builds its `(bytes, meta)` pair. Never fails:
    /// a template error (including an expired deadline) becomes a
    /// placeholder comment and an incremented `chunk_render_errors` counter,
    /// per the CR failure semantics.
    async fn finalize(
        renderer: &Arc<ChunkRenderer>,
        chunk: &Chunk,
        data: &serde_json::Value,
        timeout: Duration,
        metrics: &mut RenderMetrics,
    ) -> (Vec<u8>, ChunkMeta) {
        let started = Instant::now();
        let ctx = ChunkContext {
            chunk_index: chunk.index,
            total_chunks: chunk.total,
            is_first_chunk: chunk.is_first,
            is_last_chunk: chunk.is_last,
        };
        let result = render_with_deadline(Arc::clone(renderer), chunk.html.clone(), data.clone(), ctx, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let percent = if chunk.is_last { 100 } else { (((chunk.index + 1) * 100) / chunk.total.max(1)) as u8 };

        match result {
            Ok(html) => (
                html.into_bytes(),
                ChunkMeta {
                    index: chunk.index,
                    total: chunk.total,
                    is_first: chunk.is_first,
                    is_last: chunk.is_last,
                    progress_percent: percent,
                    render_time_ms: elapsed_ms,
                    error: None,
                },
            ),
            Err(err) => {
                metrics.chunk_render_errors += 1;
                let message = err.to_string();
                tracing::warn!(chunk = chunk.index, error = %message, "chunk render error");
                let comment = format!("<!-- render error: chunk {}: {message} -->", chunk.index);
                (
                    comment.into_bytes(),
                    ChunkMeta {
                        index: chunk.index,
                        total: chunk.total,
                        is_first: chunk.is_first,
                        is_last: chunk.is_last,
                        progress_percent: percent,
                        render_time_ms: elapsed_ms,
                        error: Some(ChunkErrorInfo { message, source_chunk: chunk.index }),
                    },
                )
            }
        }
    }

    /// Invokes `on_chunk(rendered_bytes, meta)` for every chunk in order;
    /// returns once the last chunk has been acknowledged.
    pub async fn render_streaming<S: ChunkSink>(
        &self,
        template: &[u8],
        data: &serde_json::Value,
        sink: &S,
        cancellation: CancellationHandle,
    ) -> RenderResult<RenderMetrics> {
        let start = Instant::now();
        let (chunks, plan, transform_skips, content_hash) = self.prepare(template)?;
        tracing::info!(plan = ?plan, chunks = chunks.len(), "starting render");

        let backpressure = BackpressureController::new(plan.max_in_flight, self.options.memory_limit);
        let publisher = ProgressPublisher::new(self.progress.as_ref(), chunks.len());
        let mut metrics = RenderMetrics {
            parse_warnings: 0,
            transform_skips,
            chunk_render_errors: 0,
            peak_memory_estimate: 0,
            elapsed: Duration::default(),
            aggressive_mode_triggered: false,
        };

        let result = match plan.execution_mode {
            ExecutionMode::Sequential => {
                self.run_sequential(chunks, data, sink, &cancellation, &backpressure, &publisher, content_hash, &mut metrics).await
            }
            ExecutionMode::BoundedParallel => {
                self.run_bounded_parallel(chunks, plan.max_in_flight, data, sink, &cancellation, &backpressure, &publisher, content_hash, &mut metrics).await
            }
        };

        metrics.elapsed = start.elapsed();
        metrics.peak_memory_estimate = metrics.peak_memory_estimate.max(backpressure.current_estimate());

        match result {
            Ok(()) => Ok(metrics),
            Err(err) => {
                match &err {
                    RenderError::Cancelled => tracing::error!("render cancelled"),
                    RenderError::ConsumerError(m) => tracing::error!(error = %m, "consumer error"),
                    RenderError::MemoryExhausted { estimate, ceiling } => {
                        tracing::error!(estimate, ceiling, "memory exhausted")
                    }
                    RenderError::InputError(_) => {}
                }
                Err(err)
            }
        }
    }

    /// Checks the reactive memory policy once per completed chunk: the first
    /// time the running estimate crosses `memory_limit` mid-render,
    /// concurrency degrades to one in-flight chunk and the cached plan for
    /// this content is cleared, for the remainder of this render only.
    fn maybe_degrade(&self, backpressure: &BackpressureController, content_hash: u64, metrics: &mut RenderMetrics) {
        if metrics.aggressive_mode_triggered || !backpressure.is_soft_exceeded() {
            return;
        }
        metrics.aggressive_mode_triggered = true;
        backpressure.degrade_to_sequential();
        self.plan_cache.invalidate(content_hash);
        tracing::warn!(estimate = backpressure.current_estimate(), limit = self.options.memory_limit, "soft memory limit exceeded; degrading to sequential");
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_sequential<S: ChunkSink>(
        &self,
        chunks: Vec<Chunk>,
        data: &serde_json::Value,
        sink: &S,
        cancellation: &CancellationHandle,
        backpressure: &BackpressureController,
        publisher: &ProgressPublisher<'_>,
        content_hash: u64,
        metrics: &mut RenderMetrics,
    ) -> RenderResult<()> {
        for (completed, chunk) in chunks.into_iter().enumerate() {
            if cancellation.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            let _permit = backpressure.acquire().await;
            let index = chunk.index;
            let (bytes, meta) = Self::finalize(&self.renderer, &chunk, data, self.options.chunk_timeout(), metrics).await;
            let estimate = backpressure.add_estimate(bytes.len() as u64);
            metrics.peak_memory_estimate = metrics.peak_memory_estimate.max(estimate);
            if backpressure.is_hard_exhausted() {
                return Err(RenderError::MemoryExhausted { estimate, ceiling: self.options.memory_limit.saturating_mul(2) });
            }
            self.maybe_degrade(backpressure, content_hash, metrics);
            let byte_len = bytes.len() as u64;
            sink.on_chunk(bytes, meta).await.map_err(RenderError::ConsumerError)?;
            backpressure.sub_estimate(byte_len);
            publisher.publish(index);

            if (completed + 1) % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_bounded_parallel<S: ChunkSink>(
        &self,
        chunks: Vec<Chunk>,
        max_in_flight: usize,
        data: &serde_json::Value,
        sink: &S,
        cancellation: &CancellationHandle,
        backpressure: &BackpressureController,
        publisher: &ProgressPublisher<'_>,
        content_hash: u64,
        metrics: &mut RenderMetrics,
    ) -> RenderResult<()> {
        let total = chunks.len();
        if total == 0 {
            return Ok(());
        }
        let max_in_flight = max_in_flight.max(1);
        let queue_capacity = (max_in_flight * 2).max(1);
        let (tx, mut rx) = mpsc::channel::<Chunk>(queue_capacity);

        let dispatch_cancellation = cancellation.clone();
        let dispatch_chunks = chunks;
        let dispatcher = tokio::spawn(async move {
            for chunk in dispatch_chunks {
                if dispatch_cancellation.is_cancelled() {
                    break;
                }
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        let mut workers = Vec::with_capacity(total);
        let worker_cancellation = cancellation.clone();
        let timeout = self.options.chunk_timeout();
        while let Some(chunk) = rx.recv().await {
            if worker_cancellation.is_cancelled() {
                break;
            }
            let renderer = Arc::clone(&self.renderer);
            let data = data.clone();
            let backpressure = backpressure.clone();
            workers.push(tokio::spawn(async move {
                // Held for the lifetime of this task, so `max_in_flight`
                // bounds actual concurrent CR invocations rather than just
                // the dispatch queue's depth.
                let _permit = backpressure.acquire().await;
                let started = Instant::now();
                let ctx = ChunkContext {
                    chunk_index: chunk.index,
                    total_chunks: chunk.total,
                    is_first_chunk: chunk.is_first,
                    is_last_chunk: chunk.is_last,
                };
                let result = render_with_deadline(renderer, chunk.html.clone(), data, ctx, timeout).await;
                (chunk, result, started.elapsed())
            }));
        }
        dispatcher.abort();

        let mut pending: HashMap<usize, (Chunk, Result<String, ChunkRenderError>, Duration)> = HashMap::new();
        for worker in workers {
            if let Ok((chunk, result, elapsed)) = worker.await {
                pending.insert(chunk.index, (chunk, result, elapsed));
            }
        }

        for next_index in 0..total {
            if cancellation.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            let Some((chunk, result, elapsed)) = pending.remove(&next_index) else {
                // A worker never reported in (panicked or was aborted); treat
                // as cancellation rather than silently truncating output.
                return Err(RenderError::Cancelled);
            };
            let percent = if chunk.is_last { 100 } else { (((chunk.index + 1) * 100) / chunk.total.max(1)) as u8 };
            let (bytes, meta) = match result {
                Ok(html) => (
                    html.into_bytes(),
                    ChunkMeta {
                        index: chunk.index,
                        total: chunk.total,
                        is_first: chunk.is_first,
                        is_last: chunk.is_last,
                        progress_percent: percent,
                        render_time_ms: elapsed.as_millis() as u64,
                        error: None,
                    },
                ),
                Err(err) => {
                    metrics.chunk_render_errors += 1;
                    let message = err.to_string();
                    tracing::warn!(chunk = chunk.index, error = %message, "chunk render error");
                    let comment = format!("<!-- render error: chunk {}: {message} -->", chunk.index);
                    (
                        comment.into_bytes(),
                        ChunkMeta {
                            index: chunk.index,
                            total: chunk.total,
                            is_first: chunk.is_first,
                            is_last: chunk.is_last,
                            progress_percent: percent,
                            render_time_ms: elapsed.as_millis() as u64,
                            error: Some(ChunkErrorInfo { message, source_chunk: chunk.index }),
                        },
                    )
                }
            };

            let estimate = backpressure.add_estimate(bytes.len() as u64);
            metrics.peak_memory_estimate = metrics.peak_memory_estimate.max(estimate);
            if backpressure.is_hard_exhausted() {
                return Err(RenderError::MemoryExhausted { estimate, ceiling: self.options.memory_limit.saturating_mul(2) });
            }
            self.maybe_degrade(backpressure, content_hash, metrics);
            let byte_len = bytes.len() as u64;
            sink.on_chunk(bytes, meta).await.map_err(RenderError::ConsumerError)?;
            backpressure.sub_estimate(byte_len);
            publisher.publish(next_index);

            if (next_index + 1) % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    /// Returns the concatenated result; intended for small/medium inputs.
    pub async fn render(&self, template: &[u8], data: &serde_json::Value) -> RenderResult<(Vec<u8>, RenderMetrics)> {
        struct CollectSink(std::sync::Mutex<Vec<u8>>);

        #[async_trait::async_trait]
        impl ChunkSink for CollectSink {
            async fn on_chunk(&self, bytes: Vec<u8>, _meta: ChunkMeta) -> Result<(), String> {
                self.0.lock().expect("collect sink lock poisoned").extend_from_slice(&bytes);
                Ok(())
            }
        }

        let sink = CollectSink(std::sync::Mutex::new(Vec::new()));
        let metrics = self.render_streaming(template, data, &sink, CancellationHandle::new()).await?;
        let bytes = sink.0.into_inner().expect("collect sink lock poisoned");
        Ok((bytes, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        calls: Mutex<Vec<ChunkMeta>>,
        fail_on: Option<usize>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()), fail_on: None }
        }

        fn failing_on(index: usize) -> Self {
            Self { calls: Mutex::new(Vec::new()), fail_on: Some(index) }
        }
    }

    #[async_trait::async_trait]
    impl ChunkSink for RecordingSink {
        async fn on_chunk(&self, _bytes: Vec<u8>, meta: ChunkMeta) -> Result<(), String> {
            let call_index = { let mut calls = self.calls.lock().unwrap(); calls.push(meta.clone()); calls.len() - 1 };
            if self.fail_on == Some(call_index) {
                return Err("boom".to_string());
            }
            Ok(())
        }
    }

    fn small_doc() -> &'static [u8] {
        b"<!doctype html><html><head><title>T</title></head><body><p>hi</p></body></html>"
    }

    #[tokio::test]
    async fn small_document_yields_one_chunk_at_100_percent() {
        let driver = StreamingDriver::new(RenderOptions::default());
        let sink = RecordingSink::new();
        driver.render_streaming(small_doc(), &serde_json::json!({}), &sink, CancellationHandle::new()).await.unwrap();
        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_first && calls[0].is_last);
        assert_eq!(calls[0].progress_percent, 100);
    }

    #[tokio::test]
    async fn empty_input_is_an_input_error() {
        let driver = StreamingDriver::new(RenderOptions::default());
        let sink = RecordingSink::new();
        let err = driver.render_streaming(b"", &serde_json::json!({}), &sink, CancellationHandle::new()).await.unwrap_err();
        assert!(matches!(err, RenderError::InputError(_)));
    }

    #[tokio::test]
    async fn render_concatenates_chunks() {
        let driver = StreamingDriver::new(RenderOptions::default());
        let (bytes, metrics) = driver.render(small_doc(), &serde_json::json!({})).await.unwrap();
        let out = String::from_utf8(bytes).unwrap();
        assert!(out.contains("hi"));
        assert_eq!(metrics.chunk_render_errors, 0);
    }

    #[tokio::test]
    async fn consumer_failure_is_fatal_and_stops_further_calls() {
        let mut src = String::from("<html><body>");
        for i in 0..5 {
            src.push_str(&format!("<section id=\"s{i}\">{}</section>", "x".repeat(2048)));
        }
        src.push_str("</body></html>");

        let mut options = RenderOptions::default();
        options.enhanced_threshold_kb = 0.0;
        options.streaming_threshold_kb = 0.0;
        options.chunk_target_size = 1024;
        let driver = StreamingDriver::new(options);
        let sink = RecordingSink::failing_on(2);

        let err = driver.render_streaming(src.as_bytes(), &serde_json::json!({}), &sink, CancellationHandle::new()).await.unwrap_err();
        assert!(matches!(err, RenderError::ConsumerError(_)));
        assert_eq!(sink.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_stops_sequential_run() {
        let mut src = String::from("<html><body>");
        for i in 0..5 {
            src.push_str(&format!("<section id=\"s{i}\">{}</section>", "x".repeat(2048)));
        }
        src.push_str("</body></html>");

        let mut options = RenderOptions::default();
        options.enhanced_threshold_kb = 0.0;
        options.streaming_threshold_kb = 0.0;
        options.chunk_target_size = 1024;
        let driver = StreamingDriver::new(options);
        let sink = RecordingSink::new();
        let cancellation = CancellationHandle::new();
        cancellation.cancel();

        let err = driver.render_streaming(src.as_bytes(), &serde_json::json!({}), &sink, cancellation).await.unwrap_err();
        assert!(matches!(err, RenderError::Cancelled));
        assert_eq!(sink.calls.lock().unwrap().len(), 0);
    }

    #[test]
    fn is_streamable_reflects_thresholds() {
        let mut options = RenderOptions::default();
        options.enhanced_threshold_kb = 0.01;
        let driver = StreamingDriver::new(options);
        assert!(driver.is_streamable(std::str::from_utf8(small_doc()).unwrap()));
    }

    /// Bounded-parallel execution still has to deliver chunks in ascending
    /// document order, no matter how the permits interleave the underlying
    /// tasks.
    #[tokio::test]
    async fn bounded_parallel_preserves_chunk_order() {
        let mut src = String::from("<html><body>");
        for i in 0..12 {
            src.push_str(&format!("<section id=\"s{i}\">{}</section>", "x".repeat(4096)));
        }
        src.push_str("</body></html>");

        let mut options = RenderOptions::default();
        options.enhanced_threshold_kb = 0.0;
        options.streaming_threshold_kb = 0.0;
        options.chunk_target_size = 2048;
        options.max_in_flight = 3;
        let driver = StreamingDriver::new(options);
        let sink = RecordingSink::new();

        driver.render_streaming(src.as_bytes(), &serde_json::json!({}), &sink, CancellationHandle::new()).await.unwrap();

        let calls = sink.calls.lock().unwrap();
        assert!(calls.len() > 1);
        for (i, meta) in calls.iter().enumerate() {
            assert_eq!(meta.index, i);
        }
    }

    #[tokio::test]
    async fn chunk_exceeding_its_deadline_counts_as_a_chunk_render_error() {
        let mut src = String::from("<html><body>");
        for i in 0..2000 {
            src.push_str(&format!("<p id=\"p{i}\">{}</p>", "x".repeat(200)));
        }
        src.push_str("</body></html>");

        let mut options = RenderOptions::default();
        options.chunk_timeout_ms = 1;
        let driver = StreamingDriver::new(options);
        let (_bytes, metrics) = driver.render(src.as_bytes(), &serde_json::json!({})).await.unwrap();
        assert_eq!(metrics.chunk_render_errors, 1);
    }

    #[derive(Default)]
    struct RecordingObserver(Mutex<Vec<crate::progress::ProgressEvent>>);

    impl crate::progress::ProgressObserver for RecordingObserver {
        fn on_progress(&self, event: crate::progress::ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn registered_progress_observer_sees_one_event_per_chunk() {
        let mut src = String::from("<html><body>");
        for i in 0..4 {
            src.push_str(&format!("<section id=\"s{i}\">{}</section>", "x".repeat(2048)));
        }
        src.push_str("</body></html>");

        let mut options = RenderOptions::default();
        options.enhanced_threshold_kb = 0.0;
        options.streaming_threshold_kb = 0.0;
        options.chunk_target_size = 1024;
        let observer = Arc::new(RecordingObserver::default());
        let driver = StreamingDriver::new(options).with_progress_observer(observer.clone());
        let sink = RecordingSink::new();

        driver.render_streaming(src.as_bytes(), &serde_json::json!({}), &sink, CancellationHandle::new()).await.unwrap();

        let events = observer.0.lock().unwrap();
        assert_eq!(events.len(), sink.calls.lock().unwrap().len());
        assert_eq!(events.last().unwrap().percent, 100);
    }

    #[tokio::test]
    async fn crossing_the_soft_memory_limit_marks_aggressive_mode_triggered() {
        let mut src = String::from("<html><body>");
        for i in 0..5 {
            src.push_str(&format!("<section id=\"s{i}\">{}</section>", "x".repeat(4096)));
        }
        src.push_str("</body></html>");

        let mut options = RenderOptions::default();
        options.enhanced_threshold_kb = 0.0;
        options.streaming_threshold_kb = 0.0;
        options.chunk_target_size = 2048;
        options.memory_limit = 3000;
        let driver = StreamingDriver::new(options);

        let (_bytes, metrics) = driver.render(src.as_bytes(), &serde_json::json!({})).await.unwrap();
        assert!(metrics.aggressive_mode_triggered);
    }
}
