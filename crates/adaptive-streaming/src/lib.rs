//! Strategy selection, edge-case-aware chunk rendering and the
//! bounded-memory streaming driver for the adaptive streaming renderer.
//!
//! This crate owns everything above the pure, synchronous `adaptive-html`
//! crate: picking a [`strategy::RenderPlan`] for an analyzed template,
//! rendering chunks through `handlebars`, and driving a consumer callback
//! under bounded concurrency and memory.

pub mod backpressure;
pub mod config;
pub mod driver;
pub mod plan_cache;
pub mod progress;
pub mod renderer;
pub mod strategy;

pub use config::{ChunkStrategyOption, RenderOptions};
pub use driver::{
    CancellationHandle, ChunkErrorInfo, ChunkMeta, ChunkSink, FnSink, RenderError, RenderMetrics,
    RenderResult, StreamingDriver,
};
pub use plan_cache::{InMemoryPlanCache, NoCache, PlanCache};
pub use progress::{NullObserver, ProgressEvent, ProgressObserver, ProgressPublisher};
pub use renderer::{ChunkContext, ChunkRenderError, ChunkRenderer};
pub use strategy::{select_plan, ChunkStrategy, ExecutionMode, Justification, OptimizerTier, RenderPlan};
