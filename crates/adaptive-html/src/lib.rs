//! Tolerant HTML model, single-pass analyzer, edge-case optimizer, and
//! chunker for the adaptive streaming renderer.
//!
//! This crate is pure and synchronous: no I/O, no async runtime. The
//! orchestration across these pieces (plan selection, chunk rendering,
//! streaming, cancellation) lives one layer up in `adaptive-streaming`.

pub mod analyzer;
pub mod chunker;
pub mod html_model;
pub mod optimizer;

pub use analyzer::{analyze, Analysis, ComplexityWeights, EdgeCase, EdgeCaseKind};
pub use chunker::{chunk, Chunk, ChunkStrategy};
pub use html_model::{Annotations, HtmlModel, MutationOutcome, Viewport};
pub use optimizer::{optimize, OptimizerConfig, OptimizerReport, Transform, TransformOutcome, TransformSkipped};

/// HM/TA/ECO/CH are total functions: this crate has no parse-failure path.
/// `SelectorError` exists only for the (crate-internal) `Selector::parse`
/// calls so that guarantee is enforced in the type, not by convention.
#[derive(Debug, thiserror::Error)]
pub enum HtmlError {
    #[error("invalid selector: {0}")]
    SelectorError(String),
}

pub type HtmlResult<T> = Result<T, HtmlError>;
