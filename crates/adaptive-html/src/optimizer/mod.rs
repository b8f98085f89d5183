//! Edge-Case Optimizer (ECO): a pipeline of named transforms that rewrite an
//! [`HtmlModel`] in place to reduce downstream rendering cost.
//!
//! Transforms are modeled as values implementing [`Transform`] rather than
//! `this`-captured methods (Design Notes: replace registered class methods
//! with a capability collected into an ordered registry) — mirrors the
//! teacher's `chunking::create_strategy` dispatch-by-enum idiom, here as a
//! dispatch-by-tier registry of boxed trait objects.

mod transforms;

pub use transforms::{
    runtime_script, CollapseDeepSubtree, ContainLayoutTriggers, DeferModals, HoistRedundant,
    LimitRecursion, PrioritizeViewport, ShrinkCss, SimplifyHeavyParent, SimplifyNestedTables,
    SplitHeavyGrid,
};

use crate::analyzer::Analysis;
use crate::html_model::HtmlModel;

/// A local patch a single transform produced against the model.
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub name: &'static str,
    pub applied: bool,
    pub nodes_touched: usize,
    pub bytes_saved: i64,
    pub skipped: Option<TransformSkipped>,
}

/// Recorded when a transform stopped early — never surfaced as a failure.
#[derive(Debug, Clone)]
pub struct TransformSkipped {
    pub transform: &'static str,
    pub reason: String,
}

/// Tunables shared by every transform: node caps and layout estimates. Values
/// come from `RenderOptions` in the crate above this one; this crate only
/// defines the shape so it stays free of that crate's configuration type.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    /// A transform that would touch more nodes than this stops early and
    /// reports a partial result (default cap: 20).
    pub max_nodes_per_transform: usize,
    pub nominal_viewport_height_px: u32,
    pub element_height_estimate_px: u32,
    pub heavy_grid_visible_rows: usize,
    pub heavy_parent_visible_children: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_nodes_per_transform: 20,
            nominal_viewport_height_px: 900,
            element_height_estimate_px: 60,
            heavy_grid_visible_rows: 20,
            heavy_parent_visible_children: 50,
        }
    }
}

/// A single named, local rewrite of the model.
///
/// Each transform is pure over `HtmlModel` in the sense that it only reads
/// `analysis` (never mutates it) and reports what it did; it never fails —
/// unexpected structure produces a `skipped` outcome, not an error.
pub trait Transform {
    fn name(&self) -> &'static str;
    fn applies(&self, analysis: &Analysis) -> bool;
    fn apply(&self, hm: &mut HtmlModel, analysis: &Analysis) -> TransformOutcome;
}

/// Registry for the `basic` optimizer tier: structural rewrites that are
/// always safe regardless of the consumer's runtime-script support.
/// `prioritize-viewport` runs whenever `viewport_analysis` is on regardless
/// of tier — it's a read-and-annotate pass, not a structural rewrite, so it
/// carries none of the cost the tier gate exists to bound.
pub fn basic_registry(config: OptimizerConfig, viewport_analysis: bool) -> Vec<Box<dyn Transform>> {
    let mut registry = vec![
        Box::new(SimplifyNestedTables { config }) as Box<dyn Transform>,
        Box::new(CollapseDeepSubtree { config }),
        Box::new(HoistRedundant { config }),
        Box::new(ContainLayoutTriggers { config }),
        Box::new(SplitHeavyGrid { config }),
        Box::new(DeferModals { config }),
        Box::new(SimplifyHeavyParent { config }),
        Box::new(ShrinkCss { config }),
    ];
    if viewport_analysis {
        registry.push(Box::new(PrioritizeViewport { config }));
    }
    registry
}

/// Registry for the `advanced` tier: everything in `basic`, plus the
/// transforms that depend on the bundled runtime script and the more
/// invasive recursive-template collapse.
pub fn advanced_registry(config: OptimizerConfig, viewport_analysis: bool) -> Vec<Box<dyn Transform>> {
    let mut registry = basic_registry(config, viewport_analysis);
    registry.push(Box::new(LimitRecursion { config }));
    registry
}

/// Aggregate metrics across a full optimizer pass.
#[derive(Debug, Clone, Default)]
pub struct OptimizerReport {
    pub outcomes: Vec<TransformOutcome>,
    pub total_nodes_touched: usize,
    pub total_bytes_saved: i64,
}

/// Runs `registry` over `hm` in order; each transform sees the model as left
/// by the previous one. Always succeeds.
pub fn optimize(hm: &mut HtmlModel, analysis: &Analysis, registry: &[Box<dyn Transform>]) -> OptimizerReport {
    let mut report = OptimizerReport::default();
    for transform in registry {
        if !transform.applies(analysis) {
            continue;
        }
        let outcome = transform.apply(hm, analysis);
        report.total_nodes_touched += outcome.nodes_touched;
        report.total_bytes_saved += outcome.bytes_saved;
        if outcome.applied {
            tracing::debug!(transform = outcome.name, nodes = outcome.nodes_touched, "transform applied");
        }
        report.outcomes.push(outcome);
    }
    report
}
