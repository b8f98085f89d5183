//! Strategy Selector (SS): turns an [`Analysis`] into a [`RenderPlan`].
//!
//! No direct teacher selector exists for this rule chain; it's built the way
//! the teacher builds rule evaluators elsewhere — an early-return chain over
//! ordered checks with a trailing justification record, the same shape as
//! `BackpressureController::acquire`'s sequential check chain.

use adaptive_html::analyzer::Analysis;
use serde::{Deserialize, Serialize};

use crate::config::{ChunkStrategyOption, RenderOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    Size,
    Section,
    Dom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerTier {
    None,
    Basic,
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    BoundedParallel,
}

/// Named factor → numeric contribution, so a test can assert which factor
/// drove the decision (spec's "scored justification").
#[derive(Debug, Clone, Serialize)]
pub struct Justification {
    pub tier_name: &'static str,
    pub factors: Vec<(&'static str, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderPlan {
    pub chunk_strategy: ChunkStrategy,
    pub optimizer_tier: OptimizerTier,
    pub execution_mode: ExecutionMode,
    pub max_in_flight: usize,
    pub chunk_target_size: usize,
    pub buffer_bytes: usize,
    pub justification: Justification,
}

impl PartialEq for RenderPlan {
    fn eq(&self, other: &Self) -> bool {
        self.chunk_strategy == other.chunk_strategy
            && self.optimizer_tier == other.optimizer_tier
            && self.execution_mode == other.execution_mode
            && self.max_in_flight == other.max_in_flight
            && self.chunk_target_size == other.chunk_target_size
            && self.buffer_bytes == other.buffer_bytes
    }
}

/// Selects a plan for `analysis` under `options`. Pure and deterministic:
/// two equal `Analysis`es under equal `options` always produce equal plans
/// (Testable Property 8).
pub fn select_plan(analysis: &Analysis, options: &RenderOptions) -> RenderPlan {
    let mut factors: Vec<(&'static str, f64)> = Vec::new();
    let edge_case_count = analysis.edge_case_count();

    let (tier_name, execution_mode, mut chunk_strategy, mut optimizer_tier) =
        if analysis.byte_size_kb < options.enhanced_threshold_kb {
            factors.push(("size_below_enhanced_threshold", 1.0));
            (
                "progressive",
                ExecutionMode::Sequential,
                ChunkStrategy::Section,
                OptimizerTier::None,
            )
        } else if analysis.byte_size_kb < options.streaming_threshold_kb {
            factors.push(("size_below_streaming_threshold", 1.0));
            let tier = if edge_case_count >= options.edge_case_threshold {
                factors.push(("edge_case_count_at_threshold", edge_case_count as f64));
                OptimizerTier::Basic
            } else {
                OptimizerTier::None
            };
            ("enhanced", ExecutionMode::Sequential, ChunkStrategy::Section, tier)
        } else {
            factors.push(("size_at_streaming_threshold", 1.0));
            let tier = if analysis.complexity >= options.complexity_threshold
                || edge_case_count >= options.edge_case_threshold
            {
                factors.push(("complexity_or_edge_case_over_threshold", analysis.complexity));
                OptimizerTier::Advanced
            } else {
                OptimizerTier::Basic
            };
            ("streaming", ExecutionMode::BoundedParallel, ChunkStrategy::Section, tier)
        };

    // Rule 1's chunking-strategy override from RenderOptions, when not Auto.
    chunk_strategy = match options.chunk_strategy {
        ChunkStrategyOption::Auto => chunk_strategy,
        ChunkStrategyOption::Size => ChunkStrategy::Size,
        ChunkStrategyOption::Section => ChunkStrategy::Section,
        ChunkStrategyOption::Dom => ChunkStrategy::Dom,
    };

    // Rule 2: over-complexity override promotes the tier by one step
    // regardless of size bucket.
    if analysis.complexity >= options.complexity_threshold && optimizer_tier == OptimizerTier::None {
        factors.push(("over_complexity_override", analysis.complexity));
        optimizer_tier = OptimizerTier::Basic;
    } else if analysis.complexity >= options.complexity_threshold
        && optimizer_tier == OptimizerTier::Basic
        && edge_case_count >= options.edge_case_threshold
    {
        optimizer_tier = OptimizerTier::Advanced;
    }

    if options.advanced_optimization {
        optimizer_tier = OptimizerTier::Advanced;
    }

    let mut chunk_target_size = options.chunk_target_size;
    let mut buffer_bytes = options.buffer_bytes;
    let mut max_in_flight = match execution_mode {
        ExecutionMode::Sequential => 1,
        ExecutionMode::BoundedParallel => options.max_in_flight.max(1),
    };

    // Rule 3: aggressive mode halves the chunk/buffer bounds.
    let input_bytes = (analysis.byte_size_kb * 1024.0) as u64;
    if input_bytes > options.aggressive_size_bytes() {
        factors.push(("aggressive_mode_large_input", input_bytes as f64));
        chunk_target_size /= 2;
        buffer_bytes /= 2;
        max_in_flight = max_in_flight.max(1);
    }

    RenderPlan {
        chunk_strategy,
        optimizer_tier,
        execution_mode,
        max_in_flight,
        chunk_target_size,
        buffer_bytes,
        justification: Justification { tier_name, factors },
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use adaptive_html::analyzer::{Analysis, EdgeCase, EdgeCaseKind};

    fn analysis(byte_size_kb: f64, complexity: f64, edge_cases: Vec<EdgeCase>) -> Analysis {
        Analysis {
            byte_size_kb,
            element_count: 10,
            max_depth: 3,
            edge_cases,
            complexity,
        }
    }

    #[rstest]
    #[case::small_is_progressive(10.0, 5.0, vec![], OptimizerTier::None, ExecutionMode::Sequential, "progressive")]
    #[case::mid_with_edge_cases_is_basic(
        500.0,
        10.0,
        vec![
            EdgeCase { kind: EdgeCaseKind::NestedTables, count: 1, elements: vec![] },
            EdgeCase { kind: EdgeCaseKind::DeepDom, count: 1, elements: vec![] },
        ],
        OptimizerTier::Basic,
        ExecutionMode::Sequential,
        "enhanced"
    )]
    #[case::large_complex_is_streaming_advanced(
        2000.0,
        90.0,
        vec![],
        OptimizerTier::Advanced,
        ExecutionMode::BoundedParallel,
        "streaming"
    )]
    fn tier_selection(
        #[case] byte_size_kb: f64,
        #[case] complexity: f64,
        #[case] edge_cases: Vec<EdgeCase>,
        #[case] expected_tier: OptimizerTier,
        #[case] expected_mode: ExecutionMode,
        #[case] expected_tier_name: &str,
    ) {
        let a = analysis(byte_size_kb, complexity, edge_cases);
        let plan = select_plan(&a, &RenderOptions::default());
        assert_eq!(plan.optimizer_tier, expected_tier);
        assert_eq!(plan.execution_mode, expected_mode);
        assert_eq!(plan.justification.tier_name, expected_tier_name);
    }

    #[test]
    fn plan_selection_is_deterministic() {
        let a1 = analysis(700.0, 20.0, vec![]);
        let a2 = analysis(700.0, 20.0, vec![]);
        let opts = RenderOptions::default();
        assert_eq!(select_plan(&a1, &opts), select_plan(&a2, &opts));
    }

    #[test]
    fn aggressive_mode_halves_bounds() {
        let a = analysis(6000.0, 10.0, vec![]);
        let opts = RenderOptions::default();
        let plan = select_plan(&a, &opts);
        assert_eq!(plan.chunk_target_size, opts.chunk_target_size / 2);
        assert_eq!(plan.buffer_bytes, opts.buffer_bytes / 2);
    }
}
