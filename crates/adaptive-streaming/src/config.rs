//! Render configuration.
//!
//! `RenderOptions` is the single configuration surface for a render: no file
//! or environment loading lives in this crate (the CLI/server layer that
//! would wire those in is out of scope here), just a `serde`-deserializable
//! struct with a sensible `Default`, the same shape as the teacher's
//! `BackpressureConfig`.

use serde::{Deserialize, Serialize};

/// Which chunker strategy to use. `Auto` lets the strategy selector pick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategyOption {
    Size,
    Section,
    Dom,
    #[default]
    Auto,
}

/// Configuration recognized by the strategy selector and the streaming
/// driver. See the module-level docs for the provenance of each default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Target upper bound per chunk, in bytes.
    pub chunk_target_size: usize,
    /// Output queue high-water mark, in bytes.
    pub buffer_bytes: usize,
    /// Maximum concurrent chunk-render invocations. `1` disables parallelism.
    pub max_in_flight: usize,
    /// Aggressive-mode trigger, in bytes.
    pub memory_limit: u64,
    /// Below this input size (KB), render sequentially with no chunking.
    pub enhanced_threshold_kb: f64,
    /// At or above this input size (KB), use bounded-parallel execution.
    pub streaming_threshold_kb: f64,
    /// Edge-case count at/above which the optimizer tier is promoted.
    pub edge_case_threshold: usize,
    /// Complexity score (0-100) at/above which the optimizer tier is promoted.
    pub complexity_threshold: f64,
    pub chunk_strategy: ChunkStrategyOption,
    /// Enables the `prioritize-viewport` transform.
    pub viewport_analysis: bool,
    /// Enables the advanced optimizer tier outright, bypassing the gates.
    pub advanced_optimization: bool,
    /// Per-chunk render deadline, in milliseconds. Exceeding it fails that
    /// chunk's render the same way a template error does; it never aborts
    /// the whole render.
    pub chunk_timeout_ms: u64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            chunk_target_size: 500 * 1024,
            buffer_bytes: 100 * 1024,
            max_in_flight: 2,
            memory_limit: 300 * 1024 * 1024,
            enhanced_threshold_kb: 100.0,
            streaming_threshold_kb: 1024.0,
            edge_case_threshold: 2,
            complexity_threshold: 60.0,
            chunk_strategy: ChunkStrategyOption::Auto,
            viewport_analysis: false,
            advanced_optimization: false,
            chunk_timeout_ms: 30_000,
        }
    }
}

impl RenderOptions {
    /// `true` once an input this large should always have been classified
    /// "aggressive" on prior evidence, independent of the current Analysis.
    pub fn aggressive_size_bytes(&self) -> u64 {
        5 * 1024 * 1024
    }

    pub fn chunk_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.chunk_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = RenderOptions::default();
        assert_eq!(opts.chunk_target_size, 500 * 1024);
        assert_eq!(opts.max_in_flight, 2);
        assert_eq!(opts.memory_limit, 300 * 1024 * 1024);
    }

    #[test]
    fn serde_round_trip() {
        let opts = RenderOptions::default();
        let json = serde_json::to_string(&opts).unwrap();
        let back: RenderOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chunk_target_size, opts.chunk_target_size);
    }
}
