//! `PlanCache`: the cross-run adaptivity hook from Design Notes §9 ("Shared
//! caches / learning state"), modeled as an explicit, deterministic
//! lookup/record memo rather than the source's global weight mutation.
//!
//! `NoCache` is the default, zero-sized mode; `InMemoryPlanCache` is the
//! opt-in mode for processes that want to skip re-selecting a plan for
//! identical content, shaped like the teacher's `Arc<RwLock<HashMap<..>>>`
//! maps in `progress.rs`/`backpressure.rs`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::strategy::RenderPlan;

pub trait PlanCache: Send + Sync {
    fn lookup(&self, content_hash: u64) -> Option<RenderPlan>;
    fn record(&self, content_hash: u64, plan: RenderPlan);

    /// Drops any cached plan for `content_hash`. Called when a render
    /// reactively degrades mid-run (memory policy's "clear transient
    /// caches"), so a later render of the same content re-selects a plan
    /// instead of reusing one that predates the degradation.
    fn invalidate(&self, content_hash: u64);
}

/// Default cache: always misses, never stores. No adaptivity.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl PlanCache for NoCache {
    fn lookup(&self, _content_hash: u64) -> Option<RenderPlan> {
        None
    }

    fn record(&self, _content_hash: u64, _plan: RenderPlan) {}

    fn invalidate(&self, _content_hash: u64) {}
}

/// Process-lifetime memo keyed by content hash.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPlanCache {
    plans: Arc<RwLock<HashMap<u64, RenderPlan>>>,
}

impl InMemoryPlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.plans.read().expect("plan cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlanCache for InMemoryPlanCache {
    fn lookup(&self, content_hash: u64) -> Option<RenderPlan> {
        self.plans
            .read()
            .expect("plan cache lock poisoned")
            .get(&content_hash)
            .cloned()
    }

    fn record(&self, content_hash: u64, plan: RenderPlan) {
        self.plans
            .write()
            .expect("plan cache lock poisoned")
            .insert(content_hash, plan);
    }

    fn invalidate(&self, content_hash: u64) {
        self.plans.write().expect("plan cache lock poisoned").remove(&content_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderOptions;
    use crate::strategy::select_plan;
    use adaptive_html::analyzer::Analysis;

    fn sample_plan() -> RenderPlan {
        let analysis = Analysis {
            byte_size_kb: 10.0,
            element_count: 1,
            max_depth: 1,
            edge_cases: vec![],
            complexity: 1.0,
        };
        select_plan(&analysis, &RenderOptions::default())
    }

    #[test]
    fn no_cache_always_misses() {
        let cache = NoCache;
        cache.record(1, sample_plan());
        assert!(cache.lookup(1).is_none());
    }

    #[test]
    fn in_memory_cache_round_trips() {
        let cache = InMemoryPlanCache::new();
        assert!(cache.lookup(42).is_none());
        cache.record(42, sample_plan());
        assert!(cache.lookup(42).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_drops_the_cached_plan() {
        let cache = InMemoryPlanCache::new();
        cache.record(7, sample_plan());
        cache.invalidate(7);
        assert!(cache.lookup(7).is_none());
        assert!(cache.is_empty());
    }
}
