//! Template Analyzer (TA): a single deterministic pass over an [`HtmlModel`]
//! producing an [`Analysis`].

use std::collections::{HashMap, HashSet};

use ego_tree::NodeId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::html_model::HtmlModel;

/// Closed set of structural patterns the analyzer recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCaseKind {
    NestedTables,
    DeepDom,
    LargeGrid,
    ComplexForm,
    MultipleModals,
    InfiniteScroll,
    HeavyScript,
    HeavyParent,
    RedundantElements,
    RecursiveTemplates,
    ShadowDom,
    LayoutTriggers,
    ForcedReflow,
    CssComplexity,
    NestedFlexboxes,
    ExcessiveGrids,
    Carousel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeCase {
    pub kind: EdgeCaseKind,
    pub count: usize,
    /// Node ids of matched elements (bounded; the analyzer never buffers
    /// more than the match count actually implies).
    #[serde(skip)]
    pub elements: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub byte_size_kb: f64,
    pub element_count: usize,
    pub max_depth: usize,
    pub edge_cases: Vec<EdgeCase>,
    pub complexity: f64,
}

impl Analysis {
    pub fn edge_case_count(&self) -> usize {
        self.edge_cases.iter().map(|e| e.count).sum()
    }

    pub fn has_kind(&self, kind: EdgeCaseKind) -> bool {
        self.edge_cases.iter().any(|e| e.kind == kind)
    }

    pub fn kind(&self, kind: EdgeCaseKind) -> Option<&EdgeCase> {
        self.edge_cases.iter().find(|e| e.kind == kind)
    }
}

/// Weights used to combine the raw measurements into the `complexity` scalar.
/// Lives in the selector's configuration, not in TA itself, per spec.
#[derive(Debug, Clone, Copy)]
pub struct ComplexityWeights {
    pub size: f64,
    pub elements: f64,
    pub edge_cases: f64,
    pub depth: f64,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            size: 0.3,
            elements: 0.3,
            edge_cases: 0.3,
            depth: 0.1,
        }
    }
}

const INTERACTIVE_TAGS: &[&str] = &["input", "select", "textarea", "button"];
const LAYOUT_CLASS_TOKENS: &[&str] = &["sticky", "fixed", "absolute", "fullwidth", "fullheight", "grid", "flex"];
const CAROUSEL_CLASS_TOKENS: &[&str] = &["carousel", "slider", "swiper"];
const INFINITE_SCROLL_TOKENS: &[&str] = &["infinite-scroll", "infinite", "lazy-load-container"];
const GRID_CLASS_TOKENS: &[&str] = &["grid"];

fn important_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!important").unwrap())
}

fn descendant_combinator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A selector with >= 4 whitespace-separated simple selectors roughly
    // approximates ">= 4 descendant combinators".
    RE.get_or_init(|| Regex::new(r"[.#a-zA-Z][^{},]*(\s+[.#a-zA-Z][^{},\s]*){3,}").unwrap())
}

fn vendor_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-(webkit|moz|ms|o)-").unwrap())
}

fn media_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@media").unwrap())
}

/// Runs the single analysis pass over `hm`. Deterministic for a fixed
/// `(source_bytes, weights)` pair.
pub fn analyze(hm: &HtmlModel, source_bytes: &[u8], weights: ComplexityWeights) -> Analysis {
    let Some(root) = hm.root() else {
        return Analysis {
            byte_size_kb: source_bytes.len() as f64 / 1024.0,
            element_count: 0,
            max_depth: 0,
            edge_cases: Vec::new(),
            complexity: 0.0,
        };
    };

    let mut element_count = 0usize;
    let mut max_depth = 0usize;

    let mut nested_tables: Vec<NodeId> = Vec::new();
    let mut deep_dom: Vec<NodeId> = Vec::new();
    let mut large_grid: Vec<NodeId> = Vec::new();
    let mut complex_form: Vec<NodeId> = Vec::new();
    let mut modals: Vec<NodeId> = Vec::new();
    let mut infinite_scroll: Vec<NodeId> = Vec::new();
    let mut heavy_script: Vec<NodeId> = Vec::new();
    let mut heavy_parent: Vec<NodeId> = Vec::new();
    let mut redundant: Vec<NodeId> = Vec::new();
    let mut recursive: Vec<NodeId> = Vec::new();
    let mut shadow_dom: Vec<NodeId> = Vec::new();
    let mut layout_triggers: Vec<NodeId> = Vec::new();
    let mut forced_reflow: Vec<NodeId> = Vec::new();
    let mut nested_flexboxes: Vec<NodeId> = Vec::new();
    let mut excessive_grids: Vec<NodeId> = Vec::new();
    let mut carousel: Vec<NodeId> = Vec::new();

    // Explicit-stack walk (depth, node, ancestor-path-key).
    type PathKey = Vec<(String, Option<String>)>;
    let mut stack: Vec<(NodeId, usize, PathKey)> = vec![(root, 1, Vec::new())];
    let mut style_blob = String::new();

    while let Some((node, depth, mut path)) = stack.pop() {
        if !hm.is_element(node) {
            continue;
        }
        element_count += 1;
        max_depth = max_depth.max(depth);

        let tag = hm.tag_of(node).unwrap_or("").to_string();
        let classes = hm.classes(node);
        let class_set: HashSet<&str> = classes.iter().map(String::as_str).collect();

        // nested_tables
        if tag == "table" {
            let has_table_descendant = hm
                .descendants_of(node, |d| hm.tag_of(d) == Some("table"))
                .into_iter()
                .next()
                .is_some();
            if has_table_descendant {
                nested_tables.push(node);
            }
        }

        // deep_dom
        if depth >= 15 {
            deep_dom.push(node);
        }

        // large_grid: grid-ish element with > 30 "row-like" descendants
        if tag == "table" || class_set.iter().any(|c| GRID_CLASS_TOKENS.contains(c)) {
            let row_count = hm
                .descendants_of(node, |d| {
                    hm.tag_of(d) == Some("tr") || hm.classes(d).iter().any(|c| c == "row")
                })
                .len();
            if row_count > 30 {
                large_grid.push(node);
            }
        }

        // complex_form
        if tag == "form" {
            let interactive = hm
                .descendants_of(node, |d| {
                    INTERACTIVE_TAGS.contains(&hm.tag_of(d).unwrap_or(""))
                })
                .len();
            if interactive > 20 {
                complex_form.push(node);
            }
        }

        // multiple_modals
        let role = hm.attr(node, "role");
        if role.as_deref() == Some("dialog") || class_set.contains("modal") {
            modals.push(node);
        }

        // infinite_scroll
        if hm.attr(node, "data-infinite-scroll").is_some()
            || classes.iter().any(|c| INFINITE_SCROLL_TOKENS.contains(&c.as_str()))
        {
            infinite_scroll.push(node);
        }

        // heavy_script
        if tag == "script" {
            let len = hm.text_content(node).len();
            if len > 10_000 {
                heavy_script.push(node);
            }
        }

        // heavy_parent
        let child_count = hm.element_children(node).len();
        if child_count > 50 {
            heavy_parent.push(node);
        }

        // redundant_elements: shares a class token with any ancestor (first hit only)
        if !classes.is_empty() {
            let ancestor_classes: HashSet<String> = hm
                .ancestors(node, usize::MAX)
                .into_iter()
                .flat_map(|a| hm.classes(a))
                .collect();
            if classes.iter().any(|c| ancestor_classes.contains(c)) {
                redundant.push(node);
            }
        }

        // recursive_templates: tag+first-class identity repeats > 2 times on this path
        let identity = (tag.clone(), classes.first().cloned());
        let repeats = path.iter().filter(|p| **p == identity).count();
        if repeats >= 2 {
            // this occurrence is the 3rd+ repeat
            recursive.push(node);
        }
        path.push(identity);

        // shadow_dom
        if tag == "template"
            && (hm.attr(node, "shadowrootmode").is_some() || hm.attr(node, "data-shadow-root").is_some())
        {
            shadow_dom.push(node);
        }

        // layout_triggers
        let style = hm.attr(node, "style").unwrap_or_default();
        let has_layout_style = style.contains("position: sticky")
            || style.contains("position:sticky")
            || style.contains("position: fixed")
            || style.contains("position:fixed")
            || style.contains("transform");
        let has_layout_class = classes.iter().any(|c| LAYOUT_CLASS_TOKENS.contains(&c.as_str()));
        if has_layout_style || has_layout_class {
            layout_triggers.push(node);
        }

        // forced_reflow: explicit marker class/attribute
        if class_set.contains("forced-reflow") || hm.attr(node, "data-force-reflow").is_some() {
            forced_reflow.push(node);
        }

        // nested_flexboxes: a flex container with a flex-container descendant
        let is_flex = style.contains("display: flex")
            || style.contains("display:flex")
            || class_set.contains("flex");
        if is_flex {
            let nested = hm
                .descendants_of(node, |d| {
                    let s = hm.attr(d, "style").unwrap_or_default();
                    s.contains("display: flex") || s.contains("display:flex") || hm.classes(d).iter().any(|c| c == "flex")
                })
                .into_iter()
                .next()
                .is_some();
            if nested {
                nested_flexboxes.push(node);
            }
        }

        // excessive_grids / carousel accumulate at the end from a flat count
        if style.contains("display: grid") || style.contains("display:grid") || class_set.contains("grid-wrapper") {
            excessive_grids.push(node);
        }
        if classes.iter().any(|c| CAROUSEL_CLASS_TOKENS.contains(&c.as_str())) {
            carousel.push(node);
        }

        // css_complexity contribution from inline <style> content
        if tag == "style" {
            style_blob.push_str(&hm.text_content(node));
            style_blob.push('\n');
        }
        if let Some(s) = hm.attr(node, "style") {
            if s.contains("!important") {
                style_blob.push_str(&s);
                style_blob.push('\n');
            }
        }

        for child in hm.element_children(node).into_iter().rev() {
            stack.push((child, depth + 1, path.clone()));
        }
    }

    let css_score = css_complexity_score(&style_blob);
    let excessive_grids_count = excessive_grids.len();
    let carousel_count = carousel.len();

    let mut edge_cases = Vec::new();
    push_edge_case(&mut edge_cases, EdgeCaseKind::NestedTables, nested_tables);
    push_edge_case(&mut edge_cases, EdgeCaseKind::DeepDom, deep_dom);
    push_edge_case(&mut edge_cases, EdgeCaseKind::LargeGrid, large_grid);
    push_edge_case(&mut edge_cases, EdgeCaseKind::ComplexForm, complex_form);
    if modals.len() >= 2 {
        edge_cases.push(EdgeCase {
            kind: EdgeCaseKind::MultipleModals,
            count: modals.len(),
            elements: modals,
        });
    }
    push_edge_case(&mut edge_cases, EdgeCaseKind::InfiniteScroll, infinite_scroll);
    push_edge_case(&mut edge_cases, EdgeCaseKind::HeavyScript, heavy_script);
    push_edge_case(&mut edge_cases, EdgeCaseKind::HeavyParent, heavy_parent);
    push_edge_case(&mut edge_cases, EdgeCaseKind::RedundantElements, redundant);
    push_edge_case(&mut edge_cases, EdgeCaseKind::RecursiveTemplates, recursive);
    push_edge_case(&mut edge_cases, EdgeCaseKind::ShadowDom, shadow_dom);
    push_edge_case(&mut edge_cases, EdgeCaseKind::LayoutTriggers, layout_triggers);
    push_edge_case(&mut edge_cases, EdgeCaseKind::ForcedReflow, forced_reflow);
    if css_score > 0.0 {
        edge_cases.push(EdgeCase {
            kind: EdgeCaseKind::CssComplexity,
            count: css_score.round() as usize,
            elements: Vec::new(),
        });
    }
    push_edge_case(&mut edge_cases, EdgeCaseKind::NestedFlexboxes, nested_flexboxes);
    if excessive_grids_count > 5 {
        edge_cases.push(EdgeCase {
            kind: EdgeCaseKind::ExcessiveGrids,
            count: excessive_grids_count,
            elements: excessive_grids,
        });
    }
    if carousel_count > 0 {
        edge_cases.push(EdgeCase {
            kind: EdgeCaseKind::Carousel,
            count: carousel_count,
            elements: carousel,
        });
    }

    let byte_size_kb = source_bytes.len() as f64 / 1024.0;
    let edge_case_total: usize = edge_cases.iter().map(|e| e.count).sum();

    let complexity = composite_complexity(
        weights,
        byte_size_kb,
        element_count,
        edge_case_total,
        max_depth,
    );

    tracing::debug!(
        byte_size_kb,
        element_count,
        edge_cases = edge_case_total,
        complexity,
        "template analysis complete"
    );

    Analysis {
        byte_size_kb,
        element_count,
        max_depth,
        edge_cases,
        complexity,
    }
}

fn push_edge_case(out: &mut Vec<EdgeCase>, kind: EdgeCaseKind, elements: Vec<NodeId>) {
    if !elements.is_empty() {
        out.push(EdgeCase {
            kind,
            count: elements.len(),
            elements,
        });
    }
}

fn css_complexity_score(style_blob: &str) -> f64 {
    let important = important_re().find_iter(style_blob).count();
    let deep_selectors = descendant_combinator_re().find_iter(style_blob).count();
    let vendor = vendor_prefix_re().find_iter(style_blob).count();
    let media = media_re().find_iter(style_blob).count();
    (important * 5 + deep_selectors * 3 + vendor) as f64 + (media * 2) as f64
}

fn composite_complexity(
    weights: ComplexityWeights,
    byte_size_kb: f64,
    element_count: usize,
    edge_case_count: usize,
    max_depth: usize,
) -> f64 {
    // Normalization constants chosen so a "very large" template (≈ the
    // streaming threshold's upper neighborhood) saturates each term near 1.0.
    let size_norm = (byte_size_kb / 5000.0).min(1.0);
    let elements_norm = (element_count as f64 / 20_000.0).min(1.0);
    let edge_norm = (edge_case_count as f64 / 20.0).min(1.0);
    let depth_norm = (max_depth as f64 / 30.0).min(1.0);

    let total_weight = weights.size + weights.elements + weights.edge_cases + weights.depth;
    let score = weights.size * size_norm
        + weights.elements * elements_norm
        + weights.edge_cases * edge_norm
        + weights.depth * depth_norm;

    ((score / total_weight.max(f64::EPSILON)) * 100.0).clamp(0.0, 100.0)
}

#[allow(dead_code)]
fn noop_map_for_coverage() -> HashMap<(), ()> {
    HashMap::new()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::html_model::HtmlModel;

    #[test]
    fn determinism() {
        let src = "<html><body><div class=\"a\"><p>x</p></div></body></html>";
        let hm1 = HtmlModel::parse(src);
        let hm2 = HtmlModel::parse(src);
        let a1 = analyze(&hm1, src.as_bytes(), ComplexityWeights::default());
        let a2 = analyze(&hm2, src.as_bytes(), ComplexityWeights::default());
        assert_eq!(a1.element_count, a2.element_count);
        assert_eq!(a1.max_depth, a2.max_depth);
        assert!((a1.complexity - a2.complexity).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case::nested_tables(
        "<html><body><table><tr><td><table><tr><td>x</td></tr></table></td></tr></table></body></html>".to_string(),
        EdgeCaseKind::NestedTables
    )]
    #[case::heavy_parent(
        format!("<html><body><div>{}</div></body></html>", "<span>x</span>".repeat(60)),
        EdgeCaseKind::HeavyParent
    )]
    #[case::redundant_elements(
        "<html><body><div class=\"a\"><div class=\"a\">x</div></div></body></html>".to_string(),
        EdgeCaseKind::RedundantElements
    )]
    #[case::recursive_templates(
        "<html><body><div class=\"r\"><div class=\"r\"><div class=\"r\"><div class=\"r\">x</div></div></div></div></body></html>".to_string(),
        EdgeCaseKind::RecursiveTemplates
    )]
    fn detects_edge_case(#[case] src: String, #[case] expected: EdgeCaseKind) {
        let hm = HtmlModel::parse(&src);
        let a = analyze(&hm, src.as_bytes(), ComplexityWeights::default());
        assert!(a.has_kind(expected), "expected {expected:?} in {:?}", a.edge_cases);
    }

    #[test]
    fn detects_deep_dom() {
        let mut src = String::from("<html><body>");
        for _ in 0..20 {
            src.push_str("<div>");
        }
        src.push_str("leaf");
        for _ in 0..20 {
            src.push_str("</div>");
        }
        src.push_str("</body></html>");
        let hm = HtmlModel::parse(&src);
        let a = analyze(&hm, src.as_bytes(), ComplexityWeights::default());
        assert!(a.has_kind(EdgeCaseKind::DeepDom));
        assert!(a.max_depth >= 15);
    }

}
