use std::sync::OnceLock;

use ego_tree::NodeId;
use regex::Regex;

use crate::analyzer::{Analysis, EdgeCaseKind};
use crate::html_model::{HtmlModel, MutationOutcome, Viewport};

use super::{OptimizerConfig, Transform, TransformOutcome, TransformSkipped};

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/\*[\s\S]*?\*/").unwrap())
}

fn long_selector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Matches a selector whose simple-selector chain is 5+ levels deep.
    RE.get_or_init(|| Regex::new(r"([.#a-zA-Z][^{},]*?(?:\s+[.#a-zA-Z][^{},\s]*){4,})").unwrap())
}

fn ok(name: &'static str, nodes_touched: usize, bytes_saved: i64) -> TransformOutcome {
    TransformOutcome { name, applied: nodes_touched > 0, nodes_touched, bytes_saved, skipped: None }
}

/// `true` if `node` already sits under a wrapper carrying `wrapper_class`,
/// either because a previous `optimize()` pass already wrapped it
/// (Testable Property 7) or because an ancestor earlier in this same pass
/// was just wrapped, so a deeper recurrence is already inside it.
fn already_wrapped(hm: &HtmlModel, node: NodeId, wrapper_class: &str) -> bool {
    hm.ancestors(node, usize::MAX)
        .iter()
        .any(|&a| hm.classes(a).iter().any(|c| c == wrapper_class))
}

fn skipped(name: &'static str, reason: &str) -> TransformOutcome {
    TransformOutcome {
        name,
        applied: false,
        nodes_touched: 0,
        bytes_saved: 0,
        skipped: Some(TransformSkipped { transform: name, reason: reason.to_string() }),
    }
}

/// `simplify-nested-tables`: wrap inner `<table>`s in a lazy-render
/// container; inner HTML is untouched.
pub struct SimplifyNestedTables {
    pub config: OptimizerConfig,
}

impl Transform for SimplifyNestedTables {
    fn name(&self) -> &'static str {
        "simplify-nested-tables"
    }

    fn applies(&self, analysis: &Analysis) -> bool {
        analysis.has_kind(EdgeCaseKind::NestedTables)
    }

    fn apply(&self, hm: &mut HtmlModel, analysis: &Analysis) -> TransformOutcome {
        let Some(edge) = analysis.kind(EdgeCaseKind::NestedTables) else {
            return skipped(self.name(), "no nested_tables edge case recorded");
        };
        let mut touched = 0usize;
        for &outer_table in &edge.elements {
            if touched >= self.config.max_nodes_per_transform {
                break;
            }
            let inner_tables: Vec<NodeId> = hm
                .descendants_of(outer_table, |d| hm.tag_of(d) == Some("table"))
                .into_iter()
                .take(1)
                .collect();
            for inner in inner_tables {
                if touched >= self.config.max_nodes_per_transform {
                    break;
                }
                if already_wrapped(hm, inner, "simplified-table") {
                    continue;
                }
                if hm
                    .wrap_in_new_parent(inner, "div", &[("class", "simplified-table"), ("data-lazy-render", "true")])
                    .is_some()
                {
                    touched += 1;
                }
            }
        }
        ok(self.name(), touched, 0)
    }
}

/// `collapse-deep-subtree`: wrap the subtree below a deep-dom pivot in a
/// lazy-render wrapper that carries the original content.
pub struct CollapseDeepSubtree {
    pub config: OptimizerConfig,
}

impl Transform for CollapseDeepSubtree {
    fn name(&self) -> &'static str {
        "collapse-deep-subtree"
    }

    fn applies(&self, analysis: &Analysis) -> bool {
        analysis.has_kind(EdgeCaseKind::DeepDom)
    }

    fn apply(&self, hm: &mut HtmlModel, analysis: &Analysis) -> TransformOutcome {
        let Some(edge) = analysis.kind(EdgeCaseKind::DeepDom) else {
            return skipped(self.name(), "no deep_dom edge case recorded");
        };
        let mut touched = 0usize;
        for &pivot in edge.elements.iter().take(self.config.max_nodes_per_transform) {
            if already_wrapped(hm, pivot, "deep-content-wrapper") {
                continue;
            }
            if hm
                .wrap_in_new_parent(pivot, "div", &[("class", "deep-content-wrapper"), ("data-lazy-render", "true")])
                .is_some()
            {
                touched += 1;
            }
        }
        ok(self.name(), touched, 0)
    }
}

/// `hoist-redundant`: splice out an element whose single class duplicates
/// its parent's, reparenting children in its place.
pub struct HoistRedundant {
    pub config: OptimizerConfig,
}

impl Transform for HoistRedundant {
    fn name(&self) -> &'static str {
        "hoist-redundant"
    }

    fn applies(&self, analysis: &Analysis) -> bool {
        analysis.has_kind(EdgeCaseKind::RedundantElements)
    }

    fn apply(&self, hm: &mut HtmlModel, analysis: &Analysis) -> TransformOutcome {
        let Some(edge) = analysis.kind(EdgeCaseKind::RedundantElements) else {
            return skipped(self.name(), "no redundant_elements edge case recorded");
        };
        // A node that's also a recursive-template pivot is handled by
        // `limit-recursion` instead — splicing it out here would remove the
        // exact nodes that transform needs to wrap.
        let recursive: &[NodeId] = analysis.kind(EdgeCaseKind::RecursiveTemplates).map(|e| e.elements.as_slice()).unwrap_or(&[]);
        let mut touched = 0usize;
        for &node in edge.elements.iter().take(self.config.max_nodes_per_transform) {
            if recursive.contains(&node) {
                continue;
            }
            if hm.splice_out(node) == MutationOutcome::Applied {
                touched += 1;
            }
        }
        ok(self.name(), touched, 0)
    }
}

/// `prioritize-viewport`: annotate the first elements that fit a nominal
/// viewport height as visible (priority 1), the rest offscreen with
/// priority scaled by distance.
pub struct PrioritizeViewport {
    pub config: OptimizerConfig,
}

impl Transform for PrioritizeViewport {
    fn name(&self) -> &'static str {
        "prioritize-viewport"
    }

    fn applies(&self, _analysis: &Analysis) -> bool {
        true
    }

    fn apply(&self, hm: &mut HtmlModel, _analysis: &Analysis) -> TransformOutcome {
        let Some(body) = hm.find_first_by_tag("body") else {
            return skipped(self.name(), "document has no body");
        };
        let top_level = hm.element_children(body);
        let visible_count = (self.config.nominal_viewport_height_px / self.config.element_height_estimate_px.max(1))
            .max(1) as usize;

        let mut touched = 0usize;
        for (i, &node) in top_level.iter().enumerate() {
            let (viewport, priority) = if i < visible_count {
                (Viewport::Visible, 1)
            } else {
                let distance = i - visible_count;
                (Viewport::Offscreen, (2 + distance.min(3)) as u8)
            };
            hm.set_viewport(node, viewport, priority);
            let viewport_attr = match viewport {
                Viewport::Visible => "visible",
                Viewport::Offscreen => "offscreen",
            };
            hm.set_attr(node, "data-viewport", viewport_attr);
            hm.set_attr(node, "data-progressive-priority", &priority.to_string());
            touched += 1;
        }
        ok(self.name(), touched, 0)
    }
}

/// `contain-layout-triggers`: add inline `contain: layout` (and
/// `will-change: transform` for animation-suggestive classes).
pub struct ContainLayoutTriggers {
    pub config: OptimizerConfig,
}

impl Transform for ContainLayoutTriggers {
    fn name(&self) -> &'static str {
        "contain-layout-triggers"
    }

    fn applies(&self, analysis: &Analysis) -> bool {
        analysis.has_kind(EdgeCaseKind::LayoutTriggers)
    }

    fn apply(&self, hm: &mut HtmlModel, analysis: &Analysis) -> TransformOutcome {
        let Some(edge) = analysis.kind(EdgeCaseKind::LayoutTriggers) else {
            return skipped(self.name(), "no layout_triggers edge case recorded");
        };
        let mut touched = 0usize;
        for &node in edge.elements.iter().take(self.config.max_nodes_per_transform) {
            let existing = hm.attr(node, "style").unwrap_or_default();
            let suggests_animation = hm.classes(node).iter().any(|c| c.contains("anim") || c.contains("carousel"));
            let mut next = existing.clone();
            if !next.is_empty() && !next.trim_end().ends_with(';') {
                next.push(';');
            }
            next.push_str(" contain: layout;");
            if suggests_animation {
                next.push_str(" will-change: transform;");
            }
            if hm.set_attr(node, "style", next.trim()) == MutationOutcome::Applied {
                hm.mark_layout_trigger(node);
                touched += 1;
            }
        }
        ok(self.name(), touched, 0)
    }
}

/// `limit-recursion`: at depth >= 3 on a repeated class path, replace deeper
/// recurrences with a placeholder wrapper carrying a `load-more` sentinel.
pub struct LimitRecursion {
    pub config: OptimizerConfig,
}

impl Transform for LimitRecursion {
    fn name(&self) -> &'static str {
        "limit-recursion"
    }

    fn applies(&self, analysis: &Analysis) -> bool {
        analysis.has_kind(EdgeCaseKind::RecursiveTemplates)
    }

    fn apply(&self, hm: &mut HtmlModel, analysis: &Analysis) -> TransformOutcome {
        let Some(edge) = analysis.kind(EdgeCaseKind::RecursiveTemplates) else {
            return skipped(self.name(), "no recursive_templates edge case recorded");
        };
        let mut touched = 0usize;
        for &node in edge.elements.iter().take(self.config.max_nodes_per_transform) {
            if already_wrapped(hm, node, "r-placeholder") {
                continue;
            }
            hm.mark_recursive(node);
            if hm
                .wrap_in_new_parent(
                    node,
                    "div",
                    &[("class", "r-placeholder"), ("data-depth", "3"), ("data-recursive-template", "true"), ("data-load-more", "true")],
                )
                .is_some()
            {
                touched += 1;
            }
        }
        ok(self.name(), touched, 0)
    }
}

/// `split-heavy-grid`: keep the first K rows visible, move the rest into a
/// lazy-load container with a pagination sentinel.
pub struct SplitHeavyGrid {
    pub config: OptimizerConfig,
}

impl Transform for SplitHeavyGrid {
    fn name(&self) -> &'static str {
        "split-heavy-grid"
    }

    fn applies(&self, analysis: &Analysis) -> bool {
        analysis.has_kind(EdgeCaseKind::LargeGrid)
    }

    fn apply(&self, hm: &mut HtmlModel, analysis: &Analysis) -> TransformOutcome {
        let Some(edge) = analysis.kind(EdgeCaseKind::LargeGrid) else {
            return skipped(self.name(), "no large_grid edge case recorded");
        };
        let mut touched = 0usize;
        for &grid in &edge.elements {
            if touched >= self.config.max_nodes_per_transform {
                break;
            }
            let rows: Vec<NodeId> = hm.descendants_of(grid, |d| {
                hm.tag_of(d) == Some("tr") || hm.classes(d).iter().any(|c| c == "row")
            });
            if rows.len() <= self.config.heavy_grid_visible_rows {
                continue;
            }
            let Some(container) = hm.insert_sibling_after(
                grid,
                "div",
                &[("class", "more-items-container"), ("data-lazy-render", "true"), ("data-pagination", "true")],
            ) else {
                continue;
            };
            for &row in rows.iter().skip(self.config.heavy_grid_visible_rows) {
                if touched >= self.config.max_nodes_per_transform {
                    break;
                }
                if hm.move_subtree(row, container) == MutationOutcome::Applied {
                    touched += 1;
                }
            }
        }
        ok(self.name(), touched, 0)
    }
}

/// `defer-modals`: move all dialog-like subtrees to a single
/// `#modal-container` appended to `<body>`.
pub struct DeferModals {
    pub config: OptimizerConfig,
}

impl Transform for DeferModals {
    fn name(&self) -> &'static str {
        "defer-modals"
    }

    fn applies(&self, analysis: &Analysis) -> bool {
        analysis.has_kind(EdgeCaseKind::MultipleModals)
    }

    fn apply(&self, hm: &mut HtmlModel, analysis: &Analysis) -> TransformOutcome {
        let Some(edge) = analysis.kind(EdgeCaseKind::MultipleModals) else {
            return skipped(self.name(), "no multiple_modals edge case recorded");
        };
        let Some(body) = hm.find_first_by_tag("body") else {
            return skipped(self.name(), "document has no body");
        };
        let body_children = hm.element_children(body);
        let Some(&last_child) = body_children.last() else {
            return skipped(self.name(), "body has no element children");
        };
        let Some(container) = hm.insert_sibling_after(last_child, "div", &[("id", "modal-container")]) else {
            return skipped(self.name(), "failed to create modal container");
        };

        let mut touched = 0usize;
        for &modal in edge.elements.iter().take(self.config.max_nodes_per_transform) {
            if modal == container {
                continue;
            }
            if hm.move_subtree(modal, container) == MutationOutcome::Applied {
                touched += 1;
            }
        }
        ok(self.name(), touched, 0)
    }
}

/// `simplify-heavy-parent`: wrap children of an over-wide parent in a
/// lazy-render container.
pub struct SimplifyHeavyParent {
    pub config: OptimizerConfig,
}

impl Transform for SimplifyHeavyParent {
    fn name(&self) -> &'static str {
        "simplify-heavy-parent"
    }

    fn applies(&self, analysis: &Analysis) -> bool {
        analysis.has_kind(EdgeCaseKind::HeavyParent)
    }

    fn apply(&self, hm: &mut HtmlModel, analysis: &Analysis) -> TransformOutcome {
        let Some(edge) = analysis.kind(EdgeCaseKind::HeavyParent) else {
            return skipped(self.name(), "no heavy_parent edge case recorded");
        };
        let mut touched = 0usize;
        for &parent in &edge.elements {
            if touched >= self.config.max_nodes_per_transform {
                break;
            }
            let children = hm.element_children(parent);
            if children.len() <= self.config.heavy_parent_visible_children {
                continue;
            }
            let Some(&anchor) = children.get(self.config.heavy_parent_visible_children - 1) else {
                continue;
            };
            let Some(container) =
                hm.insert_sibling_after(anchor, "div", &[("class", "heavy-component-wrapper"), ("data-lazy-render", "true")])
            else {
                continue;
            };
            for &child in children.iter().skip(self.config.heavy_parent_visible_children) {
                if touched >= self.config.max_nodes_per_transform {
                    break;
                }
                if hm.move_subtree(child, container) == MutationOutcome::Applied {
                    touched += 1;
                }
            }
        }
        ok(self.name(), touched, 0)
    }
}

/// `shrink-css`: strip comments from inline `<style>` content and truncate
/// overly specific selectors to their last 3 levels.
pub struct ShrinkCss {
    pub config: OptimizerConfig,
}

impl Transform for ShrinkCss {
    fn name(&self) -> &'static str {
        "shrink-css"
    }

    fn applies(&self, analysis: &Analysis) -> bool {
        analysis.has_kind(EdgeCaseKind::CssComplexity)
    }

    fn apply(&self, hm: &mut HtmlModel, _analysis: &Analysis) -> TransformOutcome {
        let Some(body) = hm.find_first_by_tag("body") else {
            return skipped(self.name(), "document has no body");
        };
        let document_root = hm.parent(body).unwrap_or(body);
        let style_nodes: Vec<NodeId> = hm.descendants_of(document_root, |d| hm.tag_of(d) == Some("style"));
        let mut touched = 0usize;
        let mut bytes_saved: i64 = 0;
        for &style in style_nodes.iter().take(self.config.max_nodes_per_transform) {
            let original = hm.text_content(style);
            let without_comments = comment_re().replace_all(&original, "");
            let shrunk = long_selector_re()
                .replace_all(&without_comments, |caps: &regex::Captures| {
                    let full = &caps[1];
                    let parts: Vec<&str> = full.split_whitespace().collect();
                    if parts.len() > 3 {
                        parts[parts.len() - 3..].join(" ")
                    } else {
                        full.to_string()
                    }
                })
                .to_string();
            if shrunk != original {
                bytes_saved += original.len() as i64 - shrunk.len() as i64;
                if hm.set_text_content(style, &shrunk) == MutationOutcome::Applied {
                    touched += 1;
                }
            }
        }
        ok(self.name(), touched, bytes_saved)
    }
}

/// The fixed runtime script the advanced tier bundles for the consumer (§4.4,
/// §6): it observes `[data-viewport="offscreen"]` elements and, on entry into
/// view, removes the marker attribute and adds `optimizer-visible`.
pub fn runtime_script() -> &'static str {
    const SCRIPT: &str = r#"(function () {
  if (typeof IntersectionObserver === "undefined") { return; }
  var observer = new IntersectionObserver(function (entries) {
    entries.forEach(function (entry) {
      if (!entry.isIntersecting) { return; }
      var el = entry.target;
      el.removeAttribute("data-viewport");
      el.classList.add("optimizer-visible");
      observer.unobserve(el);
    });
  });
  document.querySelectorAll('[data-viewport="offscreen"]').forEach(function (el) {
    observer.observe(el);
  });
})();"#;
    SCRIPT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{analyze, ComplexityWeights};
    use crate::optimizer::{basic_registry, optimize};

    #[test]
    fn simplify_nested_tables_wraps_inner_table() {
        let src = "<html><body><table><tr><td><table><tr><td>x</td></tr></table></td></tr></table></body></html>";
        let mut hm = HtmlModel::parse(src);
        let analysis = analyze(&hm, src.as_bytes(), ComplexityWeights::default());
        let registry = basic_registry(OptimizerConfig::default(), false);
        optimize(&mut hm, &analysis, &registry);
        let out = hm.serialize();
        assert!(out.contains("simplified-table"));
        assert!(out.contains("data-lazy-render=\"true\""));
    }

    #[test]
    fn defer_modals_collects_into_single_container() {
        let src = "<html><body><div role=\"dialog\">a</div><div role=\"dialog\">b</div></body></html>";
        let mut hm = HtmlModel::parse(src);
        let analysis = analyze(&hm, src.as_bytes(), ComplexityWeights::default());
        let registry = basic_registry(OptimizerConfig::default(), false);
        optimize(&mut hm, &analysis, &registry);
        let out = hm.serialize();
        assert_eq!(out.matches("modal-container").count(), 1);
    }

    #[test]
    fn shrink_css_strips_comments() {
        let src = "<html><head><style>/* c */ .a { color: red !important; }</style></head><body><p class=\"a\">x</p></body></html>";
        let mut hm = HtmlModel::parse(src);
        let analysis = analyze(&hm, src.as_bytes(), ComplexityWeights::default());
        let registry = basic_registry(OptimizerConfig::default(), false);
        optimize(&mut hm, &analysis, &registry);
        let out = hm.serialize();
        assert!(!out.contains("/* c */"));
    }
}
