//! Tolerant, mutable tree over input HTML (the "HM" of the adaptive renderer).
//!
//! Built on `scraper`/`ego_tree` rather than a hand-rolled parser — the tree
//! already tolerates malformed markup (unclosed tags are implicitly closed,
//! stray end tags dropped) because that's how `html5ever` recovers. This
//! module adds the annotation side-table and the mutation helpers the
//! edge-case optimizer needs, none of which `scraper` exposes directly.

use std::collections::HashMap;

use ego_tree::NodeId;
use html5ever::{namespace_url, ns};
use scraper::{Html, Node as ScraperNode, Selector};

/// Viewport classification attached by the `prioritize-viewport` transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewport {
    Visible,
    Offscreen,
}

/// Per-node optimizer annotations. Mutation is monotonic within one run: an
/// annotation once set is only ever refined (e.g. `priority` narrowed), never
/// cleared — callers should use the provided setters rather than mutating
/// this struct directly if that invariant matters to them.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    pub viewport: Option<Viewport>,
    pub priority: Option<u8>,
    pub recursive: bool,
    pub layout_trigger: bool,
    pub forced_reflow: bool,
    pub lazy_render: bool,
}

/// A tolerant, mutable tree over the input bytes.
///
/// All navigation/mutation operations are total: there is no failure path,
/// only "not applicable" (an empty iterator, a `None`, or a no-op mutation).
pub struct HtmlModel {
    html: Html,
    annotations: HashMap<NodeId, Annotations>,
}

/// Result of a mutation that can legitimately not apply (e.g. the target
/// node vanished under an earlier mutation in the same pass).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    NotApplicable,
}

impl HtmlModel {
    /// Parses `source` into a tree. Total: unclosed tags are implicitly
    /// closed, stray end tags dropped, by `html5ever`'s recovery rules.
    pub fn parse(source: &str) -> Self {
        let html = Html::parse_document(source);
        Self {
            html,
            annotations: HashMap::new(),
        }
    }

    /// Serializes the tree back to a well-formed document. Attribute order
    /// follows insertion order (the `deterministic` scraper feature backs
    /// attributes with an `IndexMap`); values are escaped by the underlying
    /// `html5ever` serializer.
    pub fn serialize(&self) -> String {
        self.html.html()
    }

    /// The id of the root `<html>` element, if the document has one.
    pub fn root(&self) -> Option<NodeId> {
        self.html
            .tree
            .root()
            .children()
            .find(|c| c.value().is_element())
            .map(|c| c.id())
    }

    /// Whether the document has a `<body>` element at all.
    pub fn has_body(&self) -> bool {
        self.find_first_by_tag("body").is_some()
    }

    pub fn find_first_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.descendants_of(self.tree_root_id(), |n| self.tag_of(n) == Some(tag))
            .into_iter()
            .next()
    }

    fn tree_root_id(&self) -> NodeId {
        self.html.tree.root().id()
    }

    pub fn tag_of(&self, node: NodeId) -> Option<&str> {
        self.html
            .tree
            .get(node)
            .and_then(|r| r.value().as_element())
            .map(|e| e.name())
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.html
            .tree
            .get(node)
            .map(|r| r.value().is_element())
            .unwrap_or(false)
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.html
            .tree
            .get(node)
            .and_then(|r| r.value().as_element())
            .and_then(|e| e.attr(name))
            .map(str::to_owned)
    }

    /// All attributes on `node`, in document order, for callers that need a
    /// full rendering of an element rather than a handful of known names.
    pub fn attrs(&self, node: NodeId) -> Vec<(String, String)> {
        self.html
            .tree
            .get(node)
            .and_then(|r| r.value().as_element())
            .map(|e| e.attrs.iter().map(|(k, v)| (k.local.to_string(), v.to_string())).collect())
            .unwrap_or_default()
    }

    pub fn classes(&self, node: NodeId) -> Vec<String> {
        self.html
            .tree
            .get(node)
            .and_then(|r| r.value().as_element())
            .map(|e| e.classes().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Direct children, element and text nodes alike, in document order.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        match self.html.tree.get(node) {
            Some(r) => r.children().map(|c| c.id()).collect(),
            None => Vec::new(),
        }
    }

    /// Direct *element* children only.
    pub fn element_children(&self, node: NodeId) -> Vec<NodeId> {
        self.children(node)
            .into_iter()
            .filter(|&c| self.is_element(c))
            .collect()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.html.tree.get(node).and_then(|r| r.parent()).map(|p| p.id())
    }

    /// Ancestor chain, nearest first, up to `max_levels` ancestors.
    pub fn ancestors(&self, node: NodeId, max_levels: usize) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.parent(node);
        while let Some(id) = cur {
            out.push(id);
            if out.len() >= max_levels {
                break;
            }
            cur = self.parent(id);
        }
        out
    }

    /// Depth of `node` relative to the document root (root's children are
    /// depth 1).
    pub fn depth(&self, node: NodeId) -> usize {
        self.ancestors(node, usize::MAX).len()
    }

    /// All descendants (depth-first, document order) matching `predicate`.
    pub fn descendants_of(&self, node: NodeId, predicate: impl Fn(NodeId) -> bool) -> Vec<NodeId> {
        let Some(start) = self.html.tree.get(node) else {
            return Vec::new();
        };
        start
            .descendants()
            .skip(1) // skip the node itself
            .map(|r| r.id())
            .filter(|&id| predicate(id))
            .collect()
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let Some(r) = self.html.tree.get(node) else {
            return String::new();
        };
        r.descendants()
            .filter_map(|d| d.value().as_text())
            .map(|t| t.text.as_ref())
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn select(&self, selector: &Selector) -> Vec<NodeId> {
        self.html.select(selector).map(|e| e.id()).collect()
    }

    // ---- mutation ----------------------------------------------------

    /// Sets (or overwrites) an attribute on an element node.
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> MutationOutcome {
        let Some(mut m) = self.html.tree.get_mut(node) else {
            return MutationOutcome::NotApplicable;
        };
        match m.value() {
            ScraperNode::Element(el) => {
                el.attrs.insert(
                    html5ever::QualName::new(None, ns!(), name.into()),
                    value.into(),
                );
                MutationOutcome::Applied
            }
            _ => MutationOutcome::NotApplicable,
        }
    }

    pub fn clear_attr(&mut self, node: NodeId, name: &str) -> MutationOutcome {
        let Some(mut m) = self.html.tree.get_mut(node) else {
            return MutationOutcome::NotApplicable;
        };
        match m.value() {
            ScraperNode::Element(el) => {
                let qual = html5ever::QualName::new(None, ns!(), name.into());
                if el.attrs.shift_remove(&qual).is_some() {
                    MutationOutcome::Applied
                } else {
                    MutationOutcome::NotApplicable
                }
            }
            _ => MutationOutcome::NotApplicable,
        }
    }

    /// Replaces a node's text content wholesale (only meaningful for
    /// elements whose only children are text nodes; used by optimizer
    /// placeholders).
    pub fn set_text_content(&mut self, node: NodeId, text: &str) -> MutationOutcome {
        if self.html.tree.get(node).is_none() {
            return MutationOutcome::NotApplicable;
        }
        // Detach all existing children.
        let child_ids = self.children(node);
        for c in child_ids {
            if let Some(mut cm) = self.html.tree.get_mut(c) {
                cm.detach();
            }
        }
        let Some(mut m) = self.html.tree.get_mut(node) else {
            return MutationOutcome::NotApplicable;
        };
        m.append(ScraperNode::Text(scraper::node::Text { text: text.into() }));
        MutationOutcome::Applied
    }

    /// Wraps `target` in a freshly created element `tag` with the given
    /// attributes, without serializing/re-parsing: `target` is detached and
    /// reattached as the wrapper's only child, and the wrapper takes
    /// `target`'s old position.
    pub fn wrap_in_new_parent(
        &mut self,
        target: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> Option<NodeId> {
        let parent = self.parent(target)?;
        let wrapper_node = new_element_node(tag, attrs);

        let wrapper_id = {
            let mut target_mut = self.html.tree.get_mut(target)?;
            target_mut.insert_before(wrapper_node).id()
        };

        // Move `target` itself (whole subtree) under the wrapper.
        {
            let mut wrapper_mut = self.html.tree.get_mut(wrapper_id)?;
            wrapper_mut.append_id(target);
        }
        let _ = parent;
        Some(wrapper_id)
    }

    /// Moves `node` so it becomes the last child of `new_parent`.
    pub fn move_subtree(&mut self, node: NodeId, new_parent: NodeId) -> MutationOutcome {
        if node == new_parent {
            return MutationOutcome::NotApplicable;
        }
        let Some(mut parent_mut) = self.html.tree.get_mut(new_parent) else {
            return MutationOutcome::NotApplicable;
        };
        parent_mut.append_id(node);
        MutationOutcome::Applied
    }

    /// Detaches `node`'s subtree entirely (used when hoisting redundant
    /// wrappers: children are reparented first, then the empty node is
    /// detached).
    pub fn detach(&mut self, node: NodeId) -> MutationOutcome {
        let Some(mut m) = self.html.tree.get_mut(node) else {
            return MutationOutcome::NotApplicable;
        };
        m.detach();
        MutationOutcome::Applied
    }

    /// Reparents every child of `node` to be a child of `node`'s own parent,
    /// in `node`'s former position, then detaches `node`. Used by
    /// `hoist-redundant`.
    pub fn splice_out(&mut self, node: NodeId) -> MutationOutcome {
        let Some(parent) = self.parent(node) else {
            return MutationOutcome::NotApplicable;
        };
        let children = self.children(node);
        for child in children {
            let Some(mut anchor) = self.html.tree.get_mut(node) else {
                continue;
            };
            anchor.insert_id_before(child);
        }
        let _ = parent;
        self.detach(node)
    }

    /// Inserts a new element as the next sibling of `node`.
    pub fn insert_sibling_after(
        &mut self,
        node: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> Option<NodeId> {
        let new_node = new_element_node(tag, attrs);
        let mut m = self.html.tree.get_mut(node)?;
        Some(m.insert_after(new_node).id())
    }

    // ---- annotations ---------------------------------------------------

    pub fn annotations(&self, node: NodeId) -> Annotations {
        self.annotations.get(&node).cloned().unwrap_or_default()
    }

    pub fn set_viewport(&mut self, node: NodeId, viewport: Viewport, priority: u8) {
        let entry = self.annotations.entry(node).or_default();
        entry.viewport = Some(viewport);
        entry.priority = Some(entry.priority.map_or(priority, |p| p.min(priority)));
    }

    pub fn mark_recursive(&mut self, node: NodeId) {
        self.annotations.entry(node).or_default().recursive = true;
    }

    pub fn mark_layout_trigger(&mut self, node: NodeId) {
        self.annotations.entry(node).or_default().layout_trigger = true;
    }

    pub fn mark_forced_reflow(&mut self, node: NodeId) {
        self.annotations.entry(node).or_default().forced_reflow = true;
    }

    pub fn mark_lazy_render(&mut self, node: NodeId) {
        self.annotations.entry(node).or_default().lazy_render = true;
    }
}

fn new_element_node(tag: &str, attrs: &[(&str, &str)]) -> ScraperNode {
    let name = html5ever::QualName::new(None, ns!(html), tag.into());
    let mut element = scraper::node::Element::new(name, Vec::new());
    for (k, v) in attrs {
        element
            .attrs
            .insert(html5ever::QualName::new(None, ns!(), (*k).into()), (*v).into());
    }
    ScraperNode::Element(element)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_total_over_malformed_input() {
        let hm = HtmlModel::parse("<div><p>unclosed<span>nested</div>");
        assert!(hm.root().is_some());
    }

    #[test]
    fn serialize_round_trips_text() {
        let hm = HtmlModel::parse("<!doctype html><html><head></head><body><p>hi</p></body></html>");
        let out = hm.serialize();
        assert!(out.contains("hi"));
        assert!(out.to_lowercase().contains("<!doctype html>"));
    }

    #[test]
    fn depth_and_children() {
        let hm = HtmlModel::parse("<html><body><div><p>x</p></div></body></html>");
        let body = hm.find_first_by_tag("body").unwrap();
        let div = hm.element_children(body)[0];
        let p = hm.element_children(div)[0];
        assert_eq!(hm.depth(p), hm.depth(div) + 1);
    }

    #[test]
    fn set_attr_and_clear_attr() {
        let mut hm = HtmlModel::parse("<html><body><div></div></body></html>");
        let body = hm.find_first_by_tag("body").unwrap();
        let div = hm.element_children(body)[0];
        assert_eq!(hm.set_attr(div, "data-lazy-render", "true"), MutationOutcome::Applied);
        assert_eq!(hm.attr(div, "data-lazy-render").as_deref(), Some("true"));
        assert_eq!(hm.clear_attr(div, "data-lazy-render"), MutationOutcome::Applied);
        assert_eq!(hm.attr(div, "data-lazy-render"), None);
    }

    #[test]
    fn wrap_in_new_parent_preserves_content() {
        let mut hm = HtmlModel::parse("<html><body><table><tr><td>x</td></tr></table></body></html>");
        let body = hm.find_first_by_tag("body").unwrap();
        let table = hm.element_children(body)[0];
        let wrapper = hm
            .wrap_in_new_parent(table, "div", &[("class", "simplified-table")])
            .unwrap();
        assert_eq!(hm.tag_of(wrapper), Some("div"));
        assert!(hm.serialize().contains("simplified-table"));
        assert!(hm.serialize().contains("<table"));
    }

    #[test]
    fn splice_out_reparents_children() {
        let mut hm = HtmlModel::parse(
            "<html><body><div class=\"a\"><div class=\"a\"><p>keep</p></div></div></body></html>",
        );
        let body = hm.find_first_by_tag("body").unwrap();
        let outer = hm.element_children(body)[0];
        let inner = hm.element_children(outer)[0];
        hm.splice_out(inner);
        let out = hm.serialize();
        assert!(out.contains("keep"));
    }
}
