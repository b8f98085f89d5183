//! Chunker (CH): converts an [`HtmlModel`] into an ordered sequence of
//! self-contained HTML [`Chunk`]s.
//!
//! Grounded directly on the teacher's accumulate-until-budget chunk-building
//! loop, retargeted from RAG token budgets to byte budgets and from bare
//! fragments to self-contained-document chunks (preamble/epilogue framing).

use ego_tree::NodeId;
use scraper::Selector;

use crate::html_model::HtmlModel;
use crate::HtmlError;

const BREAKPOINT_TAGS: &[&str] = &["div", "section", "article", "header", "footer", "nav", "aside", "main"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Size,
    Section,
    Dom,
}

/// A self-contained, independently parseable HTML document.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub total: usize,
    pub is_first: bool,
    pub is_last: bool,
    pub html: String,
    pub viewport_priority: Option<u8>,
}

impl Chunk {
    pub fn byte_size(&self) -> usize {
        self.html.len()
    }
}

struct Frame {
    preamble: String,
    epilogue: String,
}

/// Builds the preamble (everything up to and including `<body ...>`) and
/// epilogue (`</body></html>`) shared by every chunk of this document.
fn document_frame(hm: &HtmlModel) -> Frame {
    let doctype = "<!DOCTYPE html>";
    let Some(html_root) = hm.root() else {
        return Frame {
            preamble: format!("{doctype}\n<html><head></head><body>"),
            epilogue: "</body></html>".to_string(),
        };
    };

    let html_attrs_str = attrs_string(hm, html_root);
    let head_html = hm
        .find_first_by_tag("head")
        .map(|h| serialize_subtree_outer(hm, h))
        .unwrap_or_else(|| "<head></head>".to_string());

    let body_open = match hm.find_first_by_tag("body") {
        Some(body) => format!("<body{}>", attrs_string(hm, body)),
        None => "<body>".to_string(),
    };

    Frame {
        preamble: format!("{doctype}\n<html{html_attrs_str}>{head_html}{body_open}"),
        epilogue: "</body></html>".to_string(),
    }
}

fn attrs_string(hm: &HtmlModel, node: NodeId) -> String {
    let mut out = String::new();
    for (name, value) in hm.attrs(node) {
        out.push(' ');
        out.push_str(&name);
        out.push_str("=\"");
        out.push_str(&html_escape(&value));
        out.push('"');
    }
    out
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Serializes `node` and its subtree as an outer-HTML fragment, by asking
/// the model to serialize the whole document and slicing... not available
/// generically, so instead rebuild from the model's own navigation API: a
/// minimal recursive walk sufficient for framing (head content, block
/// sections). Good enough fidelity for chunk framing, not a general
/// serializer — full-fidelity serialization for the final document still
/// goes through `HtmlModel::serialize`.
fn serialize_subtree_outer(hm: &HtmlModel, node: NodeId) -> String {
    render_node(hm, node)
}

fn render_node(hm: &HtmlModel, node: NodeId) -> String {
    if !hm.is_element(node) {
        return html_escape(&hm.text_content(node));
    }
    let Some(tag) = hm.tag_of(node) else {
        return String::new();
    };
    let attrs = attrs_string(hm, node);
    if matches!(tag, "br" | "img" | "input" | "hr" | "meta" | "link") {
        return format!("<{tag}{attrs}/>");
    }
    // Raw-text elements: their content is never markup, so escaping it the
    // way element text is escaped elsewhere would corrupt `<`/`>` that are
    // meaningful script/style syntax rather than HTML.
    if matches!(tag, "script" | "style" | "textarea" | "title") {
        return format!("<{tag}{attrs}>{}</{tag}>", hm.text_content(node));
    }
    let children: String = hm.children(node).into_iter().map(|c| render_node(hm, c)).collect();
    format!("<{tag}{attrs}>{children}</{tag}>")
}

fn frame_chunk(frame: &Frame, body_html: &str) -> String {
    format!("{}{}{}", frame.preamble, body_html, frame.epilogue)
}

/// Splits `hm` into chunks using `strategy`, targeting `chunk_target_size`
/// bytes of body content per chunk. Falls back to `size` when `dom` can't
/// find at least 2 breakpoints, per §4.5.
pub fn chunk(hm: &HtmlModel, strategy: ChunkStrategy, chunk_target_size: usize) -> Vec<Chunk> {
    let frame = document_frame(hm);

    let Some(body) = hm.find_first_by_tag("body") else {
        let whole = hm.serialize();
        return chunk_by_size_raw(&whole, chunk_target_size);
    };

    let sections: Vec<NodeId> = match strategy {
        ChunkStrategy::Size => {
            return chunk_by_size(hm, body, &frame, chunk_target_size);
        }
        ChunkStrategy::Section => hm.element_children(body),
        ChunkStrategy::Dom => {
            let breakpoints = dom_breakpoints(hm, body);
            if breakpoints.len() < 2 {
                return chunk(hm, ChunkStrategy::Size, chunk_target_size);
            }
            breakpoints
        }
    };

    if sections.is_empty() {
        let body_html = render_node_children(hm, body);
        return vec![single_chunk(&frame, &body_html)];
    }

    accumulate_sections(hm, &frame, &sections, chunk_target_size)
}

/// Descendants of `body` matching `.container`, found via a real CSS
/// selector rather than a hand-rolled class check — chunking is the one
/// place this crate needs an actual selector query instead of the fixed
/// tag/class navigation `HtmlModel` otherwise exposes.
fn container_descendants(hm: &HtmlModel, body: NodeId) -> Vec<NodeId> {
    let selector = match Selector::parse(".container") {
        Ok(s) => s,
        Err(e) => {
            let err = HtmlError::SelectorError(format!("{e:?}"));
            tracing::warn!(error = %err, "skipping .container scope");
            return Vec::new();
        }
    };
    hm.select(&selector).into_iter().filter(|&n| n != body && hm.ancestors(n, usize::MAX).contains(&body)).collect()
}

/// Picks breakpoints among descendants of `body`, `main`, or `.container`
/// whose tag is in the fixed breakpoint set (§9 Open Question 3).
fn dom_breakpoints(hm: &HtmlModel, body: NodeId) -> Vec<NodeId> {
    let mut scopes = vec![body];
    if let Some(main) = hm.find_first_by_tag("main") {
        scopes.push(main);
    }
    scopes.extend(container_descendants(hm, body));

    let mut out = Vec::new();
    for scope in scopes {
        for child in hm.element_children(scope) {
            if BREAKPOINT_TAGS.contains(&hm.tag_of(child).unwrap_or("")) {
                out.push(child);
            }
        }
    }
    out
}

fn render_node_children(hm: &HtmlModel, node: NodeId) -> String {
    hm.children(node).into_iter().map(|c| render_node(hm, c)).collect()
}

fn single_chunk(frame: &Frame, body_html: &str) -> Chunk {
    Chunk {
        index: 0,
        total: 1,
        is_first: true,
        is_last: true,
        html: frame_chunk(frame, body_html),
        viewport_priority: None,
    }
}

fn accumulate_sections(hm: &HtmlModel, frame: &Frame, sections: &[NodeId], chunk_target_size: usize) -> Vec<Chunk> {
    let mut groups: Vec<String> = Vec::new();
    let mut current = String::new();

    for &section in sections {
        let rendered = render_node(hm, section);
        if !current.is_empty() && current.len() + rendered.len() > chunk_target_size {
            groups.push(std::mem::take(&mut current));
        }
        current.push_str(&rendered);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    if groups.is_empty() {
        groups.push(String::new());
    }

    let total = groups.len();
    groups
        .into_iter()
        .enumerate()
        .map(|(index, body_html)| Chunk {
            index,
            total,
            is_first: index == 0,
            is_last: index == total - 1,
            html: frame_chunk(frame, &body_html),
            viewport_priority: None,
        })
        .collect()
}

fn chunk_by_size(hm: &HtmlModel, body: NodeId, frame: &Frame, chunk_target_size: usize) -> Vec<Chunk> {
    let body_html = render_node_children(hm, body);
    let pieces = cut_at_tag_boundaries(&body_html, chunk_target_size);
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, body_html)| Chunk {
            index,
            total,
            is_first: index == 0,
            is_last: index == total - 1,
            html: frame_chunk(frame, &body_html),
            viewport_priority: None,
        })
        .collect()
}

/// Last-resort chunking over a raw serialized document with no parsed model
/// available (used when the input has no `<body>` at all).
fn chunk_by_size_raw(whole: &str, chunk_target_size: usize) -> Vec<Chunk> {
    let pieces = cut_at_tag_boundaries(whole, chunk_target_size);
    let total = pieces.len().max(1);
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, html)| Chunk {
            index,
            total,
            is_first: index == 0,
            is_last: index == total - 1,
            html,
            viewport_priority: None,
        })
        .collect()
}

/// Cuts `s` at the first `>` at or past each `chunk_target_size` increment,
/// so no tag is ever split across chunks.
fn cut_at_tag_boundaries(s: &str, chunk_target_size: usize) -> Vec<String> {
    if s.is_empty() {
        return vec![String::new()];
    }
    let bytes = s.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0usize;
    while start < bytes.len() {
        let mut cut = (start + chunk_target_size).min(bytes.len());
        if cut < bytes.len() {
            while cut < bytes.len() && bytes[cut - 1] != b'>' {
                cut += 1;
            }
        }
        pieces.push(s[start..cut].to_string());
        start = cut;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html_model::HtmlModel;

    #[test]
    fn single_section_document_yields_one_chunk() {
        let src = "<!doctype html><html><head><title>T</title></head><body><p>hi</p></body></html>";
        let hm = HtmlModel::parse(src);
        let chunks = chunk(&hm, ChunkStrategy::Section, 500 * 1024);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_first && chunks[0].is_last);
        assert!(chunks[0].html.contains("hi"));
    }

    #[test]
    fn section_strategy_splits_on_byte_budget() {
        let mut src = String::from("<html><body>");
        for i in 0..10 {
            src.push_str(&format!("<section id=\"s{i}\">{}</section>", "x".repeat(60 * 1024)));
        }
        src.push_str("</body></html>");
        let hm = HtmlModel::parse(&src);
        let chunks = chunk(&hm, ChunkStrategy::Section, 200 * 1024);
        assert!(chunks.len() >= 3 && chunks.len() <= 4);
        assert!(chunks.first().unwrap().is_first);
        assert!(chunks.last().unwrap().is_last);
    }

    #[test]
    fn dom_strategy_finds_breakpoints_inside_a_container_class() {
        let src = format!(
            "<html><body><div class=\"container\"><section id=\"s0\">{}</section><article id=\"s1\">{}</article></div></body></html>",
            "a".repeat(4096),
            "b".repeat(4096),
        );
        let hm = HtmlModel::parse(&src);
        let chunks = chunk(&hm, ChunkStrategy::Dom, 1024);
        assert!(chunks.len() >= 2, "expected the .container's section/article children to be found as breakpoints");
    }

    #[test]
    fn dom_strategy_falls_back_to_size_with_few_breakpoints() {
        let src = "<html><body><p>only a paragraph, no block children</p></body></html>";
        let hm = HtmlModel::parse(src);
        let chunks = chunk(&hm, ChunkStrategy::Dom, 500 * 1024);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn chunks_preserve_document_order() {
        let src = "<html><body><div id=\"a\">1</div><div id=\"b\">2</div><div id=\"c\">3</div></body></html>";
        let hm = HtmlModel::parse(src);
        let chunks = chunk(&hm, ChunkStrategy::Section, 1);
        let joined: String = chunks.iter().map(|c| c.html.as_str()).collect();
        let pos_a = joined.find("id=\"a\"").unwrap();
        let pos_b = joined.find("id=\"b\"").unwrap();
        let pos_c = joined.find("id=\"c\"").unwrap();
        assert!(pos_a < pos_b && pos_b < pos_c);
    }

    #[test]
    fn no_body_falls_back_to_raw_size_chunking() {
        let src = "just some text with <b>markup</b> and no html wrapper";
        let hm = HtmlModel::parse(src);
        let chunks = chunk(&hm, ChunkStrategy::Section, 10);
        assert!(!chunks.is_empty());
        assert!(chunks.last().unwrap().is_last);
    }

    #[test]
    fn script_content_is_not_html_escaped() {
        let src = r#"<html><body><script>if (a < b) { console.log("x&y"); }</script></body></html>"#;
        let hm = HtmlModel::parse(src);
        let chunks = chunk(&hm, ChunkStrategy::Section, 500 * 1024);
        let out: String = chunks.iter().map(|c| c.html.as_str()).collect();
        assert!(out.contains(r#"if (a < b) { console.log("x&y"); }"#));
        assert!(!out.contains("&lt;"));
    }

    #[test]
    fn style_content_is_not_html_escaped() {
        let src = "<html><body><style>a > b { color: red; }</style></body></html>";
        let hm = HtmlModel::parse(src);
        let chunks = chunk(&hm, ChunkStrategy::Section, 500 * 1024);
        let out: String = chunks.iter().map(|c| c.html.as_str()).collect();
        assert!(out.contains("a > b { color: red; }"));
    }

    #[test]
    fn ordinary_element_text_is_still_escaped() {
        let src = "<html><body><p>a < b</p></body></html>";
        let hm = HtmlModel::parse(src);
        let chunks = chunk(&hm, ChunkStrategy::Section, 500 * 1024);
        let out: String = chunks.iter().map(|c| c.html.as_str()).collect();
        assert!(out.contains("a &lt; b"));
    }
}
