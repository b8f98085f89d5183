//! Chunk Renderer (CR): substitutes data into a chunk's template
//! placeholders and returns final HTML.
//!
//! A thin adapter over `handlebars`, carrying no cross-chunk state — the
//! same "one template engine call per unit of work" shape as the teacher's
//! report generator. `render_template` is used rather than a registered,
//! named template, since a chunk's body is only ever rendered once.

use serde::Serialize;

/// Data the driver hands CR besides the caller-supplied data context.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChunkContext {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub is_first_chunk: bool,
    pub is_last_chunk: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkRenderError {
    #[error("template error in chunk: {0}")]
    Template(#[from] handlebars::RenderError),
    #[error("invalid data context: {0}")]
    InvalidContext(#[from] serde_json::Error),
    #[error("chunk render exceeded its per-chunk deadline")]
    Timeout,
}

/// Stateless chunk renderer. Cheap to construct; holds only a registry
/// configured once with the engine's strict-mode/escaping defaults.
pub struct ChunkRenderer {
    registry: handlebars::Handlebars<'static>,
}

impl ChunkRenderer {
    pub fn new() -> Self {
        let mut registry = handlebars::Handlebars::new();
        registry.set_strict_mode(false);
        Self { registry }
    }

    /// Renders `chunk_template` (one chunk's HTML, still carrying any
    /// `{{placeholder}}` markers from the source template) against `data`
    /// merged with `ctx` under a reserved `chunk` key.
    pub fn render(
        &self,
        chunk_template: &str,
        data: &serde_json::Value,
        ctx: &ChunkContext,
    ) -> Result<String, ChunkRenderError> {
        let mut merged = data.clone();
        if !merged.is_object() {
            merged = serde_json::json!({ "data": merged });
        }
        merged["chunk"] = serde_json::to_value(ctx)?;
        Ok(self.registry.render_template(chunk_template, &merged)?)
    }
}

impl Default for ChunkRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_placeholders_from_data() {
        let cr = ChunkRenderer::new();
        let ctx = ChunkContext { chunk_index: 0, total_chunks: 1, is_first_chunk: true, is_last_chunk: true };
        let out = cr
            .render("<p>{{name}}, chunk {{chunk.chunk_index}}/{{chunk.total_chunks}}</p>", &serde_json::json!({"name": "hi"}), &ctx)
            .unwrap();
        assert_eq!(out, "<p>hi, chunk 0/1</p>");
    }

    #[test]
    fn passes_through_html_with_no_placeholders() {
        let cr = ChunkRenderer::new();
        let ctx = ChunkContext { chunk_index: 2, total_chunks: 3, is_first_chunk: false, is_last_chunk: false };
        let out = cr.render("<section>static</section>", &serde_json::json!({}), &ctx).unwrap();
        assert_eq!(out, "<section>static</section>");
    }

    #[test]
    fn malformed_template_is_a_chunk_render_error() {
        let cr = ChunkRenderer::new();
        let ctx = ChunkContext { chunk_index: 0, total_chunks: 1, is_first_chunk: true, is_last_chunk: true };
        let result = cr.render("<p>{{#if}}</p>", &serde_json::json!({}), &ctx);
        assert!(result.is_err());
    }
}
