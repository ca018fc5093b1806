//! Mermaid Block Extraction
//!
//! Locates fenced ```mermaid blocks in Markdown and preserves their byte
//! offsets so a repaired chart can be substituted in place without
//! disturbing the rest of the document.

/// One fenced Mermaid block found in a document
#[derive(Debug, Clone, PartialEq)]
pub struct MermaidBlock {
    /// Zero-based index among the document's Mermaid blocks
    pub chart_index: usize,
    /// Chart body, without the fences
    pub body: String,
    /// Byte range of the body within the document (fences excluded)
    pub body_range: (usize, usize),
}

/// Extract every ```mermaid block. Unclosed fences are ignored.
pub fn extract_blocks(document: &str) -> Vec<MermaidBlock> {
    let mut blocks = Vec::new();
    let mut search_from = 0;
    let mut chart_index = 0;

    while let Some(found) = document[search_from..].find("```mermaid") {
        let fence_start = search_from + found;
        let after_fence = fence_start + "```mermaid".len();

        // Body starts after the fence line's newline
        let Some(line_end) = document[after_fence..].find('\n') else {
            break;
        };
        let body_start = after_fence + line_end + 1;

        let Some(close) = document[body_start..].find("```") else {
            break;
        };
        let body_end = body_start + close;

        blocks.push(MermaidBlock {
            chart_index,
            body: document[body_start..body_end].to_string(),
            body_range: (body_start, body_end),
        });
        chart_index += 1;
        search_from = body_end + 3;
    }

    blocks
}

/// Replace one block's body, returning the new document. Offsets of later
/// blocks shift; callers re-extract after each substitution.
pub fn replace_block(document: &str, block: &MermaidBlock, new_body: &str) -> String {
    let mut result = String::with_capacity(document.len());
    result.push_str(&document[..block.body_range.0]);
    result.push_str(new_body.trim_end());
    result.push('\n');
    result.push_str(&document[block.body_range.1..]);
    result
}

/// Pull the chart body out of an LLM repair response: the first
/// ```mermaid fence, or the raw text when the model skipped the fence.
pub fn body_from_response(response: &str) -> Option<String> {
    let blocks = extract_blocks(response);
    if let Some(block) = blocks.first() {
        let body = block.body.trim();
        if body.is_empty() {
            return None;
        }
        return Some(body.to_string());
    }

    let trimmed = response.trim();
    if trimmed.is_empty() || trimmed.contains("```") {
        return None;
    }
    Some(trimmed.to_string())
}
