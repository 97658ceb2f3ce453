//! Prompt rendering.
//!
//! Formatting only; retention policy lives in the store. Sections always
//! come in the same order, whatever order things were added in:
//!
//! ```text
//! INSTRUCTIONS:
//! ...
//!
//! ARTICLE CONTEXT:
//! ...
//!
//! CONVERSATION:
//! User: ...
//!
//! Assistant: ...
//!
//! Assistant:
//! ```

use crate::context::store::ContextSnapshot;

/// Section headers and the trailing cue used when rendering.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    pub instructions_header: String,
    pub article_header: String,
    pub conversation_header: String,
    pub assistant_cue: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            instructions_header: "INSTRUCTIONS:".into(),
            article_header: "ARTICLE CONTEXT:".into(),
            conversation_header: "CONVERSATION:".into(),
            assistant_cue: "Assistant:".into(),
        }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render a snapshot. Blank instructions are left out.
    pub fn render(&self, snapshot: &ContextSnapshot, instructions: Option<&str>) -> String {
        let mut sections = Vec::with_capacity(4);

        if let Some(instructions) = instructions.map(str::trim).filter(|i| !i.is_empty()) {
            sections.push(format!("{}\n{instructions}", self.instructions_header));
        }

        if let Some(article) = &snapshot.article {
            sections.push(format!("{}\n{}", self.article_header, article.content));
        }

        if !snapshot.messages.is_empty() {
            let conversation = snapshot
                .messages
                .iter()
                .map(|m| format!("{}: {}", m.role.label(), m.content))
                .collect::<Vec<_>>()
                .join("\n\n");
            sections.push(format!("{}\n{conversation}", self.conversation_header));
        }

        sections.push(self.assistant_cue.clone());
        sections.join("\n\n")
    }
}
