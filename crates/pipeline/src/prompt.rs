//! Chat prompt template
//!
//! Two-message template: a configured system prompt plus the fixed human
//! message carrying the question and packed context. The rendered value is
//! returned to the caller; this crate never invokes a model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Fully rendered prompt value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPrompt {
    messages: Vec<ChatMessage>,
}

impl ChatPrompt {
    pub fn to_messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// System + human template pair.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    system: String,
}

impl PromptTemplate {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
        }
    }

    pub fn render(&self, question: &str, context: &str) -> ChatPrompt {
        ChatPrompt {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: self.system.clone(),
                },
                ChatMessage {
                    role: Role::Human,
                    content: format!("질문: {question}\n\nContext:\n{context}\n\n답변:"),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_two_messages() {
        let template = PromptTemplate::new("system instructions");
        let prompt = template.render("무엇인가요?", "[Doc1]\nalpha\n");

        let messages = prompt.to_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "system instructions");
        assert_eq!(messages[1].role, Role::Human);
        assert!(messages[1].content.starts_with("질문: 무엇인가요?"));
        assert!(messages[1].content.contains("Context:\n[Doc1]"));
        assert!(messages[1].content.ends_with("답변:"));
    }
}
