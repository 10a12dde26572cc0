//! Shared message-transform helpers (§4.5 "Anthropic transform" / "Mistral
//! transform").
//!
//! Each adapter applies its own provider-specific transform in its
//! `build_*_body` method; this module holds the few pieces of that logic
//! that are not provider-specific and so are shared across adapters.

use ax_domain::tool::Message;

/// Drop messages with no meaningful content.
///
/// Some providers (Anthropic in particular) reject a request containing a
/// message with an empty `content` array or empty string — this happens in
/// practice when a tool-call turn produces no visible text. Filtering these
/// out before building the wire request avoids a 400 from the provider.
pub fn drop_empty_content_messages(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| !m.is_empty_content()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax_domain::tool::{ContentPart, MessageContent, Role};

    #[test]
    fn drops_empty_text_and_empty_parts() {
        let messages = vec![
            Message::user("hi"),
            Message::assistant(""),
            Message { role: Role::Assistant, content: MessageContent::Parts(vec![]) },
            Message { role: Role::Assistant, content: MessageContent::Parts(vec![ContentPart::Text { text: "ok".into() }]) },
        ];
        let kept = drop_empty_content_messages(&messages);
        assert_eq!(kept.len(), 2);
    }
}
