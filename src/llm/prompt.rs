//! Prompt assembly
//!
//! Folds conversation memory into the text handed to a provider. Only the
//! previous user message, the topic and the intent are carried — the full
//! turn history stays server-side.

use crate::context::ContextSnapshot;

/// Build a prompt for `/chat`, enriching with context when present.
pub fn build_prompt(text: &str, context: Option<&ContextSnapshot>) -> String {
    let mut parts = Vec::new();
    if let Some(ctx) = context {
        if let Some(previous) = ctx.turns.last() {
            parts.push(format!("previous_message: {}", previous.user_message));
        }
        if let Some(topic) = &ctx.topic {
            parts.push(format!("topic: {}", topic));
        }
        if let Some(intent) = &ctx.intent {
            parts.push(format!("user_intent: {}", intent));
        }
    }

    if parts.is_empty() {
        text.to_string()
    } else {
        format!("{}\nCurrent message: {}", parts.join(" "), text)
    }
}

/// Build a prompt for the domain routes, which carry an explicit domain
/// label and ad-hoc context entries instead of stored conversation state.
pub fn build_domain_prompt(domain: &str, query: &str, extras: &[(String, String)]) -> String {
    let mut parts = vec![format!("domain: {}", domain)];
    for (key, value) in extras {
        parts.push(format!("{}: {}", key, value));
    }
    format!("{}\nCurrent message: {}", parts.join(" "), query)
}
