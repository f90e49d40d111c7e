//! Topic and intent tagging
//!
//! A fixed-priority keyword scan, not a classifier. Rules are evaluated in
//! declaration order and the first matching tag wins; downstream prompt
//! enrichment depends on these exact lists and their order.

/// Topic rules, highest priority first.
const TOPIC_RULES: &[(&str, &[&str])] = &[
    (
        "financial",
        &["stock", "price", "market", "invest", "trading"],
    ),
    ("support", &["help", "issue", "problem", "error", "how to"]),
];

/// Intent rules, highest priority first.
const INTENT_RULES: &[(&str, &[&str])] = &[
    ("question", &["what", "how", "why", "when", "where", "?"]),
    ("request", &["can you", "please", "could you"]),
    ("complaint", &["not working", "broken", "error", "issue"]),
];

fn first_match(rules: &[(&'static str, &[&str])], message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    rules
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(tag, _)| *tag)
}

/// Detect the topic of a user message, if any rule matches.
pub fn detect_topic(message: &str) -> Option<&'static str> {
    first_match(TOPIC_RULES, message)
}

/// Detect the intent of a user message, if any rule matches.
pub fn detect_intent(message: &str) -> Option<&'static str> {
    first_match(INTENT_RULES, message)
}
