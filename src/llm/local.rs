//! Deterministic local provider
//!
//! No network, no key. Replies are picked from small per-topic tables by
//! keyword scan, so the same input always yields the same output. Used
//! for offline runs and by the test suite; confidence reflects how much
//! of the message the tagger understood, which exercises both sides of
//! the low-confidence review path.

use anyhow::Result;
use async_trait::async_trait;

use super::{Generator, Reply};
use crate::context::tagging;

pub struct LocalGenerator;

impl LocalGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn canned_reply(topic: Option<&str>, intent: Option<&str>) -> &'static str {
    match (topic, intent) {
        (Some("financial"), Some("question")) => {
            "Markets move on supply and demand; check the latest quote before acting."
        }
        (Some("financial"), _) => {
            "For investment decisions, review recent price history and volume trends."
        }
        (Some("support"), Some("complaint")) => {
            "Sorry for the trouble. Restarting the session resolves most reported issues."
        }
        (Some("support"), _) => {
            "Happy to help. Could you share the exact steps that led you here?"
        }
        (None, Some("question")) => "Good question; could you give a bit more detail?",
        _ => "Thanks for the message. Tell me more and I'll do my best.",
    }
}

#[async_trait]
impl Generator for LocalGenerator {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(&self, prompt: &str) -> Result<Reply> {
        let topic = tagging::detect_topic(prompt);
        let intent = tagging::detect_intent(prompt);

        let confidence = match (topic.is_some(), intent.is_some()) {
            (true, true) => 0.9,
            (true, false) | (false, true) => 0.75,
            (false, false) => 0.4,
        };

        Ok(Reply {
            text: canned_reply(topic, intent).to_string(),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_output() {
        let generator = LocalGenerator::new();
        let first = generator.generate("What is the stock price?").await.unwrap();
        let second = generator.generate("What is the stock price?").await.unwrap();
        assert_eq!(first.text, second.text);
        assert_eq!(first.confidence, second.confidence);
    }

    #[tokio::test]
    async fn confidence_tracks_tag_coverage() {
        let generator = LocalGenerator::new();
        let both = generator.generate("What is the stock price?").await.unwrap();
        let neither = generator.generate("good morning").await.unwrap();
        assert!(both.confidence > neither.confidence);
        assert!(neither.confidence < 0.8, "untagged input should fall below the review threshold");
    }
}
