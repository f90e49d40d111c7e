//! Text-generation providers
//!
//! The model itself is an external capability: a provider turns a prompt
//! into reply text plus a confidence score in [0, 1]. The service ships
//! an OpenAI-compatible HTTP provider and a deterministic local provider
//! used for offline runs and tests.

mod error;
mod local;
mod openai;
pub mod prompt;

pub use error::LlmError;
pub use local::LocalGenerator;
pub use openai::OpenAiGenerator;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::LlmConfig;

/// A generated reply and the provider's confidence in it.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    /// In [0, 1]; drives the low-confidence human-review path
    pub confidence: f32,
}

/// Trait for text-generation providers
#[async_trait]
pub trait Generator: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Generate a reply for a fully assembled prompt
    async fn generate(&self, prompt: &str) -> Result<Reply>;
}

/// Create a provider by name
pub fn create_generator(name: &str, config: &LlmConfig) -> Result<Box<dyn Generator>> {
    match name {
        "openai" => Ok(Box::new(OpenAiGenerator::new(&config.openai)?)),
        "local" => Ok(Box::new(LocalGenerator::new())),
        other => anyhow::bail!("Unknown provider: {}. Use: openai or local", other),
    }
}
