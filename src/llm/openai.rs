//! OpenAI-compatible provider
//!
//! The API key is read from OPENAI_API_KEY and only ever sent to the
//! official endpoint. Confidence is derived from returned token logprobs
//! when the upstream supplies them; the raw logits the original scoring
//! used are not exposed over HTTP.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;

use super::{Generator, LlmError, Reply};
use crate::config::OpenAiConfig;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Confidence reported when the upstream returns no logprobs.
const FALLBACK_CONFIDENCE: f32 = 0.7;

pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    top_p: f32,
    logprobs: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    logprobs: Option<Logprobs>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Logprobs {
    #[serde(default)]
    content: Option<Vec<TokenLogprob>>,
}

#[derive(Deserialize)]
struct TokenLogprob {
    logprob: f64,
}

impl OpenAiGenerator {
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let api_key =
            env::var("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable not set")?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        })
    }

    fn confidence_from(choice: &Choice) -> f32 {
        let Some(tokens) = choice
            .logprobs
            .as_ref()
            .and_then(|lp| lp.content.as_ref())
            .filter(|tokens| !tokens.is_empty())
        else {
            return FALLBACK_CONFIDENCE;
        };

        let mean = tokens.iter().map(|t| t.logprob).sum::<f64>() / tokens.len() as f64;
        (mean.exp() as f32).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> Result<Reply> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            logprobs: true,
        };

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_network_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_http_status(status, body).into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .context("Chat completion returned no choices")?;
        let confidence = Self::confidence_from(&choice);
        let text = choice.message.content.unwrap_or_default();

        Ok(Reply { text, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_falls_back_without_logprobs() {
        let choice = Choice {
            message: ResponseMessage {
                content: Some("hi".to_string()),
            },
            logprobs: None,
        };
        assert_eq!(OpenAiGenerator::confidence_from(&choice), FALLBACK_CONFIDENCE);
    }

    #[test]
    fn confidence_is_mean_token_probability() {
        let choice = Choice {
            message: ResponseMessage { content: None },
            logprobs: Some(Logprobs {
                content: Some(vec![
                    TokenLogprob { logprob: 0.0 },
                    TokenLogprob { logprob: 0.0 },
                ]),
            }),
        };
        // exp(0) = 1.0
        assert!((OpenAiGenerator::confidence_from(&choice) - 1.0).abs() < f32::EPSILON);
    }
}
