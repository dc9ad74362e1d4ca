use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::insights::TextGenerator;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODELS: [&str; 4] = [
    "llama3-8b-8192",
    "mixtral-8x7b-32768",
    "gemma-7b-it",
    "llama3-70b-8192",
];

const SYSTEM_PROMPT: &str = "You are an expert coastal environmental analyst specializing in \
satellite data interpretation, climate change impacts and disaster management. Provide detailed, \
actionable insights for coastal monitoring and emergency response.";

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            top_p: 0.8,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pulls the first choice's text out of a chat-completions body.
fn extract_content(body: &str) -> Result<String> {
    let response: ChatResponse =
        serde_json::from_str(body).context("Failed to parse chat completion response")?;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(anyhow!("Chat completion contained no text"));
    }
    Ok(content)
}

/// Blocking client for an OpenAI-compatible chat-completions endpoint (Groq by default).
pub struct GroqClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    sampling: SamplingParams,
}

impl GroqClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        sampling: SamplingParams,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("coastal-sentinel/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            sampling,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl TextGenerator for GroqClient {
    fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_tokens,
            top_p: self.sampling.top_p,
            stream: false,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .with_context(|| format!("Request to {} failed", self.endpoint()))?;

        let status = response.status();
        let body = response
            .text()
            .context("Failed to read chat completion body")?;
        if !status.is_success() {
            return Err(anyhow!(
                "HTTP {} from chat completions: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            ));
        }

        tracing::debug!("Chat completion from {} ({} bytes)", model, body.len());
        extract_content(&body)
    }

    fn provider_name(&self) -> &str {
        "Groq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content() {
        let body = r#"{"id":"x","choices":[
            {"index":0,"message":{"role":"assistant","content":"Erosion is visible."}}
        ]}"#;
        assert_eq!(extract_content(body).unwrap(), "Erosion is visible.");
    }

    #[test]
    fn test_extract_content_rejects_empty() {
        assert!(extract_content(r#"{"choices":[]}"#).is_err());
        assert!(extract_content(r#"{"choices":[{"message":{"content":"  "}}]}"#).is_err());
        assert!(extract_content(r#"{"choices":[{"message":{"content":null}}]}"#).is_err());
        assert!(extract_content("not json").is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest {
            model: "llama3-8b-8192",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.7,
            max_tokens: 1024,
            top_p: 0.8,
            stream: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "llama3-8b-8192");
        assert_eq!(value["max_tokens"], 1024);
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = GroqClient::new(
            "https://example.test/v1/",
            "key".to_string(),
            SamplingParams::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.endpoint(), "https://example.test/v1/chat/completions");
    }
}
