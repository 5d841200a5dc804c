//! LLM backends.
//!
//!   AnthropicBackend   : Anthropic Messages API
//!   OpenAiBackend      : OpenAI chat completions
//!   GeminiBackend      : Google Gemini generateContent
//!   OllamaBackend      : local Ollama-compatible server
//!   AssistantCliBackend: local assistant CLI in print mode

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{LlmError, Result};

// ── Request / Response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String, // "system" | "user" | "assistant"
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
    }

    fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != "system")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse>;
    fn provider(&self) -> &str;
    fn model_id(&self) -> &str;
    fn is_local(&self) -> bool;
}

async fn check_response_status(resp: reqwest::Response) -> Result<serde_json::Value> {
    let status = resp.status().as_u16();
    let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
    if status >= 400 {
        let message = body["error"]["message"]
            .as_str()
            .or_else(|| body["error"].as_str())
            .or_else(|| body["message"].as_str())
            .unwrap_or("unknown API error")
            .to_string();
        return Err(LlmError::ApiError { status, message });
    }
    Ok(body)
}

fn non_empty(content: Option<&str>) -> Result<String> {
    match content.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(LlmError::EmptyResponse),
    }
}

fn openai_messages(req: &LlmRequest) -> Vec<serde_json::Value> {
    req.messages
        .iter()
        .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
        .collect()
}

// ── 1. Anthropic ──────────────────────────────────────────────────────────────

pub struct AnthropicBackend {
    pub model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: "https://api.anthropic.com".into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse> {
        let messages: Vec<serde_json::Value> = req
            .conversation()
            .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();
        let mut body = serde_json::json!({
            "model":      &self.model,
            "messages":   messages,
            "max_tokens": req.max_tokens.unwrap_or(4096),
        });
        if let Some(system) = req.system_prompt() {
            body["system"] = serde_json::Value::String(system.to_string());
        }

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;
        let json = check_response_status(resp).await?;

        Ok(LlmResponse {
            content: non_empty(json["content"][0]["text"].as_str())?,
            model: json["model"].as_str().unwrap_or(&self.model).to_string(),
        })
    }

    fn provider(&self) -> &str {
        "anthropic"
    }
    fn model_id(&self) -> &str {
        &self.model
    }
    fn is_local(&self) -> bool {
        false
    }
}

// ── 2. OpenAI ─────────────────────────────────────────────────────────────────

pub struct OpenAiBackend {
    pub model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: "https://api.openai.com".into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse> {
        let body = serde_json::json!({
            "model":       &self.model,
            "messages":    openai_messages(&req),
            "max_tokens":  req.max_tokens.unwrap_or(4096),
            "temperature": req.temperature.unwrap_or(0.2),
        });
        let resp = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let json = check_response_status(resp).await?;

        Ok(LlmResponse {
            content: non_empty(json["choices"][0]["message"]["content"].as_str())?,
            model: json["model"].as_str().unwrap_or(&self.model).to_string(),
        })
    }

    fn provider(&self) -> &str {
        "openai"
    }
    fn model_id(&self) -> &str {
        &self.model
    }
    fn is_local(&self) -> bool {
        false
    }
}

// ── 3. Google Gemini ──────────────────────────────────────────────────────────

pub struct GeminiBackend {
    pub model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let contents: Vec<serde_json::Value> = req
            .conversation()
            .map(|m| {
                let role = if m.role == "assistant" { "model" } else { "user" };
                serde_json::json!({"role": role, "parts": [{ "text": m.content }]})
            })
            .collect();
        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": req.max_tokens.unwrap_or(4096),
                "temperature":     req.temperature.unwrap_or(0.2),
            }
        });
        if let Some(system) = req.system_prompt() {
            body["systemInstruction"] = serde_json::json!({"parts": [{ "text": system }]});
        }

        let resp = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;
        let json = check_response_status(resp).await?;

        Ok(LlmResponse {
            content: non_empty(json["candidates"][0]["content"]["parts"][0]["text"].as_str())?,
            model: self.model.clone(),
        })
    }

    fn provider(&self) -> &str {
        "gemini"
    }
    fn model_id(&self) -> &str {
        &self.model
    }
    fn is_local(&self) -> bool {
        false
    }
}

// ── 4. Ollama (local) ─────────────────────────────────────────────────────────

pub struct OllamaBackend {
    pub base_url: String,
    pub model: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model":       &self.model,
            "messages":    openai_messages(&req),
            "max_tokens":  req.max_tokens.unwrap_or(4096),
            "temperature": req.temperature.unwrap_or(0.2),
        });
        let resp = self.client.post(&url).json(&body).send().await?;
        let json = check_response_status(resp).await?;

        Ok(LlmResponse {
            content: non_empty(json["choices"][0]["message"]["content"].as_str())?,
            model: json["model"].as_str().unwrap_or(&self.model).to_string(),
        })
    }

    fn provider(&self) -> &str {
        "ollama"
    }
    fn model_id(&self) -> &str {
        &self.model
    }
    fn is_local(&self) -> bool {
        true
    }
}

// ── 5. Assistant CLI ──────────────────────────────────────────────────────────

/// Runs the assistant in non-interactive print mode, prompt on stdin.
pub struct AssistantCliBackend {
    pub command: String,
}

impl AssistantCliBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl LlmBackend for AssistantCliBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse> {
        let mut prompt = String::new();
        if let Some(system) = req.system_prompt() {
            prompt.push_str(system);
            prompt.push_str("\n\n");
        }
        for message in req.conversation() {
            prompt.push_str(&message.content);
            prompt.push('\n');
        }

        let mut child = tokio::process::Command::new(&self.command)
            .arg("-p")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LlmError::Process(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(LlmResponse {
            content: non_empty(Some(stdout.as_ref()))?,
            model: self.command.clone(),
        })
    }

    fn provider(&self) -> &str {
        "assistant"
    }
    fn model_id(&self) -> &str {
        &self.command
    }
    fn is_local(&self) -> bool {
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        LlmRequest {
            messages: vec![Message::system("Be brief."), Message::user("Summarize X.")],
            max_tokens: Some(128),
            temperature: None,
        }
    }

    #[test]
    fn test_backend_identity() {
        assert!(!AnthropicBackend::new("k", "claude-sonnet-4").is_local());
        assert_eq!(OpenAiBackend::new("k", "gpt-4o-mini").provider(), "openai");
        assert_eq!(GeminiBackend::new("k", "gemini-2.0-flash").model_id(), "gemini-2.0-flash");
        assert!(OllamaBackend::new("http://localhost:11434", "llama3.1").is_local());
    }

    #[tokio::test]
    async fn test_anthropic_splits_system_prompt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "sk-ant")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "system": "Be brief.",
                "messages": [{"role": "user", "content": "Summarize X."}],
            })))
            .with_body(r#"{"model":"claude-x","content":[{"type":"text","text":" Done. "}]}"#)
            .create_async()
            .await;

        let backend = AnthropicBackend::new("sk-ant", "claude-x").with_base_url(server.url());
        let resp = backend.complete(request()).await.unwrap();
        assert_eq!(resp.content, "Done.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_openai_error_message_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"quota exceeded"}}"#)
            .create_async()
            .await;

        let backend = OpenAiBackend::new("sk", "gpt-4o-mini").with_base_url(server.url());
        match backend.complete(request()).await {
            Err(LlmError::ApiError { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gemini_passes_key_as_query() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1beta/models/gemini-2.0-flash:generateContent")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "g-key".into()))
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#)
            .create_async()
            .await;

        let backend = GeminiBackend::new("g-key", "gemini-2.0-flash").with_base_url(server.url());
        assert_eq!(backend.complete(request()).await.unwrap().content, "ok");
    }

    #[tokio::test]
    async fn test_empty_completion_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_body(r#"{"choices":[{"message":{"content":"   "}}]}"#)
            .create_async()
            .await;

        let backend = OllamaBackend::new(server.url(), "llama3.1");
        assert!(matches!(
            backend.complete(request()).await,
            Err(LlmError::EmptyResponse)
        ));
    }
}
