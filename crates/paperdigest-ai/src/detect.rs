//! Backend auto-detection: a resolution chain over the ways a backend can
//! be reached, tried in configured order.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use paperdigest_core::{
    Applicability, BackendConfig, CredentialSlot, DigestError, InferenceCapability,
    ResolutionChain, Signature, Strategy, StrategyOutcome,
};
use serde::Deserialize;

use crate::backend::{
    AnthropicBackend, AssistantCliBackend, GeminiBackend, LlmBackend, OllamaBackend, OpenAiBackend,
};
use crate::capability::LlmCapability;

pub type BackendChain = ResolutionChain<DetectionContext, Arc<dyn InferenceCapability>>;

/// Where credentials come from. The environment in production, a map in
/// tests.
pub trait CredentialSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl CredentialSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

pub struct DetectionContext {
    pub config: BackendConfig,
    pub credentials: Arc<dyn CredentialSource>,
}

impl DetectionContext {
    pub fn new(config: BackendConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            config,
            credentials,
        }
    }

    pub fn from_env(config: BackendConfig) -> Self {
        Self::new(config, Arc::new(EnvCredentials))
    }

    fn capability(&self, backend: Arc<dyn LlmBackend>) -> Arc<dyn InferenceCapability> {
        Arc::new(LlmCapability::new(backend, &self.config))
    }
}

/// Build the detection chain in `[backend].order`. Every probe is bounded by
/// the configured probe timeout.
pub fn backend_chain(config: &BackendConfig) -> paperdigest_core::Result<BackendChain> {
    let mut builder = ResolutionChain::builder("backend").default_timeout(config.probe_timeout());
    for name in &config.order {
        builder = match name.as_str() {
            "assistant" => builder.strategy(AssistantProbe),
            "credentials" => builder.strategy(CredentialProbe),
            "local" => builder.strategy(LocalServerProbe::new()),
            other => {
                return Err(DigestError::Config(format!(
                    "unknown backend strategy '{other}' in [backend].order"
                )));
            }
        };
    }
    builder.build()
}

// ── assistant ─────────────────────────────────────────────────────────────────

pub struct AssistantProbe;

#[async_trait]
impl Strategy<DetectionContext, Arc<dyn InferenceCapability>> for AssistantProbe {
    fn name(&self) -> &str {
        "assistant"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["assistant_command"], "capability")
    }

    fn applicability(&self, ctx: &DetectionContext) -> Applicability {
        Applicability::when(
            !ctx.config.assistant_command.trim().is_empty(),
            "no assistant command configured",
        )
    }

    async fn attempt(&self, ctx: &DetectionContext) -> StrategyOutcome<Arc<dyn InferenceCapability>> {
        let command = ctx.config.assistant_command.trim();
        let output = tokio::process::Command::new(command)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => {
                let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
                tracing::debug!(%command, %version, "assistant CLI found");
                StrategyOutcome::Success(ctx.capability(Arc::new(AssistantCliBackend::new(command))))
            }
            Ok(out) => StrategyOutcome::soft(format!("`{command} --version` exited with {}", out.status)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                StrategyOutcome::soft(format!("`{command}` not found on PATH"))
            }
            Err(err) => StrategyOutcome::soft(format!("`{command}` could not be started: {err}")),
        }
    }
}

// ── credentials ───────────────────────────────────────────────────────────────

pub struct CredentialProbe;

impl CredentialProbe {
    fn backend_for(slot: &CredentialSlot, key: String) -> Option<Arc<dyn LlmBackend>> {
        let backend: Arc<dyn LlmBackend> = match slot.provider.to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Arc::new(AnthropicBackend::new(key, &slot.model)),
            "openai" => Arc::new(OpenAiBackend::new(key, &slot.model)),
            "gemini" | "google" => Arc::new(GeminiBackend::new(key, &slot.model)),
            _ => return None,
        };
        Some(backend)
    }
}

#[async_trait]
impl Strategy<DetectionContext, Arc<dyn InferenceCapability>> for CredentialProbe {
    fn name(&self) -> &str {
        "credentials"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["credential_slots"], "capability")
    }

    fn applicability(&self, ctx: &DetectionContext) -> Applicability {
        Applicability::when(
            !ctx.config.credential_slots.is_empty(),
            "no credential slots configured",
        )
    }

    /// First slot with a non-empty value and a supported provider wins; slot
    /// order is fixed by config.
    async fn attempt(&self, ctx: &DetectionContext) -> StrategyOutcome<Arc<dyn InferenceCapability>> {
        let mut unsupported = Vec::new();
        for slot in &ctx.config.credential_slots {
            let Some(key) = ctx
                .credentials
                .get(&slot.env)
                .filter(|k| !k.trim().is_empty())
            else {
                continue;
            };
            let Some(backend) = Self::backend_for(slot, key.trim().to_string()) else {
                tracing::warn!(env = %slot.env, provider = %slot.provider, "credential set for unsupported provider, skipping");
                unsupported.push(format!("{} (provider '{}' not supported)", slot.env, slot.provider));
                continue;
            };
            tracing::debug!(env = %slot.env, provider = %slot.provider, "credential found");
            return StrategyOutcome::Success(ctx.capability(backend));
        }
        if !unsupported.is_empty() {
            return StrategyOutcome::soft(format!("no usable credential: {}", unsupported.join(", ")));
        }
        let names: Vec<&str> = ctx
            .config
            .credential_slots
            .iter()
            .map(|s| s.env.as_str())
            .collect();
        StrategyOutcome::soft(format!("none of {} is set", names.join(", ")))
    }
}

// ── local ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

pub struct LocalServerProbe {
    client: reqwest::Client,
}

impl LocalServerProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for LocalServerProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy<DetectionContext, Arc<dyn InferenceCapability>> for LocalServerProbe {
    fn name(&self) -> &str {
        "local"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["local_url"], "capability")
    }

    fn applicability(&self, ctx: &DetectionContext) -> Applicability {
        Applicability::when(
            !ctx.config.local_url.trim().is_empty(),
            "no local server configured",
        )
    }

    async fn attempt(&self, ctx: &DetectionContext) -> StrategyOutcome<Arc<dyn InferenceCapability>> {
        let base = ctx.config.local_url.trim_end_matches('/');
        let response = match self.client.get(format!("{base}/api/tags")).send().await {
            Ok(resp) => resp,
            Err(err) => return StrategyOutcome::soft(format!("{base} unreachable: {err}")),
        };
        if !response.status().is_success() {
            return StrategyOutcome::soft(format!("{base}/api/tags returned {}", response.status()));
        }
        let tags: TagList = match response.json().await {
            Ok(tags) => tags,
            Err(err) => return StrategyOutcome::hard(format!("unexpected /api/tags payload: {err}")),
        };

        let wanted = &ctx.config.local_model;
        let installed = tags
            .models
            .iter()
            .any(|m| m.name == *wanted || m.name.split(':').next() == Some(wanted.as_str()));
        if !installed {
            tracing::warn!(model = %wanted, available = tags.models.len(), "configured local model not listed by server");
            return StrategyOutcome::soft(format!("{base} does not serve model '{wanted}'"));
        }
        StrategyOutcome::Success(ctx.capability(Arc::new(OllamaBackend::new(base, wanted.clone()))))
    }
}
