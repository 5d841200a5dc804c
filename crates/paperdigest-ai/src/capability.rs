//! The inference capability handed to the pipeline: summarize and translate
//! on top of whichever backend detection selected.

use std::sync::Arc;

use async_trait::async_trait;
use paperdigest_core::{BackendConfig, ContentKind, InferenceCapability, Work};

use crate::backend::{LlmBackend, LlmRequest, Message};

/// Body text beyond this many characters is cut before prompting.
const MAX_BODY_CHARS: usize = 10_000;
const MAX_LISTED_AUTHORS: usize = 5;

pub struct LlmCapability {
    backend: Arc<dyn LlmBackend>,
    name: String,
    language: String,
    max_tokens: u32,
}

impl LlmCapability {
    pub fn new(backend: Arc<dyn LlmBackend>, config: &BackendConfig) -> Self {
        let name = format!("{}:{}", backend.provider(), backend.model_id());
        Self {
            backend,
            name,
            language: config.summary_language.clone(),
            max_tokens: config.max_tokens,
        }
    }

    async fn generate(&self, system: String, prompt: String) -> paperdigest_core::Result<String> {
        let request = LlmRequest {
            messages: vec![Message::system(system), Message::user(prompt)],
            max_tokens: Some(self.max_tokens),
            temperature: Some(0.2),
        };
        tracing::debug!(backend = %self.name, "inference request");
        self.backend
            .complete(request)
            .await
            .map(|resp| resp.content)
            .map_err(|err| err.into_digest(&self.name))
    }
}

#[async_trait]
impl InferenceCapability for LlmCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn summarize(&self, work: &Work) -> paperdigest_core::Result<String> {
        let system = format!(
            "You are an expert reader of bioinformatics and machine learning papers. \
             Summarize papers clearly in {}. Keep technical terms in English in parentheses.",
            self.language
        );
        self.generate(system, summary_prompt(work, &self.language)).await
    }

    async fn translate(&self, text: &str) -> paperdigest_core::Result<String> {
        let system = format!(
            "You translate scientific abstracts into {}. Keep gene, protein and \
             algorithm names, statistics and p-values exactly as written.",
            self.language
        );
        let prompt = format!(
            "Translate the following abstract sentence by sentence. For each sentence \
             output a line starting with [EN] holding the original sentence, then a line \
             starting with [TR] holding the translation.\n\n## Abstract\n{text}"
        );
        self.generate(system, prompt).await
    }
}

fn summary_prompt(work: &Work, language: &str) -> String {
    let mut authors = work
        .authors
        .iter()
        .take(MAX_LISTED_AUTHORS)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if work.authors.len() > MAX_LISTED_AUTHORS {
        authors.push_str(", et al.");
    }

    let body = match work.content_of(ContentKind::FullText) {
        Some(paperdigest_core::ContentArtifact::FullText { text }) => {
            let mut body: String = text.chars().take(MAX_BODY_CHARS).collect();
            if text.chars().count() > MAX_BODY_CHARS {
                body.push_str("\n... (truncated)");
            }
            body
        }
        _ => "(no full text available; summarize from the abstract)".to_string(),
    };

    let figures = work
        .content_of(ContentKind::Figures)
        .and_then(|artifact| artifact.as_figures())
        .map(|set| {
            set.figures
                .iter()
                .map(|f| match &f.caption {
                    Some(caption) => format!("- {}: {caption}", f.label),
                    None => format!("- {}", f.label),
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|list| !list.is_empty())
        .unwrap_or_else(|| "(none)".to_string());

    format!(
        "Summarize the following paper in {language}.\n\n\
         ## Paper\n\
         - Title: {title}\n\
         - Journal: {journal}\n\
         - Authors: {authors}\n\n\
         ## Abstract\n{abstract_text}\n\n\
         ## Body (excerpt)\n{body}\n\n\
         ## Figures\n{figures}\n\n\
         ---\n\n\
         Use this structure:\n\
         ### Key Findings\n- 1-3 bullet points\n\
         ### Methods\n- main methods and techniques\n\
         ### Significance & Limitations\n- why it matters and where it falls short\n\
         ### One-line Summary\n",
        title = work.title,
        journal = work.journal.as_deref().unwrap_or("(unknown)"),
        abstract_text = work.abstract_text.as_deref().unwrap_or("(no abstract)"),
    )
}
