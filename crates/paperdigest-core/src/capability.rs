use async_trait::async_trait;

use crate::error::Result;
use crate::models::Work;

/// Text generation used to digest a work. One resolved capability is shared
/// by every work in a run.
#[async_trait]
pub trait InferenceCapability: Send + Sync {
    /// Human-readable backend name, e.g. `anthropic:claude-sonnet-4`.
    fn name(&self) -> &str;

    async fn summarize(&self, work: &Work) -> Result<String>;

    async fn translate(&self, text: &str) -> Result<String>;
}
