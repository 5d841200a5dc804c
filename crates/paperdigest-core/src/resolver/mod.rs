//! Ordered fallback resolution.
//!
//! A [`ResolutionChain`] walks a list of [`Strategy`] values in priority order
//! until one yields an artifact. Content acquisition and backend selection are
//! both built on it.

mod chain;
mod outcome;

use async_trait::async_trait;

pub use chain::{ChainBuilder, ResolutionChain};
pub use outcome::{
    Applicability, AttemptRecord, AttemptStatus, Resolution, Signature, SkippedStrategy,
    StrategyOutcome,
};

#[async_trait]
pub trait Strategy<C, A>: Send + Sync
where
    C: Sync + ?Sized,
    A: Send,
{
    /// Unique within a chain.
    fn name(&self) -> &str;

    fn signature(&self) -> Signature;

    fn applicability(&self, _ctx: &C) -> Applicability {
        Applicability::Applicable
    }

    async fn attempt(&self, ctx: &C) -> StrategyOutcome<A>;
}
