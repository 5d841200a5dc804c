use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::Strategy;
use super::outcome::{
    Applicability, AttemptRecord, AttemptStatus, Resolution, Signature, SkippedStrategy,
    StrategyOutcome,
};
use crate::error::{DigestError, Result};

struct ChainEntry<C: ?Sized, A> {
    strategy: Arc<dyn Strategy<C, A>>,
    timeout: Option<Duration>,
}

impl<C: ?Sized, A> Clone for ChainEntry<C, A> {
    fn clone(&self) -> Self {
        Self {
            strategy: Arc::clone(&self.strategy),
            timeout: self.timeout,
        }
    }
}

/// An ordered list of strategies tried until one succeeds.
pub struct ResolutionChain<C: ?Sized, A> {
    label: String,
    entries: Vec<ChainEntry<C, A>>,
}

impl<C: ?Sized, A> Clone for ResolutionChain<C, A> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            entries: self.entries.clone(),
        }
    }
}

impl<C, A> ResolutionChain<C, A>
where
    C: Sync + ?Sized,
    A: Send,
{
    pub fn builder(label: impl Into<String>) -> ChainBuilder<C, A> {
        ChainBuilder {
            label: label.into(),
            default_timeout: None,
            entries: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.strategy.name()).collect()
    }

    pub fn signatures(&self) -> Vec<(&str, Signature)> {
        self.entries
            .iter()
            .map(|e| (e.strategy.name(), e.strategy.signature()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Try each strategy in order. The first success ends the walk; later
    /// strategies are never invoked. Strategies that are not applicable are
    /// listed as skipped and leave no attempt record.
    pub async fn resolve(&self, ctx: &C) -> Resolution<A> {
        let mut attempts = Vec::new();
        let mut skipped = Vec::new();

        for entry in &self.entries {
            let name = entry.strategy.name().to_string();

            if let Applicability::NotApplicable(reason) = entry.strategy.applicability(ctx) {
                tracing::trace!(chain = %self.label, strategy = %name, %reason, "strategy not applicable");
                skipped.push(SkippedStrategy {
                    strategy: name,
                    reason,
                });
                continue;
            }

            let started = Instant::now();
            let outcome = match entry.timeout {
                Some(limit) => tokio::time::timeout(limit, entry.strategy.attempt(ctx))
                    .await
                    .unwrap_or_else(|_| {
                        StrategyOutcome::SoftFailure(format!(
                            "timed out after {:.1}s",
                            limit.as_secs_f64()
                        ))
                    }),
                None => entry.strategy.attempt(ctx).await,
            };
            let elapsed = started.elapsed();

            match outcome {
                StrategyOutcome::Success(artifact) => {
                    tracing::debug!(chain = %self.label, strategy = %name, ?elapsed, "strategy succeeded");
                    attempts.push(AttemptRecord {
                        strategy: name.clone(),
                        status: AttemptStatus::Succeeded,
                        elapsed,
                    });
                    return Resolution::Resolved {
                        artifact,
                        strategy: name,
                        attempts,
                        skipped,
                    };
                }
                StrategyOutcome::SoftFailure(reason) => {
                    tracing::debug!(chain = %self.label, strategy = %name, %reason, "strategy found nothing");
                    attempts.push(AttemptRecord {
                        strategy: name,
                        status: AttemptStatus::SoftFailure(reason),
                        elapsed,
                    });
                }
                StrategyOutcome::HardFailure(reason) => {
                    tracing::warn!(chain = %self.label, strategy = %name, %reason, "strategy failed");
                    attempts.push(AttemptRecord {
                        strategy: name,
                        status: AttemptStatus::HardFailure(reason),
                        elapsed,
                    });
                }
            }
        }

        Resolution::Exhausted { attempts, skipped }
    }
}

pub struct ChainBuilder<C: ?Sized, A> {
    label: String,
    default_timeout: Option<Duration>,
    entries: Vec<ChainEntry<C, A>>,
}

impl<C, A> ChainBuilder<C, A>
where
    C: Sync + ?Sized,
    A: Send,
{
    /// Timeout applied to strategies added after this call without their own.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn strategy<S>(self, strategy: S) -> Self
    where
        S: Strategy<C, A> + 'static,
    {
        self.shared(Arc::new(strategy))
    }

    pub fn strategy_with_timeout<S>(mut self, strategy: S, timeout: Duration) -> Self
    where
        S: Strategy<C, A> + 'static,
    {
        self.entries.push(ChainEntry {
            strategy: Arc::new(strategy),
            timeout: Some(timeout),
        });
        self
    }

    pub fn shared(self, strategy: Arc<dyn Strategy<C, A>>) -> Self {
        let timeout = self.default_timeout;
        self.shared_with_timeout(strategy, timeout)
    }

    /// `None` leaves the strategy unbounded.
    pub fn shared_with_timeout(
        mut self,
        strategy: Arc<dyn Strategy<C, A>>,
        timeout: Option<Duration>,
    ) -> Self {
        self.entries.push(ChainEntry { strategy, timeout });
        self
    }

    pub fn build(self) -> Result<ResolutionChain<C, A>> {
        if self.entries.is_empty() {
            return Err(DigestError::Config(format!(
                "resolution chain '{}' has no strategies",
                self.label
            )));
        }
        let mut seen = HashSet::new();
        for entry in &self.entries {
            let name = entry.strategy.name();
            if !seen.insert(name.to_string()) {
                return Err(DigestError::Config(format!(
                    "resolution chain '{}' lists strategy '{name}' twice",
                    self.label
                )));
            }
        }
        Ok(ResolutionChain {
            label: self.label,
            entries: self.entries,
        })
    }
}
