use std::time::Duration;

use serde::Serialize;

/// What a single strategy attempt produced.
#[derive(Debug)]
pub enum StrategyOutcome<A> {
    Success(A),
    /// Expected "not here" result: 404, paywall, rate limit, timeout.
    SoftFailure(String),
    /// Unexpected fault worth surfacing: parse failure, malformed payload.
    HardFailure(String),
}

impl<A> StrategyOutcome<A> {
    pub fn soft(reason: impl Into<String>) -> Self {
        Self::SoftFailure(reason.into())
    }

    pub fn hard(reason: impl Into<String>) -> Self {
        Self::HardFailure(reason.into())
    }
}

/// Cheap pre-check a strategy runs before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    Applicable,
    NotApplicable(String),
}

impl Applicability {
    pub fn when(condition: bool, reason: impl Into<String>) -> Self {
        if condition {
            Self::Applicable
        } else {
            Self::NotApplicable(reason.into())
        }
    }

    pub fn is_applicable(&self) -> bool {
        matches!(self, Self::Applicable)
    }
}

/// Inputs a strategy requires and the artifact it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub requires: Vec<&'static str>,
    pub produces: &'static str,
}

impl Signature {
    pub fn new(requires: &[&'static str], produces: &'static str) -> Self {
        Self {
            requires: requires.to_vec(),
            produces,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    SoftFailure(String),
    HardFailure(String),
}

/// Record of one invoked strategy.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub strategy: String,
    pub status: AttemptStatus,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl AttemptRecord {
    pub fn is_hard_failure(&self) -> bool {
        matches!(self.status, AttemptStatus::HardFailure(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.status {
            AttemptStatus::Succeeded => None,
            AttemptStatus::SoftFailure(r) | AttemptStatus::HardFailure(r) => Some(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedStrategy {
    pub strategy: String,
    pub reason: String,
}

/// Result of running a whole chain.
#[derive(Debug)]
pub enum Resolution<A> {
    Resolved {
        artifact: A,
        strategy: String,
        attempts: Vec<AttemptRecord>,
        skipped: Vec<SkippedStrategy>,
    },
    Exhausted {
        attempts: Vec<AttemptRecord>,
        skipped: Vec<SkippedStrategy>,
    },
}

impl<A> Resolution<A> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn artifact(&self) -> Option<&A> {
        match self {
            Self::Resolved { artifact, .. } => Some(artifact),
            Self::Exhausted { .. } => None,
        }
    }

    pub fn into_artifact(self) -> Option<A> {
        match self {
            Self::Resolved { artifact, .. } => Some(artifact),
            Self::Exhausted { .. } => None,
        }
    }

    pub fn winner(&self) -> Option<&str> {
        match self {
            Self::Resolved { strategy, .. } => Some(strategy),
            Self::Exhausted { .. } => None,
        }
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Resolved { attempts, .. } | Self::Exhausted { attempts, .. } => attempts,
        }
    }

    pub fn skipped(&self) -> &[SkippedStrategy] {
        match self {
            Self::Resolved { skipped, .. } | Self::Exhausted { skipped, .. } => skipped,
        }
    }

    pub fn hard_failures(&self) -> impl Iterator<Item = &AttemptRecord> {
        self.attempts().iter().filter(|a| a.is_hard_failure())
    }

    /// One-line digest of why strategies failed, for log and error messages.
    pub fn describe_failures(&self) -> String {
        let mut parts: Vec<String> = self
            .attempts()
            .iter()
            .filter_map(|a| a.reason().map(|r| format!("{}: {r}", a.strategy)))
            .collect();
        parts.extend(
            self.skipped()
                .iter()
                .map(|s| format!("{}: skipped ({})", s.strategy, s.reason)),
        );
        if parts.is_empty() {
            "no strategies".to_string()
        } else {
            parts.join("; ")
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
