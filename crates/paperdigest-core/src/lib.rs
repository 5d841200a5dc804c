pub mod capability;
pub mod config;
pub mod error;
pub mod models;
pub mod resolver;
pub mod storage;

pub use capability::InferenceCapability;
pub use config::{AppConfig, BackendConfig, ContentConfig, CredentialSlot, SourcesConfig, StorageConfig};
pub use error::{DigestError, ExitCode, Result};
pub use models::*;
pub use resolver::{
    Applicability, AttemptRecord, AttemptStatus, Resolution, ResolutionChain, Signature,
    SkippedStrategy, Strategy, StrategyOutcome,
};
pub use storage::{HistoryEntry, ProcessedHistory};
