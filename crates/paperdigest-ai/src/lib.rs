//! paperdigest AI: LLM backends, the inference capability built on them,
//! and backend auto-detection.

pub mod backend;
pub mod capability;
pub mod detect;
pub mod error;

pub use backend::{LlmBackend, LlmRequest, LlmResponse, Message};
pub use capability::LlmCapability;
pub use detect::{
    BackendChain, CredentialSource, DetectionContext, EnvCredentials, backend_chain,
};
pub use error::{LlmError, Result};
