pub mod content;
pub mod identity;
pub mod source;
pub mod work;

pub use content::{ContentArtifact, ContentKind, Figure, FigureLocator, FigureSet};
pub use identity::{BIORXIV, IdentityKey, PMCID, PMID, fingerprint_title};
pub use source::{Source, TrustTable};
pub use work::Work;
