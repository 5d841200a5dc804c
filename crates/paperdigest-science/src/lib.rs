//! paperdigest science: record normalization, identity resolution and
//! figure acquisition for scholarly works.

pub mod content;
pub mod dedup;
pub mod download;
pub mod error;
pub mod http;
pub mod identifiers;
pub mod normalize;
pub mod pipeline;

pub use content::{
    AbstractFetcher, ContentChain, ContentContext, ContentEndpoints, FigureOptions,
    build_content_chain,
};
pub use dedup::{DedupEngine, MergeConflict, RegisterOutcome};
pub use download::{
    DocumentDownloader, DocumentFetch, DownloadEndpoints, NoDownloads, PdfDownloader,
};
pub use error::{Result, ScienceError};
pub use http::RateLimitedClient;
pub use identifiers::Doi;
pub use normalize::normalize;
pub use pipeline::{
    DigestEntry, DigestPipeline, DigestSink, InputRecord, PipelineOptions, RunSummary,
    select_backend,
};
