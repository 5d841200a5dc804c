//! Figure acquisition: an ordered chain of strategies from the cheapest,
//! most structured source to the last-resort document scan.

pub mod abstracts;
pub mod document;
pub mod figures;
pub mod html;
pub mod landing;
pub mod perceptual;
pub mod publisher;
pub mod repository;

use std::sync::Arc;

use paperdigest_core::{ContentConfig, FigureSet, ResolutionChain, StrategyOutcome, Work};

use crate::error::ScienceError;
use crate::http::RateLimitedClient;

pub use abstracts::{AbstractFetcher, abstract_from_page};
pub use document::{DocumentStrategy, extract_document_text};
pub use figures::{FigureAssembler, FigureCandidate, FigureFetcher, FigureOptions};
pub use landing::DoiLandingStrategy;
pub use perceptual::{hamming, sniff_mime};
pub use publisher::{Publisher, PublisherEndpoints, PublisherStrategy};
pub use repository::{PmcStrategy, PreprintServerStrategy};

/// Everything a content strategy may look at.
#[derive(Debug, Clone)]
pub struct ContentContext {
    pub work: Work,
    /// Full-text document downloaded for the work, if any.
    pub document: Option<Vec<u8>>,
}

impl ContentContext {
    pub fn new(work: Work, document: Option<Vec<u8>>) -> Self {
        Self { work, document }
    }
}

pub type ContentChain = ResolutionChain<ContentContext, FigureSet>;

/// Map a transport or parse error onto the soft/hard split.
pub(crate) fn classify<A>(err: ScienceError) -> StrategyOutcome<A> {
    if err.is_soft() {
        StrategyOutcome::SoftFailure(err.to_string())
    } else {
        StrategyOutcome::HardFailure(err.to_string())
    }
}

pub(crate) fn outcome_from_set(set: FigureSet, found_on_page: usize) -> StrategyOutcome<FigureSet> {
    if set.is_empty() {
        StrategyOutcome::SoftFailure(format!(
            "{found_on_page} figure candidates, none qualified"
        ))
    } else {
        StrategyOutcome::Success(set)
    }
}

/// Base URLs for the remote services the chain talks to.
#[derive(Debug, Clone)]
pub struct ContentEndpoints {
    pub pmc: String,
    pub biorxiv: String,
    pub medrxiv: String,
    pub doi_resolver: String,
    pub publishers: PublisherEndpoints,
}

impl Default for ContentEndpoints {
    fn default() -> Self {
        Self {
            pmc: "https://www.ncbi.nlm.nih.gov".into(),
            biorxiv: "https://www.biorxiv.org".into(),
            medrxiv: "https://www.medrxiv.org".into(),
            doi_resolver: "https://doi.org".into(),
            publishers: PublisherEndpoints::default(),
        }
    }
}

/// Build the default chain: repository lookups, DOI landing page,
/// publisher-specific extraction, then the downloaded document.
pub fn build_content_chain(
    config: &ContentConfig,
    client: Arc<RateLimitedClient>,
    endpoints: ContentEndpoints,
) -> paperdigest_core::Result<ContentChain> {
    let options = FigureOptions::from(config);
    let fetcher = Arc::new(FigureFetcher::new(client, options));

    let strategies: Vec<Arc<dyn paperdigest_core::Strategy<ContentContext, FigureSet>>> = vec![
        Arc::new(PmcStrategy::new(Arc::clone(&fetcher), endpoints.pmc)),
        Arc::new(PreprintServerStrategy::new(
            Arc::clone(&fetcher),
            endpoints.biorxiv,
            endpoints.medrxiv,
        )),
        Arc::new(DoiLandingStrategy::new(
            Arc::clone(&fetcher),
            endpoints.doi_resolver.clone(),
        )),
        Arc::new(PublisherStrategy::new(
            Arc::clone(&fetcher),
            &config.open_access_publishers,
            PublisherEndpoints {
                doi_resolver: endpoints.doi_resolver,
                ..endpoints.publishers
            },
        )),
        Arc::new(DocumentStrategy::new(options)),
    ];

    let mut builder = ResolutionChain::builder("content");
    for strategy in strategies {
        let timeout = config.timeout_for(strategy.name());
        builder = builder.shared_with_timeout(strategy, timeout);
    }
    builder.build()
}
