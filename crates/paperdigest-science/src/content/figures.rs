use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use paperdigest_core::{ContentConfig, Figure, FigureLocator, FigureSet};

use super::perceptual::{NearDuplicateFilter, probe};
use crate::error::Result;
use crate::http::{Fetched, RateLimitedClient};

/// A primary rendition at or below this size is treated as an error placeholder.
pub const MIN_PRIMARY_BYTES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FigureOptions {
    pub min_width: u32,
    pub min_height: u32,
    pub max_figures: usize,
    pub similarity_threshold: u32,
    pub fetch_concurrency: usize,
}

impl Default for FigureOptions {
    fn default() -> Self {
        Self::from(&ContentConfig::default())
    }
}

impl From<&ContentConfig> for FigureOptions {
    fn from(config: &ContentConfig) -> Self {
        Self {
            min_width: config.min_width,
            min_height: config.min_height,
            max_figures: config.max_figures.max(1),
            similarity_threshold: config.similarity_threshold,
            fetch_concurrency: config.fetch_concurrency.max(1),
        }
    }
}

impl FigureOptions {
    /// Unknown dimensions pass; decoded images always report both.
    pub fn large_enough(&self, width: Option<u32>, height: Option<u32>) -> bool {
        width.is_none_or(|w| w >= self.min_width) && height.is_none_or(|h| h >= self.min_height)
    }
}

/// A figure spotted on a page, before its image has been downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FigureCandidate {
    pub url: String,
    pub label: Option<String>,
    pub caption: Option<String>,
    pub declared_width: Option<u32>,
    pub declared_height: Option<u32>,
    /// Rendition to use when `url` fails or returns a placeholder.
    pub fallback_url: Option<String>,
}

/// Validates raw images and assembles them into a [`FigureSet`].
pub struct FigureAssembler {
    options: FigureOptions,
    filter: NearDuplicateFilter,
    set: FigureSet,
}

impl FigureAssembler {
    pub fn new(options: FigureOptions, acquired_by: &str) -> Self {
        Self {
            options,
            filter: NearDuplicateFilter::new(options.similarity_threshold),
            set: FigureSet::new(acquired_by),
        }
    }

    pub fn is_full(&self) -> bool {
        self.set.len() >= self.options.max_figures
    }

    /// Add one image; returns whether it was kept.
    pub fn push(
        &mut self,
        bytes: Vec<u8>,
        locator: FigureLocator,
        label: Option<String>,
        caption: Option<String>,
    ) -> bool {
        if self.is_full() {
            return false;
        }
        let Some(info) = probe(&bytes) else {
            tracing::debug!(?locator, "not a decodable image");
            return false;
        };
        if !self.options.large_enough(Some(info.width), Some(info.height)) {
            tracing::debug!(?locator, width = info.width, height = info.height, "figure too small");
            return false;
        }
        if !self.filter.admit(info.hash) {
            tracing::debug!(?locator, "near-duplicate figure dropped");
            return false;
        }
        let position = self.set.len() + 1;
        self.set.figures.push(Figure {
            label: label.unwrap_or_else(|| format!("Figure {position}")),
            caption,
            locator,
            mime_type: info.mime.to_string(),
            width: Some(info.width),
            height: Some(info.height),
            fingerprint: info.hash,
            bytes,
        });
        true
    }

    pub fn finish(self) -> FigureSet {
        self.set
    }
}

/// Downloads figure candidates with bounded concurrency.
pub struct FigureFetcher {
    client: Arc<RateLimitedClient>,
    options: FigureOptions,
}

impl FigureFetcher {
    pub fn new(client: Arc<RateLimitedClient>, options: FigureOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> FigureOptions {
        self.options
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }

    /// Fetch each distinct candidate URL once, in page order, and keep the
    /// qualifying images. Individual download failures only drop that figure.
    pub async fn fetch(&self, candidates: Vec<FigureCandidate>, acquired_by: &str) -> FigureSet {
        let mut seen = HashSet::new();
        let candidates: Vec<FigureCandidate> = candidates
            .into_iter()
            .filter(|c| self.options.large_enough(c.declared_width, c.declared_height))
            .filter(|c| seen.insert(c.url.clone()))
            .take(self.options.max_figures)
            .collect();

        let client = &self.client;
        let mut downloads = futures::stream::iter(candidates)
            .map(|candidate| async move {
                let result = fetch_candidate(client, &candidate).await;
                (candidate, result)
            })
            .buffered(self.options.fetch_concurrency);

        let mut assembler = FigureAssembler::new(self.options, acquired_by);
        while let Some((candidate, result)) = downloads.next().await {
            match result {
                Ok((url, fetched)) => {
                    assembler.push(
                        fetched.bytes,
                        FigureLocator::Url(url),
                        candidate.label,
                        candidate.caption,
                    );
                }
                Err(err) => {
                    tracing::debug!(url = %candidate.url, %err, "figure download failed");
                }
            }
        }
        assembler.finish()
    }
}

/// Download one candidate, switching to its fallback rendition when the
/// primary fails or is too small to be a real image. Returns the URL used.
async fn fetch_candidate(
    client: &RateLimitedClient,
    candidate: &FigureCandidate,
) -> Result<(String, Fetched)> {
    let primary = client.get_bytes(&candidate.url).await;
    let Some(fallback) = &candidate.fallback_url else {
        return primary.map(|fetched| (candidate.url.clone(), fetched));
    };
    match primary {
        Ok(fetched) if fetched.bytes.len() > MIN_PRIMARY_BYTES => Ok((candidate.url.clone(), fetched)),
        Ok(fetched) => {
            tracing::debug!(url = %candidate.url, size = fetched.bytes.len(), "placeholder rendition, using fallback");
            client.get_bytes(fallback).await.map(|f| (fallback.clone(), f))
        }
        Err(err) => {
            tracing::debug!(url = %candidate.url, %err, "primary rendition failed, using fallback");
            client.get_bytes(fallback).await.map(|f| (fallback.clone(), f))
        }
    }
}
