//! Full-text document download, itself a small resolution chain over the
//! places an open-access PDF usually lives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paperdigest_core::{
    Applicability, ContentConfig, ResolutionChain, Signature, Strategy, StrategyOutcome, Work,
};
use serde::Deserialize;

use crate::content::classify;
use crate::http::RateLimitedClient;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Bound for download strategies missing from `[content].timeouts`.
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of trying to obtain a Work's document.
#[derive(Debug, Clone)]
pub enum DocumentFetch {
    Document { bytes: Vec<u8>, url: String },
    Unavailable { reasons: Vec<String> },
}

impl DocumentFetch {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Document { bytes, .. } => Some(bytes),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Document { url, .. } => Some(url),
            Self::Unavailable { .. } => None,
        }
    }
}

#[async_trait]
pub trait DocumentDownloader: Send + Sync {
    async fn fetch(&self, work: &Work) -> DocumentFetch;
}

/// A downloader that never finds anything; used when downloads are off.
pub struct NoDownloads;

#[async_trait]
impl DocumentDownloader for NoDownloads {
    async fn fetch(&self, _work: &Work) -> DocumentFetch {
        DocumentFetch::Unavailable {
            reasons: vec!["document downloads disabled".into()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadEndpoints {
    pub pmc: String,
    pub unpaywall: String,
    pub biorxiv: String,
    pub medrxiv: String,
}

impl Default for DownloadEndpoints {
    fn default() -> Self {
        Self {
            pmc: "https://www.ncbi.nlm.nih.gov".into(),
            unpaywall: "https://api.unpaywall.org".into(),
            biorxiv: "https://www.biorxiv.org".into(),
            medrxiv: "https://www.medrxiv.org".into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Downloaded {
    bytes: Vec<u8>,
    url: String,
}

type DownloadChain = ResolutionChain<Work, Downloaded>;

pub struct PdfDownloader {
    chain: DownloadChain,
    papers_dir: Option<PathBuf>,
}

impl PdfDownloader {
    pub fn new(
        config: &ContentConfig,
        client: Arc<RateLimitedClient>,
        endpoints: DownloadEndpoints,
    ) -> paperdigest_core::Result<Self> {
        let mut strategies: Vec<Arc<dyn Strategy<Work, Downloaded>>> = vec![
            Arc::new(RecordPdf {
                client: Arc::clone(&client),
            }),
            Arc::new(PmcPdf {
                client: Arc::clone(&client),
                base_url: endpoints.pmc,
            }),
        ];
        if let Some(email) = config.unpaywall_email.clone().filter(|e| !e.trim().is_empty()) {
            strategies.push(Arc::new(UnpaywallPdf {
                client: Arc::clone(&client),
                base_url: endpoints.unpaywall,
                email,
            }));
        }
        strategies.push(Arc::new(PreprintPdf {
            client,
            biorxiv: endpoints.biorxiv,
            medrxiv: endpoints.medrxiv,
        }));

        let mut builder = ResolutionChain::builder("document");
        for strategy in strategies {
            let timeout = config
                .timeout_for(strategy.name())
                .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);
            builder = builder.shared_with_timeout(strategy, Some(timeout));
        }
        let chain = builder.build()?;
        Ok(Self {
            chain,
            papers_dir: None,
        })
    }

    /// Keep a copy of every downloaded document under `dir`.
    pub fn save_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.papers_dir = Some(dir.into());
        self
    }

    async fn persist(&self, work: &Work, bytes: &[u8]) {
        let Some(dir) = &self.papers_dir else {
            return;
        };
        let path = dir.join(format!("{}.pdf", work.slug()));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, bytes).await
        }
        .await;
        match written {
            Ok(()) => tracing::debug!(path = %path.display(), "document saved"),
            Err(err) => tracing::warn!(path = %path.display(), %err, "failed to save document"),
        }
    }
}

#[async_trait]
impl DocumentDownloader for PdfDownloader {
    async fn fetch(&self, work: &Work) -> DocumentFetch {
        let resolution = self.chain.resolve(work).await;
        let winner = resolution.winner().map(str::to_string);
        let reasons: Vec<String> = resolution
            .attempts()
            .iter()
            .filter_map(|a| a.reason().map(|r| format!("{}: {r}", a.strategy)))
            .collect();
        match resolution.into_artifact() {
            Some(Downloaded { bytes, url }) => {
                tracing::debug!(strategy = winner.as_deref().unwrap_or(""), %url, "document downloaded");
                self.persist(work, &bytes).await;
                DocumentFetch::Document { bytes, url }
            }
            None => DocumentFetch::Unavailable { reasons },
        }
    }
}

async fn fetch_pdf(client: &RateLimitedClient, url: &str) -> StrategyOutcome<Downloaded> {
    match client.get_bytes(url).await {
        Ok(fetched) if fetched.bytes.starts_with(PDF_MAGIC) => StrategyOutcome::Success(Downloaded {
            bytes: fetched.bytes,
            url: fetched.final_url,
        }),
        Ok(fetched) => StrategyOutcome::soft(format!(
            "{url} did not return a PDF ({})",
            fetched.content_type.as_deref().unwrap_or("unknown content type")
        )),
        Err(err) => classify(err),
    }
}

struct RecordPdf {
    client: Arc<RateLimitedClient>,
}

#[async_trait]
impl Strategy<Work, Downloaded> for RecordPdf {
    fn name(&self) -> &str {
        "record_pdf"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["pdf_url"], "document")
    }

    fn applicability(&self, work: &Work) -> Applicability {
        Applicability::when(work.pdf_url.is_some(), "record has no pdf_url")
    }

    async fn attempt(&self, work: &Work) -> StrategyOutcome<Downloaded> {
        match work.pdf_url.as_deref() {
            Some(url) => fetch_pdf(&self.client, url).await,
            None => StrategyOutcome::soft("record has no pdf_url"),
        }
    }
}

struct PmcPdf {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

#[async_trait]
impl Strategy<Work, Downloaded> for PmcPdf {
    fn name(&self) -> &str {
        "pmc_pdf"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["pmcid"], "document")
    }

    fn applicability(&self, work: &Work) -> Applicability {
        Applicability::when(work.pmcid().is_some(), "no PMCID")
    }

    async fn attempt(&self, work: &Work) -> StrategyOutcome<Downloaded> {
        let Some(pmcid) = work.pmcid() else {
            return StrategyOutcome::soft("no PMCID");
        };
        let url = format!(
            "{}/pmc/articles/{pmcid}/pdf/",
            self.base_url.trim_end_matches('/')
        );
        fetch_pdf(&self.client, &url).await
    }
}

#[derive(Debug, Deserialize)]
struct UnpaywallRecord {
    best_oa_location: Option<UnpaywallLocation>,
}

#[derive(Debug, Deserialize)]
struct UnpaywallLocation {
    url_for_pdf: Option<String>,
    url: Option<String>,
}

struct UnpaywallPdf {
    client: Arc<RateLimitedClient>,
    base_url: String,
    email: String,
}

#[async_trait]
impl Strategy<Work, Downloaded> for UnpaywallPdf {
    fn name(&self) -> &str {
        "unpaywall"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["doi"], "document")
    }

    fn applicability(&self, work: &Work) -> Applicability {
        Applicability::when(work.doi.is_some(), "no DOI")
    }

    async fn attempt(&self, work: &Work) -> StrategyOutcome<Downloaded> {
        let Some(doi) = work.doi.as_deref() else {
            return StrategyOutcome::soft("no DOI");
        };
        let lookup = format!(
            "{}/v2/{doi}?email={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.email)
        );
        let record: UnpaywallRecord = match self.client.get_json(&lookup).await {
            Ok(record) => record,
            Err(err) => return classify(err),
        };
        let Some(url) = record
            .best_oa_location
            .and_then(|loc| loc.url_for_pdf.or(loc.url))
        else {
            return StrategyOutcome::soft("no open-access location");
        };
        fetch_pdf(&self.client, &url).await
    }
}

struct PreprintPdf {
    client: Arc<RateLimitedClient>,
    biorxiv: String,
    medrxiv: String,
}

#[async_trait]
impl Strategy<Work, Downloaded> for PreprintPdf {
    fn name(&self) -> &str {
        "preprint_pdf"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["doi"], "document")
    }

    fn applicability(&self, work: &Work) -> Applicability {
        Applicability::when(
            work.doi.as_deref().is_some_and(|d| d.starts_with("10.1101/")),
            "not a bioRxiv/medRxiv DOI",
        )
    }

    async fn attempt(&self, work: &Work) -> StrategyOutcome<Downloaded> {
        let Some(doi) = work.doi.as_deref() else {
            return StrategyOutcome::soft("no DOI");
        };
        let base = if crate::content::repository::is_medrxiv(work) {
            &self.medrxiv
        } else {
            &self.biorxiv
        };
        let url = format!("{}/content/{doi}.full.pdf", base.trim_end_matches('/'));
        fetch_pdf(&self.client, &url).await
    }
}
