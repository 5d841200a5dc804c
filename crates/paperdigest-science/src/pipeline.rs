//! Run orchestration: ingest, dedup, backend selection, then per-work
//! enrichment and delivery.

use std::sync::Arc;

use async_trait::async_trait;
use paperdigest_core::{
    AttemptRecord, ContentArtifact, ContentKind, DigestError, InferenceCapability, Resolution,
    ResolutionChain, Source, Work,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::content::{AbstractFetcher, ContentChain, ContentContext, extract_document_text};
use crate::dedup::{DedupEngine, MergeConflict, RegisterOutcome};
use crate::download::{DocumentDownloader, DocumentFetch};
use crate::normalize::normalize;

/// One record as produced by a source adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRecord {
    pub source: Source,
    pub record: Value,
}

/// A fully enriched work, handed to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct DigestEntry {
    pub work: Work,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_abstract: Option<String>,
    pub content_attempts: Vec<AttemptRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
}

/// Receives finished entries. A failed `emit` leaves the work unfinalized
/// so it is retried on the next run.
#[async_trait]
pub trait DigestSink: Send {
    async fn emit(&mut self, entry: &DigestEntry) -> Result<(), DigestError>;

    async fn finish(&mut self, summary: &RunSummary) -> Result<(), DigestError>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub new: usize,
    pub merged: usize,
    pub skipped: usize,
    pub malformed: usize,
    /// Works left out by the open-access filter or the work cap.
    pub filtered: usize,
    pub delivered: usize,
    pub enrichment_failed: usize,
    pub content_exhausted: usize,
    pub hard_failures: usize,
    pub conflicts: Vec<MergeConflict>,
    pub backend: Option<String>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Upper bound on works enriched per run; the rest wait for the next run.
    pub max_works: usize,
    pub open_access_only: bool,
    pub translate_abstract: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_works: 50,
            open_access_only: false,
            translate_abstract: true,
        }
    }
}

pub struct DigestPipeline {
    engine: DedupEngine,
    content: ContentChain,
    downloader: Arc<dyn DocumentDownloader>,
    abstracts: Option<AbstractFetcher>,
    options: PipelineOptions,
}

/// Run the backend chain once. Exhaustion is fatal and names every
/// candidate that was tried or skipped.
pub async fn select_backend<C>(
    chain: &ResolutionChain<C, Arc<dyn InferenceCapability>>,
    ctx: &C,
) -> Result<Arc<dyn InferenceCapability>, DigestError>
where
    C: Sync + ?Sized,
{
    match chain.resolve(ctx).await {
        Resolution::Resolved {
            artifact, strategy, ..
        } => {
            tracing::info!(candidate = %strategy, backend = artifact.name(), "inference backend selected");
            Ok(artifact)
        }
        exhausted @ Resolution::Exhausted { .. } => Err(DigestError::MissingCapability(format!(
            "no inference backend available ({})",
            exhausted.describe_failures()
        ))),
    }
}

impl DigestPipeline {
    pub fn new(
        engine: DedupEngine,
        content: ContentChain,
        downloader: Arc<dyn DocumentDownloader>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            engine,
            content,
            downloader,
            abstracts: None,
            options,
        }
    }

    /// Look up missing abstracts on the DOI landing page during enrichment.
    pub fn with_abstract_fetcher(mut self, fetcher: AbstractFetcher) -> Self {
        self.abstracts = Some(fetcher);
        self
    }

    pub fn engine(&self) -> &DedupEngine {
        &self.engine
    }

    pub fn into_engine(self) -> DedupEngine {
        self.engine
    }

    /// Normalize and register every record. Malformed records are dropped
    /// with a warning.
    pub fn ingest(&mut self, records: impl IntoIterator<Item = InputRecord>, summary: &mut RunSummary) {
        for input in records {
            let work = match normalize(&input.record, &input.source) {
                Ok(work) => work,
                Err(err) => {
                    tracing::warn!(source = %input.source, %err, "dropping malformed record");
                    summary.malformed += 1;
                    continue;
                }
            };
            match self.engine.register(work) {
                RegisterOutcome::New => summary.new += 1,
                RegisterOutcome::Merged { .. } => summary.merged += 1,
                RegisterOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }
        tracing::info!(
            new = summary.new,
            merged = summary.merged,
            skipped = summary.skipped,
            malformed = summary.malformed,
            "records ingested"
        );
    }

    /// Ingest, dedup and filter without touching a backend, a sink or the
    /// history. Returns the works a run would enrich, in order.
    pub fn plan(&mut self, records: impl IntoIterator<Item = InputRecord>) -> (Vec<Work>, RunSummary) {
        let mut summary = RunSummary::default();
        self.ingest(records, &mut summary);

        let mut works = self.engine.take_works();
        summary.conflicts = self.engine.conflicts().to_vec();

        if self.options.open_access_only {
            let before = works.len();
            works.retain(|w| w.open_access);
            summary.filtered += before - works.len();
        }
        if works.len() > self.options.max_works {
            summary.filtered += works.len() - self.options.max_works;
            works.truncate(self.options.max_works);
        }
        (works, summary)
    }

    /// Full run. Backend selection happens after dedup and before the first
    /// work is enriched; its failure aborts the run with history untouched.
    pub async fn run<C>(
        &mut self,
        records: Vec<InputRecord>,
        backends: &ResolutionChain<C, Arc<dyn InferenceCapability>>,
        backend_ctx: &C,
        sink: &mut dyn DigestSink,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, DigestError>
    where
        C: Sync + ?Sized,
    {
        let (works, mut summary) = self.plan(records);
        if works.is_empty() {
            tracing::info!("nothing new to digest");
            sink.finish(&summary).await?;
            return Ok(summary);
        }

        let capability = select_backend(backends, backend_ctx).await?;
        summary.backend = Some(capability.name().to_string());

        let total = works.len();
        for (position, work) in works.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(remaining = total - position, "run cancelled");
                summary.cancelled = true;
                break;
            }
            let title = work.title.clone();
            tracing::info!(progress = %format!("{}/{total}", position + 1), %title, "digesting");

            let entry = match self.enrich(work, capability.as_ref(), &mut summary).await {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(%title, %err, "enrichment failed");
                    summary.enrichment_failed += 1;
                    continue;
                }
            };
            if let Err(err) = sink.emit(&entry).await {
                tracing::warn!(%title, %err, "delivery failed");
                summary.enrichment_failed += 1;
                continue;
            }
            self.engine.finalize_success(&entry.work)?;
            summary.delivered += 1;
        }

        tracing::info!(
            delivered = summary.delivered,
            failed = summary.enrichment_failed,
            content_exhausted = summary.content_exhausted,
            conflicts = summary.conflict_count(),
            "run finished"
        );
        sink.finish(&summary).await?;
        Ok(summary)
    }

    async fn enrich(
        &self,
        mut work: Work,
        capability: &dyn InferenceCapability,
        summary: &mut RunSummary,
    ) -> Result<DigestEntry, DigestError> {
        let (document, document_url) = match self.downloader.fetch(&work).await {
            DocumentFetch::Document { bytes, url } => (Some(bytes), Some(url)),
            DocumentFetch::Unavailable { reasons } => {
                tracing::debug!(title = %work.title, ?reasons, "no document");
                (None, None)
            }
        };

        let ctx = ContentContext::new(work.clone(), document);
        let resolution = self.content.resolve(&ctx).await;
        summary.hard_failures += resolution.hard_failures().count();
        let content_attempts = resolution.attempts().to_vec();
        match resolution {
            Resolution::Resolved {
                artifact, strategy, ..
            } => {
                tracing::info!(%strategy, figures = artifact.len(), "figures acquired");
                work.record_content(ContentKind::Figures, Some(ContentArtifact::Figures(artifact)));
            }
            Resolution::Exhausted { .. } => {
                tracing::debug!(title = %work.title, "no figures found");
                summary.content_exhausted += 1;
                work.record_content(ContentKind::Figures, None);
            }
        }

        if let Some(bytes) = ctx.document {
            let text = tokio::task::spawn_blocking(move || extract_document_text(&bytes))
                .await
                .ok()
                .flatten();
            work.record_content(ContentKind::FullText, text.map(|text| ContentArtifact::FullText { text }));
        }

        if work.abstract_text.as_deref().is_none_or(|a| a.trim().is_empty())
            && let (Some(fetcher), Some(doi)) = (&self.abstracts, work.doi.as_deref())
        {
            work.abstract_text = fetcher.fetch(doi).await;
        }

        let summary_text = capability.summarize(&work).await?;

        let translated_abstract = match work.abstract_text.as_deref() {
            Some(text) if self.options.translate_abstract && !text.trim().is_empty() => {
                match capability.translate(text).await {
                    Ok(translated) => Some(translated),
                    Err(err) => {
                        tracing::debug!(%err, "abstract translation failed");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(DigestEntry {
            work,
            summary: summary_text,
            translated_abstract,
            content_attempts,
            document_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperdigest_core::{
        FigureLocator, FigureSet, ProcessedHistory, Signature, Strategy, StrategyOutcome,
        TrustTable,
    };
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::content::FigureAssembler;
    use crate::content::FigureOptions;
    use crate::content::perceptual::test_images::gradient;
    use crate::download::NoDownloads;
    use image::ImageFormat;

    struct FakeCapability {
        fail_on: Option<String>,
    }

    #[async_trait]
    impl InferenceCapability for FakeCapability {
        fn name(&self) -> &str {
            "fake"
        }

        async fn summarize(&self, work: &Work) -> paperdigest_core::Result<String> {
            if self.fail_on.as_deref() == Some(work.title.as_str()) {
                return Err(DigestError::Inference {
                    backend: "fake".into(),
                    message: "quota exceeded".into(),
                });
            }
            Ok(format!("summary of {}", work.title))
        }

        async fn translate(&self, text: &str) -> paperdigest_core::Result<String> {
            Ok(format!("translated: {text}"))
        }
    }

    struct FixedBackend(Option<String>);

    #[async_trait]
    impl Strategy<(), Arc<dyn InferenceCapability>> for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        fn signature(&self) -> Signature {
            Signature::new(&[], "capability")
        }

        async fn attempt(&self, _ctx: &()) -> StrategyOutcome<Arc<dyn InferenceCapability>> {
            StrategyOutcome::Success(Arc::new(FakeCapability {
                fail_on: self.0.clone(),
            }))
        }
    }

    struct NoBackend;

    #[async_trait]
    impl Strategy<(), Arc<dyn InferenceCapability>> for NoBackend {
        fn name(&self) -> &str {
            "assistant"
        }

        fn signature(&self) -> Signature {
            Signature::new(&[], "capability")
        }

        async fn attempt(&self, _ctx: &()) -> StrategyOutcome<Arc<dyn InferenceCapability>> {
            StrategyOutcome::soft("command not found")
        }
    }

    /// Succeeds only for works with a DOI.
    struct DoiFigures {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Strategy<ContentContext, FigureSet> for DoiFigures {
        fn name(&self) -> &str {
            "doi_figures"
        }

        fn signature(&self) -> Signature {
            Signature::new(&["doi"], "figures")
        }

        async fn attempt(&self, ctx: &ContentContext) -> StrategyOutcome<FigureSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ctx.work.doi.is_none() {
                return StrategyOutcome::soft("no DOI");
            }
            let mut assembler = FigureAssembler::new(FigureOptions::default(), "doi_figures");
            assembler.push(
                gradient(300, 200, false, ImageFormat::Png),
                FigureLocator::Url("https://img.example/1.png".into()),
                None,
                None,
            );
            StrategyOutcome::Success(assembler.finish())
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        entries: Arc<Mutex<Vec<DigestEntry>>>,
        finished: bool,
        reject: Option<String>,
    }

    #[async_trait]
    impl DigestSink for CollectingSink {
        async fn emit(&mut self, entry: &DigestEntry) -> Result<(), DigestError> {
            if self.reject.as_deref() == Some(entry.work.title.as_str()) {
                return Err(DigestError::Io(std::io::Error::other("disk full")));
            }
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn finish(&mut self, _summary: &RunSummary) -> Result<(), DigestError> {
            self.finished = true;
            Ok(())
        }
    }

    fn pipeline(history: ProcessedHistory) -> (DigestPipeline, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ResolutionChain::builder("content")
            .strategy(DoiFigures {
                calls: Arc::clone(&calls),
            })
            .build()
            .unwrap();
        let engine = DedupEngine::new(history, TrustTable::default());
        let pipeline = DigestPipeline::new(
            engine,
            chain,
            Arc::new(NoDownloads),
            PipelineOptions::default(),
        );
        (pipeline, calls)
    }

    fn backends(fail_on: Option<&str>) -> ResolutionChain<(), Arc<dyn InferenceCapability>> {
        ResolutionChain::builder("backend")
            .strategy(FixedBackend(fail_on.map(String::from)))
            .build()
            .unwrap()
    }

    fn records() -> Vec<InputRecord> {
        vec![
            InputRecord {
                source: Source::PubMed,
                record: json!({"title": "Shared finding", "doi": "10.1000/shared", "pmid": "111",
                               "abstract": "We found it."}),
            },
            InputRecord {
                source: Source::BioRxiv,
                record: json!({"title": "Shared Finding!", "doi": "https://doi.org/10.1000/SHARED"}),
            },
            InputRecord {
                source: Source::Rss,
                record: json!({"title": "Title-only note"}),
            },
            InputRecord {
                source: Source::Rss,
                record: json!(["not", "an", "object"]),
            },
        ]
    }

    #[tokio::test]
    async fn second_run_skips_everything_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("history.db");

        let (mut first, _) = pipeline(ProcessedHistory::open(&db).unwrap());
        let mut sink = CollectingSink::default();
        let summary = first
            .run(records(), &backends(None), &(), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((summary.new, summary.merged, summary.malformed), (2, 1, 1));
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.content_exhausted, 1);
        assert_eq!(summary.backend.as_deref(), Some("fake"));
        assert!(sink.finished);

        let entries = sink.entries.lock().unwrap().clone();
        let shared = entries.iter().find(|e| e.work.doi.is_some()).unwrap();
        assert_eq!(shared.translated_abstract.as_deref(), Some("translated: We found it."));
        assert!(shared.work.content_of(ContentKind::Figures).is_some());
        let note = entries.iter().find(|e| e.work.doi.is_none()).unwrap();
        assert!(note.work.content.contains_key(&ContentKind::Figures));
        assert!(note.work.content_of(ContentKind::Figures).is_none());
        drop(first);

        let (mut second, calls) = pipeline(ProcessedHistory::open(&db).unwrap());
        let mut sink = CollectingSink::default();
        let summary = second
            .run(records(), &backends(None), &(), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.delivered, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(sink.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backend_exhaustion_aborts_before_enrichment() {
        let (mut pipeline, calls) = pipeline(ProcessedHistory::open_in_memory().unwrap());
        let chain = ResolutionChain::builder("backend")
            .strategy(NoBackend)
            .build()
            .unwrap();
        let mut sink = CollectingSink::default();
        let err = pipeline
            .run(records(), &chain, &(), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        match &err {
            DigestError::MissingCapability(message) => assert!(message.contains("assistant")),
            other => panic!("expected missing capability, got {other:?}"),
        }
        assert_eq!(err.exit_code() as i32, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(pipeline.engine().history().is_empty());
    }

    #[tokio::test]
    async fn failed_work_is_not_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("history.db");

        let (mut first, _) = pipeline(ProcessedHistory::open(&db).unwrap());
        let mut sink = CollectingSink::default();
        let summary = first
            .run(
                records(),
                &backends(Some("Title-only note")),
                &(),
                &mut sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.enrichment_failed, 1);
        drop(first);

        let (mut second, _) = pipeline(ProcessedHistory::open(&db).unwrap());
        let mut sink = CollectingSink::default();
        let summary = second
            .run(records(), &backends(None), &(), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(sink.entries.lock().unwrap()[0].work.title, "Title-only note");
    }

    #[tokio::test]
    async fn sink_failure_counts_as_enrichment_failure() {
        let (mut pipeline, _) = pipeline(ProcessedHistory::open_in_memory().unwrap());
        let mut sink = CollectingSink {
            reject: Some("Title-only note".into()),
            ..CollectingSink::default()
        };
        let summary = pipeline
            .run(records(), &backends(None), &(), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.enrichment_failed, 1);
        assert_eq!(pipeline.engine().history().len(), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_between_works() {
        let (mut pipeline, calls) = pipeline(ProcessedHistory::open_in_memory().unwrap());
        let token = CancellationToken::new();
        token.cancel();
        let mut sink = CollectingSink::default();
        let summary = pipeline
            .run(records(), &backends(None), &(), &mut sink, &token)
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.delivered, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(pipeline.engine().history().is_empty());
    }

    #[tokio::test]
    async fn open_access_filter_and_cap() {
        let (pipeline_parts, _) = pipeline(ProcessedHistory::open_in_memory().unwrap());
        let DigestPipeline {
            engine,
            content,
            downloader,
            ..
        } = pipeline_parts;
        let mut pipeline = DigestPipeline::new(
            engine,
            content,
            downloader,
            PipelineOptions {
                max_works: 1,
                open_access_only: true,
                translate_abstract: false,
            },
        );
        let mut input = records();
        input.push(InputRecord {
            source: Source::Rss,
            record: json!({"title": "Open one", "is_open_access": true}),
        });
        input.push(InputRecord {
            source: Source::Rss,
            record: json!({"title": "Open two", "is_open_access": true}),
        });

        let mut sink = CollectingSink::default();
        let summary = pipeline
            .run(input, &backends(None), &(), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.filtered, 3);
        assert_eq!(sink.entries.lock().unwrap()[0].work.title, "Open one");
    }

    #[tokio::test]
    async fn plan_selects_without_side_effects() {
        let (mut pipeline, calls) = pipeline(ProcessedHistory::open_in_memory().unwrap());
        let (works, summary) = pipeline.plan(records());

        assert_eq!(works.len(), 2);
        assert_eq!((summary.new, summary.merged, summary.malformed), (2, 1, 1));
        assert_eq!(summary.backend, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(pipeline.engine().history().is_empty());
    }

    #[tokio::test]
    async fn missing_abstract_is_recovered_from_landing_page() {
        let abstract_text = "Landing pages often carry the abstract in a meta description,                              which is enough for a summary when the feed left it out.";
        let mut server = mockito::Server::new_async().await;
        let landing = server
            .mock("GET", "/10.1000/noabs")
            .with_body(format!(r#"<meta name="description" content="{abstract_text}">"#))
            .expect(1)
            .create_async()
            .await;

        let client = crate::http::RateLimitedClient::new(
            std::time::Duration::ZERO,
            0,
            crate::http::DEFAULT_USER_AGENT,
        )
        .unwrap();
        let (pipeline, _) = pipeline(ProcessedHistory::open_in_memory().unwrap());
        let mut pipeline =
            pipeline.with_abstract_fetcher(AbstractFetcher::new(Arc::new(client), server.url()));
        let input = vec![
            InputRecord {
                source: Source::Rss,
                record: json!({"title": "No abstract here", "doi": "10.1000/noabs"}),
            },
            InputRecord {
                source: Source::Rss,
                record: json!({"title": "Has one", "doi": "10.1000/hasabs", "abstract": "Given."}),
            },
        ];

        let mut sink = CollectingSink::default();
        let summary = pipeline
            .run(input, &backends(None), &(), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.delivered, 2);

        let entries = sink.entries.lock().unwrap().clone();
        let recovered = entries.iter().find(|e| e.work.title == "No abstract here").unwrap();
        assert_eq!(recovered.work.abstract_text.as_deref(), Some(abstract_text));
        assert_eq!(
            recovered.translated_abstract.as_deref(),
            Some(format!("translated: {abstract_text}").as_str())
        );
        let given = entries.iter().find(|e| e.work.title == "Has one").unwrap();
        assert_eq!(given.work.abstract_text.as_deref(), Some("Given."));
        landing.assert_async().await;
    }
}
