//! Indexed repositories: PubMed Central and the bioRxiv/medRxiv servers.

use std::sync::Arc;

use async_trait::async_trait;
use paperdigest_core::{
    Applicability, FigureSet, Signature, Source, Strategy, StrategyOutcome, Work,
};
use scraper::Html;

use super::figures::{FigureCandidate, FigureFetcher};
use super::html::{figure_label, first_text, image_source, parse_selector};
use super::{ContentContext, classify, outcome_from_set};
use crate::error::Result;
use crate::http::absolutize;

// ─── PubMed Central ─────────────────────────────────────────────────────────

pub struct PmcStrategy {
    fetcher: Arc<FigureFetcher>,
    base_url: String,
}

impl PmcStrategy {
    pub fn new(fetcher: Arc<FigureFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    fn article_url(&self, pmcid: &str) -> String {
        format!("{}/pmc/articles/{pmcid}/", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Strategy<ContentContext, FigureSet> for PmcStrategy {
    fn name(&self) -> &str {
        "pmc"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["pmcid"], "figures")
    }

    fn applicability(&self, ctx: &ContentContext) -> Applicability {
        Applicability::when(ctx.work.pmcid().is_some(), "no PMCID")
    }

    async fn attempt(&self, ctx: &ContentContext) -> StrategyOutcome<FigureSet> {
        let Some(pmcid) = ctx.work.pmcid() else {
            return StrategyOutcome::soft("no PMCID");
        };
        let page = match self.fetcher.client().get_page(&self.article_url(pmcid)).await {
            Ok(page) => page,
            Err(err) => return classify(err),
        };
        let candidates = match pmc_candidates(&page.body, &page.final_url) {
            Ok(c) => c,
            Err(err) => return classify(err),
        };
        let found = candidates.len();
        outcome_from_set(self.fetcher.fetch(candidates, self.name()).await, found)
    }
}

pub fn pmc_candidates(body: &str, page_url: &str) -> Result<Vec<FigureCandidate>> {
    let document = Html::parse_document(body);
    let figure_sel = parse_selector("figure, div.fig")?;
    let img_sel = parse_selector("img")?;
    let caption_sel = parse_selector("figcaption, .caption")?;
    let label_sel = parse_selector(".fig-label, .obj_head, h3, h4")?;

    let mut candidates = Vec::new();
    for figure in document.select(&figure_sel) {
        let Some(src) = figure.select(&img_sel).next().and_then(image_source) else {
            continue;
        };
        let Some(url) = absolutize(page_url, &src) else {
            continue;
        };
        let caption = first_text(figure, &[&caption_sel]);
        let label = first_text(figure, &[&label_sel])
            .and_then(|l| figure_label(&l))
            .or_else(|| caption.as_deref().and_then(figure_label));
        candidates.push(FigureCandidate {
            url,
            label,
            caption,
            ..FigureCandidate::default()
        });
    }
    Ok(candidates)
}

// ─── bioRxiv / medRxiv ─────────────────────────────────────────────────────

pub struct PreprintServerStrategy {
    fetcher: Arc<FigureFetcher>,
    biorxiv_url: String,
    medrxiv_url: String,
}

impl PreprintServerStrategy {
    pub fn new(
        fetcher: Arc<FigureFetcher>,
        biorxiv_url: impl Into<String>,
        medrxiv_url: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            biorxiv_url: biorxiv_url.into(),
            medrxiv_url: medrxiv_url.into(),
        }
    }

    fn full_text_url(&self, ctx: &ContentContext, doi: &str) -> String {
        let base = if is_medrxiv(&ctx.work) {
            &self.medrxiv_url
        } else {
            &self.biorxiv_url
        };
        format!("{}/content/{doi}.full", base.trim_end_matches('/'))
    }
}

/// Both servers mint `10.1101/` DOIs; origin or journal tells them apart.
pub(crate) fn is_medrxiv(work: &Work) -> bool {
    work.source_origin.contains(&Source::MedRxiv)
        || work
            .journal
            .as_deref()
            .is_some_and(|j| j.to_ascii_lowercase().contains("medrxiv"))
}

fn preprint_doi(ctx: &ContentContext) -> Option<&str> {
    ctx.work.doi.as_deref().filter(|d| d.starts_with("10.1101/"))
}

#[async_trait]
impl Strategy<ContentContext, FigureSet> for PreprintServerStrategy {
    fn name(&self) -> &str {
        "preprint_server"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["doi:10.1101"], "figures")
    }

    fn applicability(&self, ctx: &ContentContext) -> Applicability {
        Applicability::when(preprint_doi(ctx).is_some(), "not a bioRxiv/medRxiv DOI")
    }

    async fn attempt(&self, ctx: &ContentContext) -> StrategyOutcome<FigureSet> {
        let Some(doi) = preprint_doi(ctx) else {
            return StrategyOutcome::soft("not a bioRxiv/medRxiv DOI");
        };
        let page = match self.fetcher.client().get_page(&self.full_text_url(ctx, doi)).await {
            Ok(page) => page,
            Err(err) => return classify(err),
        };
        let candidates = match preprint_candidates(&page.body, &page.final_url) {
            Ok(c) => c,
            Err(err) => return classify(err),
        };
        let found = candidates.len();
        outcome_from_set(self.fetcher.fetch(candidates, self.name()).await, found)
    }
}

pub fn preprint_candidates(body: &str, page_url: &str) -> Result<Vec<FigureCandidate>> {
    let document = Html::parse_document(body);
    let figure_sel = parse_selector("div.fig")?;
    let full_size_sel = parse_selector("a.fig-inline-img-wrapper")?;
    let img_sel = parse_selector("img")?;
    let caption_sel = parse_selector("div.fig-caption")?;
    let label_sel = parse_selector("span.fig-label")?;

    let mut candidates = Vec::new();
    for figure in document.select(&figure_sel) {
        let href = figure
            .select(&full_size_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(String::from)
            .or_else(|| figure.select(&img_sel).next().and_then(image_source));
        let Some(url) = href.and_then(|h| absolutize(page_url, &h)) else {
            continue;
        };
        let caption = first_text(figure, &[&caption_sel]);
        let label = first_text(figure, &[&label_sel])
            .and_then(|l| figure_label(&l))
            .or_else(|| caption.as_deref().and_then(figure_label));
        candidates.push(FigureCandidate {
            url,
            label,
            caption,
            ..FigureCandidate::default()
        });
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::FigureOptions;
    use crate::content::perceptual::test_images::gradient;
    use crate::http::{DEFAULT_USER_AGENT, RateLimitedClient};
    use image::ImageFormat;
    use paperdigest_core::{PMCID, Work};
    use std::time::Duration;

    fn fetcher() -> Arc<FigureFetcher> {
        let client = RateLimitedClient::new(Duration::ZERO, 0, DEFAULT_USER_AGENT).unwrap();
        Arc::new(FigureFetcher::new(Arc::new(client), FigureOptions::default()))
    }

    fn ctx_with(mutate: impl FnOnce(&mut Work)) -> ContentContext {
        let mut work = Work::new("Test work", Source::PubMed);
        mutate(&mut work);
        ContentContext::new(work, None)
    }

    #[test]
    fn pmc_markup_yields_labelled_candidates() {
        let html = r#"
            <div class="fig" id="F1">
              <h3>Figure 1</h3>
              <img src="/pmc/articles/PMC1/bin/f1.jpg">
              <div class="caption"><p>Overview of the assay.</p></div>
            </div>
            <figure><img data-src="https://cdn.ncbi.nlm.nih.gov/f2.jpg">
              <figcaption>Fig. 2B. Quantification.</figcaption></figure>
            <figure><p>no image</p></figure>
        "#;
        let found = pmc_candidates(html, "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1/").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].url, "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1/bin/f1.jpg");
        assert_eq!(found[0].label.as_deref(), Some("Figure 1"));
        assert_eq!(found[0].caption.as_deref(), Some("Overview of the assay."));
        assert_eq!(found[1].label.as_deref(), Some("Figure 2B"));
    }

    #[test]
    fn preprint_markup_prefers_full_size_link() {
        let html = r#"
            <div class="fig">
              <a class="fig-inline-img-wrapper" href="/content/biorxiv/early/F1.large.jpg">
                <img src="/content/biorxiv/early/F1.medium.gif"></a>
              <div class="fig-caption"><span class="fig-label">Figure 1.</span> Pipeline.</div>
            </div>
        "#;
        let found = preprint_candidates(html, "https://www.biorxiv.org/content/10.1101/x.full").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://www.biorxiv.org/content/biorxiv/early/F1.large.jpg");
        assert_eq!(found[0].label.as_deref(), Some("Figure 1"));
    }

    #[test]
    fn applicability_depends_on_identifiers() {
        let pmc = PmcStrategy::new(fetcher(), "http://unused");
        let preprint = PreprintServerStrategy::new(fetcher(), "http://unused", "http://unused");

        let bare = ctx_with(|_| {});
        assert!(!pmc.applicability(&bare).is_applicable());
        assert!(!preprint.applicability(&bare).is_applicable());

        let ids = ctx_with(|w| {
            w.external_ids.insert(PMCID.into(), "PMC42".into());
            w.doi = Some("10.1101/2024.01.01.000001".into());
        });
        assert!(pmc.applicability(&ids).is_applicable());
        assert!(preprint.applicability(&ids).is_applicable());
    }

    #[tokio::test]
    async fn pmc_attempt_downloads_figures() {
        let mut server = mockito::Server::new_async().await;
        let page = format!(
            r#"<figure><img src="{}/f1.png"><figcaption>Figure 1. Cells.</figcaption></figure>"#,
            server.url()
        );
        let _page = server
            .mock("GET", "/pmc/articles/PMC42/")
            .with_body(page)
            .create_async()
            .await;
        let _img = server
            .mock("GET", "/f1.png")
            .with_body(gradient(320, 240, false, ImageFormat::Png))
            .create_async()
            .await;

        let strategy = PmcStrategy::new(fetcher(), server.url());
        let ctx = ctx_with(|w| {
            w.external_ids.insert(PMCID.into(), "PMC42".into());
        });
        match strategy.attempt(&ctx).await {
            StrategyOutcome::Success(set) => {
                assert_eq!(set.len(), 1);
                assert_eq!(set.acquired_by, "pmc");
                assert_eq!(set.figures[0].caption.as_deref(), Some("Figure 1. Cells."));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn preprint_forbidden_is_soft() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/content/10.1101/2024.01.01.000001.full")
            .with_status(403)
            .create_async()
            .await;

        let strategy = PreprintServerStrategy::new(fetcher(), server.url(), "http://unused");
        let ctx = ctx_with(|w| w.doi = Some("10.1101/2024.01.01.000001".into()));
        assert!(matches!(
            strategy.attempt(&ctx).await,
            StrategyOutcome::SoftFailure(_)
        ));
    }

    #[tokio::test]
    async fn medrxiv_origin_routes_to_medrxiv() {
        let mut server = mockito::Server::new_async().await;
        let hit = server
            .mock("GET", "/content/10.1101/2024.02.02.000002.full")
            .with_body("<html><body>No figures</body></html>")
            .expect(1)
            .create_async()
            .await;

        let strategy = PreprintServerStrategy::new(fetcher(), "http://127.0.0.1:9", server.url());
        let mut ctx = ctx_with(|w| w.doi = Some("10.1101/2024.02.02.000002".into()));
        ctx.work.source_origin.insert(Source::MedRxiv);
        assert!(matches!(
            strategy.attempt(&ctx).await,
            StrategyOutcome::SoftFailure(_)
        ));
        hit.assert_async().await;
    }
}
