use std::sync::Arc;

use async_trait::async_trait;
use paperdigest_core::{Applicability, FigureSet, Signature, Strategy, StrategyOutcome};
use scraper::{ElementRef, Html};

use super::figures::{FigureCandidate, FigureFetcher};
use super::html::{
    dimension_attr, element_text, figure_label, first_text, image_source, parse_selector,
};
use super::{ContentContext, classify, outcome_from_set};
use crate::error::{Result, ScienceError};
use crate::http::absolutize;

const FIGURE_CLASS_HINTS: &[&str] = &["fig", "figure", "image-container", "article-fig"];

/// Follows `https://doi.org/{doi}` to whatever the publisher serves and
/// scrapes figure markup from it.
pub struct DoiLandingStrategy {
    fetcher: Arc<FigureFetcher>,
    resolver: String,
}

impl DoiLandingStrategy {
    pub fn new(fetcher: Arc<FigureFetcher>, resolver: impl Into<String>) -> Self {
        Self {
            fetcher,
            resolver: resolver.into(),
        }
    }
}

#[async_trait]
impl Strategy<ContentContext, FigureSet> for DoiLandingStrategy {
    fn name(&self) -> &str {
        "doi_landing"
    }

    fn signature(&self) -> Signature {
        Signature::new(&["doi"], "figures")
    }

    fn applicability(&self, ctx: &ContentContext) -> Applicability {
        Applicability::when(ctx.work.doi.is_some(), "no DOI")
    }

    async fn attempt(&self, ctx: &ContentContext) -> StrategyOutcome<FigureSet> {
        let Some(doi) = ctx.work.doi.as_deref() else {
            return StrategyOutcome::soft("no DOI");
        };
        let url = format!("{}/{doi}", self.resolver.trim_end_matches('/'));
        let page = match self.fetcher.client().get_page(&url).await {
            Ok(page) => page,
            Err(ScienceError::Status { status, .. }) if matches!(status, 401 | 403 | 429) => {
                return StrategyOutcome::soft("access restricted");
            }
            Err(err @ ScienceError::RateLimit(..)) => {
                tracing::debug!(%err, "landing page throttled");
                return StrategyOutcome::soft("access restricted");
            }
            Err(err) => return classify(err),
        };
        let options = self.fetcher.options();
        let candidates =
            match landing_candidates(&page.body, &page.final_url, options.max_figures) {
                Ok(c) => c,
                Err(err) => return classify(err),
            };
        let found = candidates.len();
        outcome_from_set(self.fetcher.fetch(candidates, self.name()).await, found)
    }
}

/// Figure candidates from arbitrary publisher markup.
///
/// Tries the most specific container first and stops at the first selector
/// that yields anything, so decorative `div.figure` wrappers on pages with
/// proper `<figure>` elements are ignored.
pub fn landing_candidates(body: &str, page_url: &str, limit: usize) -> Result<Vec<FigureCandidate>> {
    let document = Html::parse_document(body);
    let img_sel = parse_selector("img")?;
    let figcaption_sel = parse_selector("figcaption")?;
    let caption_class_sel = parse_selector("[class*=caption]")?;
    let div_sel = parse_selector("div[class]")?;

    let containers: Vec<ElementRef<'_>> = {
        let tagged = parse_selector("figure[data-test=figure]")?;
        let plain = parse_selector("figure")?;
        let from_tagged: Vec<_> = document.select(&tagged).collect();
        if !from_tagged.is_empty() {
            from_tagged
        } else {
            let from_plain: Vec<_> = document.select(&plain).collect();
            if !from_plain.is_empty() {
                from_plain
            } else {
                document
                    .select(&div_sel)
                    .filter(|el| has_figure_class(*el))
                    .collect()
            }
        }
    };

    let mut candidates = Vec::new();
    for (position, container) in containers.into_iter().enumerate() {
        if candidates.len() >= limit {
            break;
        }
        let Some(img) = container.select(&img_sel).next() else {
            continue;
        };
        let Some(url) = image_source(img).and_then(|src| absolutize(page_url, &src)) else {
            continue;
        };
        let caption = first_text(container, &[&figcaption_sel, &caption_class_sel]);
        let label = caption
            .as_deref()
            .and_then(figure_label)
            .or_else(|| figure_label(&element_text(container)))
            .or_else(|| Some(format!("Figure {}", position + 1)));
        candidates.push(FigureCandidate {
            url,
            label,
            caption,
            declared_width: dimension_attr(img, "width"),
            declared_height: dimension_attr(img, "height"),
            fallback_url: None,
        });
    }
    Ok(candidates)
}

fn has_figure_class(el: ElementRef<'_>) -> bool {
    el.value().classes().any(|class| {
        let class = class.to_ascii_lowercase();
        FIGURE_CLASS_HINTS.iter().any(|hint| class.contains(hint))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::FigureOptions;
    use crate::content::perceptual::test_images::gradient;
    use crate::http::{DEFAULT_USER_AGENT, RateLimitedClient};
    use image::ImageFormat;
    use paperdigest_core::{Source, Work};
    use std::time::Duration;

    fn strategy(resolver: String) -> DoiLandingStrategy {
        let client = RateLimitedClient::new(Duration::ZERO, 0, DEFAULT_USER_AGENT).unwrap();
        let fetcher = FigureFetcher::new(Arc::new(client), FigureOptions::default());
        DoiLandingStrategy::new(Arc::new(fetcher), resolver)
    }

    fn ctx(doi: &str) -> ContentContext {
        let mut work = Work::new("Landing", Source::Rss);
        work.doi = Some(doi.to_string());
        ContentContext::new(work, None)
    }

    #[test]
    fn tagged_figures_win_over_plain_ones() {
        let html = r#"
            <figure data-test="figure"><img src="/a.png">
              <figcaption>Fig. 1 Tagged.</figcaption></figure>
            <figure><img src="/logo.png"></figure>
        "#;
        let found = landing_candidates(html, "https://pub.example/article", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://pub.example/a.png");
        assert_eq!(found[0].label.as_deref(), Some("Figure 1"));
    }

    #[test]
    fn figure_like_divs_are_the_last_resort() {
        let html = r#"
            <div class="article-fig-wrapper"><img src="/x.jpg" width="50" height="40">
              <p class="fig-caption-text">Unnumbered panel</p></div>
            <div class="sidebar"><img src="/ad.jpg"></div>
        "#;
        let found = landing_candidates(html, "https://pub.example/a", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].declared_width, Some(50));
        assert_eq!(found[0].caption.as_deref(), Some("Unnumbered panel"));
        assert_eq!(found[0].label.as_deref(), Some("Figure 1"));
    }

    #[test]
    fn candidate_list_is_capped() {
        let html: String = (0..15)
            .map(|i| format!(r#"<figure><img src="/f{i}.png"></figure>"#))
            .collect();
        let found = landing_candidates(&html, "https://pub.example/a", 10).unwrap();
        assert_eq!(found.len(), 10);
    }

    #[tokio::test]
    async fn follows_redirect_and_resolves_relative_images() {
        let mut server = mockito::Server::new_async().await;
        let _doi = server
            .mock("GET", "/10.1000/land")
            .with_status(302)
            .with_header("location", "/article/land")
            .create_async()
            .await;
        let _article = server
            .mock("GET", "/article/land")
            .with_body(r#"<figure><img src="images/f1.png"><figcaption>Figure 1. X</figcaption></figure>"#)
            .create_async()
            .await;
        let _img = server
            .mock("GET", "/article/images/f1.png")
            .with_body(gradient(400, 300, false, ImageFormat::Png))
            .create_async()
            .await;

        match strategy(server.url()).attempt(&ctx("10.1000/land")).await {
            StrategyOutcome::Success(set) => assert_eq!(set.figures[0].label, "Figure 1"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn paywall_is_soft_miss() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/10.1000/closed")
            .with_status(401)
            .create_async()
            .await;

        match strategy(server.url()).attempt(&ctx("10.1000/closed")).await {
            StrategyOutcome::SoftFailure(reason) => assert_eq!(reason, "access restricted"),
            other => panic!("expected soft failure, got {other:?}"),
        }
    }
}
