//! Abstract recovery from a DOI landing page, for records that arrive
//! without one.

use std::sync::Arc;

use scraper::Html;

use super::html::{element_text, normalize_whitespace, parse_selector};
use crate::error::Result;
use crate::http::RateLimitedClient;

/// Shorter text is usually a site tagline rather than an abstract.
const MIN_ABSTRACT_CHARS: usize = 100;
const MAX_ABSTRACT_CHARS: usize = 3000;

/// Meta tags checked in order, matched case-insensitively on `name` or `property`.
const META_KEYS: &[&str] = &[
    "citation_abstract",
    "description",
    "dc.description",
    "og:description",
];

pub struct AbstractFetcher {
    client: Arc<RateLimitedClient>,
    resolver: String,
}

impl AbstractFetcher {
    pub fn new(client: Arc<RateLimitedClient>, resolver: impl Into<String>) -> Self {
        Self {
            client,
            resolver: resolver.into(),
        }
    }

    /// Resolve `doi` and pull an abstract from the page. Failures are logged
    /// and yield `None`.
    pub async fn fetch(&self, doi: &str) -> Option<String> {
        let url = format!("{}/{doi}", self.resolver.trim_end_matches('/'));
        let page = match self.client.get_page(&url).await {
            Ok(page) => page,
            Err(err) => {
                tracing::debug!(doi, %err, "landing page unavailable for abstract");
                return None;
            }
        };
        match abstract_from_page(&page.body) {
            Ok(found) => {
                if found.is_some() {
                    tracing::debug!(doi, "abstract recovered from landing page");
                }
                found
            }
            Err(err) => {
                tracing::debug!(doi, %err, "landing page not parsed");
                None
            }
        }
    }
}

/// Meta descriptions first, then an element whose class or id mentions
/// "abstract".
pub fn abstract_from_page(body: &str) -> Result<Option<String>> {
    let document = Html::parse_document(body);
    let meta_sel = parse_selector("meta[content]")?;
    let section_sel = parse_selector("section[class], div[class]")?;
    let id_sel = parse_selector("[id]")?;
    let heading_sel = parse_selector("h1, h2, h3, h4")?;

    let metas: Vec<_> = document.select(&meta_sel).collect();
    for key in META_KEYS {
        let found = metas.iter().find_map(|meta| {
            let el = meta.value();
            let named = [el.attr("name"), el.attr("property")]
                .into_iter()
                .flatten()
                .any(|n| n.eq_ignore_ascii_case(key));
            named.then(|| el.attr("content")).flatten()
        });
        if let Some(text) = found.map(normalize_whitespace).and_then(accept) {
            return Ok(Some(text));
        }
    }

    let sections = document.select(&section_sel).filter(|el| {
        el.value()
            .attr("class")
            .is_some_and(|c| c.to_ascii_lowercase().contains("abstract"))
    });
    let by_id = document.select(&id_sel).filter(|el| {
        el.value()
            .attr("id")
            .is_some_and(|id| id.to_ascii_lowercase().contains("abstract"))
    });
    for el in sections.chain(by_id) {
        let mut text = element_text(el);
        if let Some(heading) = el.select(&heading_sel).next() {
            let heading = element_text(heading);
            if let Some(rest) = text.strip_prefix(heading.as_str()) {
                text = rest.trim_start().to_string();
            }
        }
        if let Some(text) = accept(text) {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

fn accept(text: String) -> Option<String> {
    if text.chars().count() <= MIN_ABSTRACT_CHARS {
        return None;
    }
    Some(text.chars().take(MAX_ABSTRACT_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::DEFAULT_USER_AGENT;
    use std::time::Duration;

    const LONG: &str = "We describe a conserved regulatory circuit that controls \
        stress responses across tissues and show that its disruption alters survival.";

    #[test]
    fn meta_description_wins() {
        let html = format!(
            r#"<html><head><meta name="Description" content="{LONG}">
               <meta property="og:description" content="Short tagline"></head></html>"#
        );
        assert_eq!(abstract_from_page(&html).unwrap().as_deref(), Some(LONG));
    }

    #[test]
    fn og_description_used_when_plain_meta_is_short() {
        let html = format!(
            r#"<meta name="description" content="Journal home">
               <meta property="og:description" content="{LONG}">"#
        );
        assert_eq!(abstract_from_page(&html).unwrap().as_deref(), Some(LONG));
    }

    #[test]
    fn abstract_section_drops_its_heading() {
        let html = format!(r#"<section class="Abstract"><h2>Abstract</h2><p>{LONG}</p></section>"#);
        assert_eq!(abstract_from_page(&html).unwrap().as_deref(), Some(LONG));
    }

    #[test]
    fn short_or_missing_text_is_ignored() {
        let html = r#"<meta name="description" content="A journal"><div id="abstract">Soon.</div>"#;
        assert_eq!(abstract_from_page(html).unwrap(), None);
        assert_eq!(abstract_from_page("<p>nothing</p>").unwrap(), None);
    }

    #[test]
    fn long_abstracts_are_truncated() {
        let html = format!(r#"<meta name="description" content="{}">"#, "a".repeat(5000));
        let text = abstract_from_page(&html).unwrap().unwrap();
        assert_eq!(text.chars().count(), MAX_ABSTRACT_CHARS);
    }

    #[tokio::test]
    async fn fetch_resolves_doi_on_landing_page() {
        let mut server = mockito::Server::new_async().await;
        let landing = server
            .mock("GET", "/10.1000/abs")
            .with_body(format!(r#"<meta name="dc.description" content="{LONG}">"#))
            .expect(1)
            .create_async()
            .await;
        let _gone = server
            .mock("GET", "/10.1000/gone")
            .with_status(404)
            .create_async()
            .await;

        let client = RateLimitedClient::new(Duration::ZERO, 0, DEFAULT_USER_AGENT).unwrap();
        let fetcher = AbstractFetcher::new(Arc::new(client), server.url());
        assert_eq!(fetcher.fetch("10.1000/abs").await.as_deref(), Some(LONG));
        assert_eq!(fetcher.fetch("10.1000/gone").await, None);
        landing.assert_async().await;
    }
}
