//! Shared scraping helpers for article pages.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Selector};

use crate::error::{Result, ScienceError};

static FIGURE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[Ff]ig(?:ure)?\.?\s*(\d+[A-Za-z]?)\b").expect("valid regex"));

pub fn parse_selector(input: &str) -> Result<Selector> {
    Selector::parse(input).map_err(|e| ScienceError::Parse(format!("invalid selector {input}: {e}")))
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn element_text(el: ElementRef<'_>) -> String {
    normalize_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// `"Figure 3B"` from text such as `"Fig. 3B. Expression of ..."`.
pub fn figure_label(text: &str) -> Option<String> {
    FIGURE_NUMBER
        .captures(text)
        .map(|c| format!("Figure {}", &c[1]))
}

/// First image source on an element, preferring lazy-load attributes that
/// usually carry the real URL.
pub fn image_source(img: ElementRef<'_>) -> Option<String> {
    ["data-src", "data-lazy-src", "data-original", "src"]
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .map(str::trim)
        .find(|s| !s.is_empty() && !s.starts_with("data:"))
        .map(String::from)
}

pub fn dimension_attr(el: ElementRef<'_>, name: &str) -> Option<u32> {
    el.value()
        .attr(name)
        .and_then(|v| v.trim().trim_end_matches("px").parse().ok())
}

/// First non-empty text among `selectors` inside `scope`.
pub fn first_text(scope: ElementRef<'_>, selectors: &[&Selector]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|sel| scope.select(sel).next())
        .map(element_text)
        .find(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn labels_from_caption_text() {
        assert_eq!(figure_label("Fig. 3B. Expression").as_deref(), Some("Figure 3B"));
        assert_eq!(figure_label("Figure 12 shows").as_deref(), Some("Figure 12"));
        assert_eq!(figure_label("Configuration"), None);
    }

    #[test]
    fn image_source_prefers_lazy_attribute() {
        let html = Html::parse_fragment(
            r#"<img src="data:image/gif;base64,R0l" data-src="/real.png" width="640px">"#,
        );
        let sel = parse_selector("img").unwrap();
        let img = html.select(&sel).next().unwrap();
        assert_eq!(image_source(img).as_deref(), Some("/real.png"));
        assert_eq!(dimension_attr(img, "width"), Some(640));
        assert_eq!(dimension_attr(img, "height"), None);
    }
}
