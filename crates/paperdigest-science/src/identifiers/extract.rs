use once_cell::sync::Lazy;
use regex::Regex;

use crate::identifiers::doi::Doi;

static DOI_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)10\.\d{4,9}/[-._;()/:A-Z0-9]+[A-Z0-9/]").expect("valid regex")
});

static PLOS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"journals\.plos\.org/\w+/article\?id=(10\.\d+/[^\s&]+)").expect("valid regex")
});
static NATURE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"nature\.com/articles/(s\d+-\d+-\d+-\w+)").expect("valid regex"));
static SCIENCE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"science\.org/doi/(10\.\d+/[^\s&?#]+)").expect("valid regex"));
static BMC_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"biomedcentral\.com/articles/(10\.\d+/[^\s&?#]+)").expect("valid regex")
});
static ELIFE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"elifesciences\.org/articles/(\d+)").expect("valid regex"));
static GENERIC_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(10\.\d{4,}/[^\s&?#]+)").expect("valid regex"));

static PMCID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:pmc)?(\d{3,10})$").expect("valid regex"));

pub fn extract_dois_from_text(text: &str) -> Vec<Doi> {
    let mut found: Vec<Doi> = DOI_REGEX
        .find_iter(text)
        .filter_map(|m| Doi::parse(m.as_str()).ok())
        .collect();
    found.dedup_by(|a, b| a.normalized == b.normalized);
    found
}

/// Recover a DOI from an article URL.
///
/// Publisher-specific layouts are tried before the generic `10.NNNN/...`
/// pattern because Nature and eLife URLs do not contain the DOI verbatim.
pub fn doi_from_url(url: &str) -> Option<Doi> {
    let url = urlencoding::decode(url)
        .map(|u| u.into_owned())
        .unwrap_or_else(|_| url.to_string());

    let candidate = if let Some(c) = PLOS_URL.captures(&url) {
        c[1].to_string()
    } else if let Some(c) = NATURE_URL.captures(&url) {
        format!("10.1038/{}", &c[1])
    } else if let Some(c) = SCIENCE_URL.captures(&url) {
        c[1].to_string()
    } else if let Some(c) = BMC_URL.captures(&url) {
        c[1].to_string()
    } else if let Some(c) = ELIFE_URL.captures(&url) {
        format!("10.7554/eLife.{}", &c[1])
    } else {
        GENERIC_URL.captures(&url)?[1].to_string()
    };

    Doi::parse(&candidate).ok()
}

/// Canonical `PMC123456` form, or `None` if the value is not a PMCID.
pub fn normalize_pmcid(raw: &str) -> Option<String> {
    let caps = PMCID_REGEX.captures(raw.trim())?;
    Some(format!("PMC{}", &caps[1]))
}

/// PubMed IDs are bare positive integers.
pub fn normalize_pmid(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("PMID:")
        .or_else(|| trimmed.strip_prefix("pmid:"))
        .unwrap_or(trimmed)
        .trim();
    (!trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) && trimmed != "0")
        .then(|| trimmed.trim_start_matches('0').to_string())
}
