use serde::{Deserialize, Serialize};

use crate::error::{Result, ScienceError};

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Doi {
    pub raw: String,
    pub normalized: String,
    pub url: String,
}

impl Doi {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        let mut stripped = DOI_PREFIXES
            .iter()
            .find_map(|p| strip_prefix_ignore_case(input, p))
            .unwrap_or(input);
        if let Some(rest) = strip_prefix_ignore_case(stripped, "doi:") {
            stripped = rest.trim_start();
        }
        let stripped = stripped.trim_end_matches(['.', ',', ';', ')']);

        if !stripped.starts_with("10.") {
            return Err(ScienceError::InvalidDoi(input.to_string()));
        }
        let (registrant, suffix) = stripped
            .split_once('/')
            .ok_or_else(|| ScienceError::InvalidDoi(input.to_string()))?;
        let code = &registrant[3..];
        let registrant_ok = code.starts_with(|c: char| c.is_ascii_digit())
            && code.chars().all(|c| c.is_ascii_digit() || c == '.');
        if suffix.is_empty() || !registrant_ok || stripped.chars().any(char::is_whitespace) {
            return Err(ScienceError::InvalidDoi(input.to_string()));
        }

        let normalized = stripped.to_lowercase();
        let url = format!("https://doi.org/{normalized}");

        Ok(Self {
            raw: input.to_string(),
            normalized,
            url,
        })
    }

    /// Registrant prefix, e.g. `10.1371`.
    pub fn prefix(&self) -> &str {
        self.normalized
            .split_once('/')
            .map(|(p, _)| p)
            .unwrap_or(&self.normalized)
    }

    pub fn suffix(&self) -> &str {
        self.normalized
            .split_once('/')
            .map(|(_, s)| s)
            .unwrap_or_default()
    }

    /// bioRxiv and medRxiv share the Cold Spring Harbor prefix.
    pub fn is_preprint_server(&self) -> bool {
        self.prefix() == "10.1101"
    }
}

fn strip_prefix_ignore_case<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    let head = input.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &input[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_doi() {
        let doi = Doi::parse("10.1000/xyz123").unwrap();
        assert_eq!(doi.normalized, "10.1000/xyz123");
        assert_eq!(doi.url, "https://doi.org/10.1000/xyz123");
    }

    #[test]
    fn doi_with_resolver_prefix() {
        let doi = Doi::parse("https://doi.org/10.1371/journal.pcbi.1011234").unwrap();
        assert_eq!(doi.normalized, "10.1371/journal.pcbi.1011234");
        assert_eq!(doi.prefix(), "10.1371");
        assert_eq!(doi.suffix(), "journal.pcbi.1011234");
    }

    #[test]
    fn doi_with_label_prefix() {
        assert_eq!(Doi::parse("DOI: 10.1000/xyz").unwrap().normalized, "10.1000/xyz");
        assert_eq!(Doi::parse("doi:10.1000/xyz").unwrap().normalized, "10.1000/xyz");
    }

    #[test]
    fn trailing_punctuation_is_dropped() {
        let doi = Doi::parse("10.7554/eLife.88001.").unwrap();
        assert_eq!(doi.normalized, "10.7554/elife.88001");
    }

    #[test]
    fn preprint_prefix_detected() {
        assert!(Doi::parse("10.1101/2024.03.01.582000").unwrap().is_preprint_server());
        assert!(!Doi::parse("10.1186/s12859-024-05700-1").unwrap().is_preprint_server());
    }

    #[test]
    fn short_registrant_is_accepted() {
        let doi = Doi::parse(" 10.1/X ").unwrap();
        assert_eq!(doi.normalized, "10.1/x");
        assert_eq!(doi.prefix(), "10.1");
    }

    #[test]
    fn reject_malformed() {
        assert!(Doi::parse("not-a-doi").is_err());
        assert!(Doi::parse("10.1000").is_err());
        assert!(Doi::parse("10./x").is_err());
        assert!(Doi::parse("10.ab/x").is_err());
        assert!(Doi::parse("10.1000/has space").is_err());
        assert!(Doi::parse("").is_err());
    }
}
