//! Turn heterogeneous adapter payloads into canonical [`Work`] values.

use chrono::NaiveDate;
use paperdigest_core::{BIORXIV, DigestError, PMCID, PMID, Source, Work};
use serde_json::{Map, Value};

use crate::identifiers::{Doi, doi_from_url, normalize_pmcid, normalize_pmid};

type Object = Map<String, Value>;

/// Build a [`Work`] from one raw source record.
///
/// Unknown keys are ignored and missing optional fields never fail. The record
/// is rejected only when it is not a JSON object, or when it carries neither
/// a title nor any identifier.
pub fn normalize(raw: &Value, source: &Source) -> Result<Work, DigestError> {
    let obj = raw.as_object().ok_or_else(|| {
        DigestError::MalformedRecord(format!("{source} record is not a JSON object"))
    })?;

    let title = string_field(obj, &["title"])
        .map(|t| collapse_whitespace(&t))
        .unwrap_or_default();
    let mut work = Work::new(title, source.clone());
    if work.title.is_empty() {
        work.provenance.remove("title");
    }

    let url = string_field(obj, &["url", "link"]);
    work.doi = match string_field(obj, &["doi"]) {
        Some(raw_doi) => match Doi::parse(&raw_doi) {
            Ok(doi) => Some(doi.normalized),
            Err(_) => {
                tracing::warn!(%source, doi = %raw_doi, "dropping invalid DOI");
                None
            }
        },
        None => None,
    };
    if work.doi.is_none() {
        work.doi = url.as_deref().and_then(doi_from_url).map(|d| d.normalized);
    }

    if let Some(pmid) = string_field(obj, &["pmid"]) {
        match normalize_pmid(&pmid) {
            Some(id) => {
                work.external_ids.insert(PMID.into(), id);
            }
            None => tracing::warn!(%source, %pmid, "dropping invalid PMID"),
        }
    }
    if let Some(pmcid) = string_field(obj, &["pmcid", "pmc"]) {
        match normalize_pmcid(&pmcid) {
            Some(id) => {
                work.external_ids.insert(PMCID.into(), id);
            }
            None => tracing::warn!(%source, %pmcid, "dropping invalid PMCID"),
        }
    }
    if let Some(id) = string_field(obj, &["biorxiv_id", "biorxiv"]) {
        work.external_ids.insert(BIORXIV.into(), id);
    }

    if work.title.is_empty() && work.doi.is_none() && work.external_ids.is_empty() {
        return Err(DigestError::MalformedRecord(format!(
            "{source} record has neither a title nor an identifier"
        )));
    }

    work.journal = string_field(obj, &["journal", "container_title", "container-title"]);
    work.publication_date = ["publication_date", "date", "pub_date"]
        .iter()
        .filter_map(|k| obj.get(*k))
        .find_map(parse_date);
    work.authors = obj.get("authors").map(parse_authors).unwrap_or_default();
    work.abstract_text = string_field(obj, &["abstract"]);
    work.url = url;
    work.pdf_url = string_field(obj, &["pdf_url"]);
    work.open_access = obj.get("is_open_access").is_some_and(truthy);

    let filled: Vec<&str> = [
        ("doi", work.doi.is_some()),
        ("journal", work.journal.is_some()),
        ("publication_date", work.publication_date.is_some()),
        ("authors", !work.authors.is_empty()),
        ("abstract_text", work.abstract_text.is_some()),
        ("url", work.url.is_some()),
        ("pdf_url", work.pdf_url.is_some()),
    ]
    .into_iter()
    .filter_map(|(field, present)| present.then_some(field))
    .collect();
    for field in filled {
        work.provenance.insert(field.to_string(), source.clone());
    }
    for namespace in work.external_ids.keys() {
        work.provenance.insert(namespace.clone(), source.clone());
    }

    Ok(work)
}

fn string_field(obj: &Object, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(as_text)
}

fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        // Crossref-style single-element arrays.
        Value::Array(items) => return items.iter().find_map(as_text),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM` and `YYYY`, optionally followed by a time.
fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = as_text(value)?;
    let head: String = text.chars().take(10).collect();
    let head = head.replace('/', "-");

    if let Ok(date) = NaiveDate::parse_from_str(&head, "%Y-%m-%d") {
        return Some(date);
    }
    let parts: Vec<&str> = head.split('-').collect();
    let year: i32 = parts.first()?.parse().ok()?;
    let month: u32 = match parts.get(1) {
        Some(m) => m.parse().ok()?,
        None => 1,
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn parse_authors(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return as_text(value)
            .map(|s| {
                s.split(';')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(o) => string_field(o, &["name"]).or_else(|| {
                let given = string_field(o, &["given"]);
                let family = string_field(o, &["family"])?;
                Some(match given {
                    Some(g) => format!("{g} {family}"),
                    None => family,
                })
            }),
            other => as_text(other),
        })
        .map(|a| collapse_whitespace(&a))
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperdigest_core::IdentityKey;
    use serde_json::json;

    #[test]
    fn full_pubmed_record() {
        let raw = json!({
            "pmid": "38000123",
            "pmcid": "pmc9900112",
            "doi": "https://doi.org/10.1038/S41586-024-07001-X",
            "title": "  Spatial   transcriptomics of the aging brain ",
            "journal": "Nature",
            "pub_date": "2024-03-14",
            "authors": ["Kim J", {"name": "Lee S"}, {"given": "Ana", "family": "Silva"}],
            "abstract": "We profile...",
            "is_open_access": "true"
        });
        let work = normalize(&raw, &Source::PubMed).unwrap();
        assert_eq!(work.doi.as_deref(), Some("10.1038/s41586-024-07001-x"));
        assert_eq!(work.pmid(), Some("38000123"));
        assert_eq!(work.pmcid(), Some("PMC9900112"));
        assert_eq!(work.title, "Spatial transcriptomics of the aging brain");
        assert_eq!(work.publication_date, NaiveDate::from_ymd_opt(2024, 3, 14));
        assert_eq!(work.authors, ["Kim J", "Lee S", "Ana Silva"]);
        assert!(work.open_access);
        assert_eq!(work.provenance.get("doi"), Some(&Source::PubMed));
    }

    #[test]
    fn aliases_and_partial_dates() {
        let raw = json!({
            "biorxiv": "2024.01.05.574000",
            "title": "Preprint",
            "container_title": ["bioRxiv"],
            "date": "2024-01"
        });
        let work = normalize(&raw, &Source::BioRxiv).unwrap();
        assert_eq!(work.biorxiv_id(), Some("2024.01.05.574000"));
        assert_eq!(work.journal.as_deref(), Some("bioRxiv"));
        assert_eq!(work.publication_date, NaiveDate::from_ymd_opt(2024, 1, 1));

        let year_only = normalize(&json!({"title": "x", "publication_date": 2019}), &Source::Rss)
            .unwrap();
        assert_eq!(year_only.publication_date, NaiveDate::from_ymd_opt(2019, 1, 1));
    }

    #[test]
    fn doi_recovered_from_url() {
        let raw = json!({
            "title": "Feed item",
            "url": "https://elifesciences.org/articles/91234"
        });
        let work = normalize(&raw, &Source::Rss).unwrap();
        assert_eq!(work.doi.as_deref(), Some("10.7554/elife.91234"));
    }

    #[test]
    fn invalid_doi_is_dropped_not_fatal() {
        let raw = json!({"title": "Still useful", "doi": "n/a"});
        let work = normalize(&raw, &Source::Rss).unwrap();
        assert!(work.doi.is_none());
        assert_eq!(work.primary_key(), Some(IdentityKey::title("still useful")));
    }

    #[test]
    fn identifier_without_title_is_accepted() {
        let work = normalize(&json!({"pmid": 123}), &Source::PubMed).unwrap();
        assert_eq!(work.pmid(), Some("123"));
        assert!(work.title.is_empty());
        assert!(!work.provenance.contains_key("title"));
    }

    #[test]
    fn rejects_non_object_and_empty_records() {
        assert!(matches!(
            normalize(&json!(["a"]), &Source::Rss),
            Err(DigestError::MalformedRecord(_))
        ));
        assert!(matches!(
            normalize(&json!({"journal": "Cell", "title": "   "}), &Source::Rss),
            Err(DigestError::MalformedRecord(_))
        ));
    }

    #[test]
    fn garbage_dates_are_ignored() {
        let work = normalize(&json!({"title": "x", "date": "sometime"}), &Source::Rss).unwrap();
        assert!(work.publication_date.is_none());
    }
}
