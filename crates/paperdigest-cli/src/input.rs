//! Reading adapter output from disk.

use std::path::Path;

use anyhow::{Context, Result};
use paperdigest_science::InputRecord;
use serde_json::Value;

/// Records read from one or more input files.
#[derive(Debug, Default)]
pub struct LoadedInput {
    pub records: Vec<InputRecord>,
    /// Envelopes that were not `{"source", "record"}` objects.
    pub rejected: usize,
    /// Records whose source is not in `[sources].enabled`.
    pub disabled: usize,
}

pub fn load_inputs(paths: &[impl AsRef<Path>], enabled: &[String]) -> Result<LoadedInput> {
    let mut loaded = LoadedInput::default();
    for path in paths {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading input {}", path.display()))?;
        let (records, rejected) = parse_envelopes(&contents)
            .with_context(|| format!("parsing input {}", path.display()))?;
        tracing::debug!(path = %path.display(), records = records.len(), rejected, "input loaded");
        loaded.rejected += rejected;
        for record in records {
            if is_enabled(&record, enabled) {
                loaded.records.push(record);
            } else {
                loaded.disabled += 1;
            }
        }
    }
    Ok(loaded)
}

/// Accepts a JSON array of envelopes or one envelope per line.
pub fn parse_envelopes(contents: &str) -> Result<(Vec<InputRecord>, usize)> {
    let trimmed = contents.trim_start();
    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).context("input is not a JSON array")?
    } else {
        let mut values = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value = serde_json::from_str(line)
                .with_context(|| format!("line {} is not valid JSON", n + 1))?;
            values.push(value);
        }
        values
    };

    let mut records = Vec::with_capacity(values.len());
    let mut rejected = 0;
    for value in values {
        match serde_json::from_value::<InputRecord>(value) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(%err, "skipping input envelope");
                rejected += 1;
            }
        }
    }
    Ok((records, rejected))
}

fn is_enabled(record: &InputRecord, enabled: &[String]) -> bool {
    enabled.is_empty()
        || enabled
            .iter()
            .any(|name| name.eq_ignore_ascii_case(record.source.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperdigest_core::Source;
    use tempfile::TempDir;

    #[test]
    fn test_parse_json_array() {
        let input = r#"[
            {"source": "pubmed", "record": {"pmid": "1", "title": "A"}},
            {"source": "biorxiv", "record": {"doi": "10.1101/2024.01.01.000001", "title": "B"}}
        ]"#;
        let (records, rejected) = parse_envelopes(input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(rejected, 0);
        assert_eq!(records[0].source, Source::PubMed);
        assert_eq!(records[1].source, Source::BioRxiv);
    }

    #[test]
    fn test_parse_json_lines_skips_bad_envelopes() {
        let input = "{\"source\": \"rss\", \"record\": {\"title\": \"A\"}}\n\n\
                     {\"record\": {\"title\": \"no source\"}}\n\
                     {\"source\": \"medrxiv\", \"record\": {\"title\": \"B\"}}\n";
        let (records, rejected) = parse_envelopes(input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(rejected, 1);
        assert_eq!(records[1].source, Source::MedRxiv);
    }

    #[test]
    fn test_parse_invalid_line_is_an_error() {
        let err = parse_envelopes("{\"source\": \"rss\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
    }

    #[test]
    fn test_load_inputs_filters_disabled_sources() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.jsonl");
        std::fs::write(&first, r#"[{"source": "pubmed", "record": {"title": "A"}}]"#).unwrap();
        std::fs::write(&second, "{\"source\": \"rss\", \"record\": {\"title\": \"B\"}}\n").unwrap();

        let loaded = load_inputs(&[&first, &second], &["PubMed".to_string()]).unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.disabled, 1);

        let all = load_inputs(&[&first, &second], &[]).unwrap();
        assert_eq!(all.records.len(), 2);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_inputs(&["/nonexistent/paperdigest.json"], &[]).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/paperdigest.json"));
    }
}
