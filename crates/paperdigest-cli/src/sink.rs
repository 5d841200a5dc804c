//! On-disk delivery: figure files plus an accumulating `digest.json`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use paperdigest_core::{ContentKind, DigestError};
use paperdigest_science::{DigestEntry, DigestSink, RunSummary};
use serde_json::{Value, json};

pub const DIGEST_FILE: &str = "digest.json";

/// Writes `<output>/figures/<slug>/fig_N.ext` for every delivered figure and
/// appends entries to `<output>/digest.json`, keeping entries from earlier runs.
pub struct JsonSink {
    output: PathBuf,
    entries: Vec<Value>,
}

impl JsonSink {
    pub fn open(output: impl Into<PathBuf>) -> Result<Self, DigestError> {
        let output = output.into();
        std::fs::create_dir_all(&output)?;

        let digest_path = output.join(DIGEST_FILE);
        let entries = if digest_path.exists() {
            let existing: Value = serde_json::from_str(&std::fs::read_to_string(&digest_path)?)?;
            match existing.get("entries") {
                Some(Value::Array(entries)) => entries.clone(),
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        Ok(Self { output, entries })
    }

    pub fn digest_path(&self) -> PathBuf {
        self.output.join(DIGEST_FILE)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn write_figures(&self, entry: &DigestEntry) -> Result<Vec<String>, DigestError> {
        let Some(set) = entry
            .work
            .content_of(ContentKind::Figures)
            .and_then(|artifact| artifact.as_figures())
        else {
            return Ok(Vec::new());
        };

        let dir = self.output.join("figures").join(entry.work.slug());
        std::fs::create_dir_all(&dir)?;
        let mut files = Vec::with_capacity(set.figures.len());
        for (n, figure) in set.figures.iter().enumerate() {
            if figure.bytes.is_empty() {
                continue;
            }
            let name = format!("fig_{}.{}", n + 1, figure.extension());
            std::fs::write(dir.join(&name), &figure.bytes)?;
            files.push(relative(&self.output, &dir.join(name)));
        }
        Ok(files)
    }

    fn persist(&self, summary: Option<&RunSummary>) -> Result<(), DigestError> {
        let mut doc = json!({
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "entries": self.entries,
        });
        if let Some(summary) = summary {
            doc["last_run"] = serde_json::to_value(summary)?;
        }
        let tmp = self.output.join(format!("{DIGEST_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_string_pretty(&doc)?)?;
        std::fs::rename(&tmp, self.digest_path())?;
        Ok(())
    }
}

fn relative(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

#[async_trait]
impl DigestSink for JsonSink {
    async fn emit(&mut self, entry: &DigestEntry) -> Result<(), DigestError> {
        let files = self.write_figures(entry)?;
        let mut value = serde_json::to_value(entry)?;
        value["figure_files"] = json!(files);
        self.entries.push(value);
        self.persist(None)
    }

    async fn finish(&mut self, summary: &RunSummary) -> Result<(), DigestError> {
        self.persist(Some(summary))
    }
}
