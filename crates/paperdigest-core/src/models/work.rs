use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::content::{ContentArtifact, ContentKind};
use super::identity::{BIORXIV, IdentityKey, PMCID, PMID, fingerprint_title};
use super::source::Source;

/// A scholarly work as seen by the pipeline, possibly assembled from several
/// source records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    pub doi: Option<String>,
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
    pub title: String,
    pub title_fingerprint: String,
    pub journal: Option<String>,
    pub publication_date: Option<NaiveDate>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub abstract_text: Option<String>,
    pub url: Option<String>,
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub open_access: bool,
    #[serde(default)]
    pub source_origin: BTreeSet<Source>,
    /// Absent key: never attempted. `None`: attempted and exhausted.
    #[serde(default)]
    pub content: BTreeMap<ContentKind, Option<ContentArtifact>>,
    /// Field name to the source whose value currently fills it.
    #[serde(default)]
    pub provenance: BTreeMap<String, Source>,
    /// Keys inherited from records that collapsed into this work.
    #[serde(default)]
    pub merged_keys: BTreeSet<IdentityKey>,
}

impl Work {
    pub fn new(title: impl Into<String>, source: Source) -> Self {
        let title = title.into();
        let mut provenance = BTreeMap::new();
        provenance.insert("title".to_string(), source.clone());
        Self {
            doi: None,
            external_ids: BTreeMap::new(),
            title_fingerprint: fingerprint_title(&title),
            title,
            journal: None,
            publication_date: None,
            authors: Vec::new(),
            abstract_text: None,
            url: None,
            pdf_url: None,
            open_access: false,
            source_origin: BTreeSet::from([source]),
            content: BTreeMap::new(),
            provenance,
            merged_keys: BTreeSet::new(),
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.title_fingerprint = fingerprint_title(&self.title);
    }

    pub fn pmid(&self) -> Option<&str> {
        self.external_ids.get(PMID).map(String::as_str)
    }

    pub fn pmcid(&self) -> Option<&str> {
        self.external_ids.get(PMCID).map(String::as_str)
    }

    pub fn biorxiv_id(&self) -> Option<&str> {
        self.external_ids.get(BIORXIV).map(String::as_str)
    }

    /// Keys derived from the current field values, without inherited ones.
    pub fn own_keys(&self) -> BTreeSet<IdentityKey> {
        let mut keys = BTreeSet::new();
        if let Some(doi) = self.doi.as_deref().filter(|d| !d.is_empty()) {
            keys.insert(IdentityKey::doi(doi));
        }
        for (namespace, id) in &self.external_ids {
            if !id.is_empty() {
                keys.insert(IdentityKey::external(namespace.as_str(), id.as_str()));
            }
        }
        if !self.title_fingerprint.is_empty() {
            keys.insert(IdentityKey::title(self.title_fingerprint.as_str()));
        }
        keys
    }

    /// Every key under which this work is recognized.
    pub fn identity_keys(&self) -> BTreeSet<IdentityKey> {
        let mut keys = self.own_keys();
        keys.extend(self.merged_keys.iter().cloned());
        keys
    }

    pub fn primary_key(&self) -> Option<IdentityKey> {
        self.identity_keys()
            .into_iter()
            .min_by(|a, b| a.priority().cmp(&b.priority()).then_with(|| a.cmp(b)))
    }

    pub fn content_of(&self, kind: ContentKind) -> Option<&ContentArtifact> {
        self.content.get(&kind).and_then(Option::as_ref)
    }

    pub fn record_content(&mut self, kind: ContentKind, artifact: Option<ContentArtifact>) {
        self.content.insert(kind, artifact);
    }

    /// Short, filesystem-safe name for per-work output.
    pub fn slug(&self) -> String {
        let base = match self.primary_key() {
            Some(IdentityKey::Title { .. }) | None => self.title.clone(),
            Some(key) => key.storage_key(),
        };
        let cleaned: String = base
            .chars()
            .map(|c| match c {
                '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .take(80)
            .collect();
        let trimmed = cleaned.trim_matches('_');
        if trimmed.is_empty() {
            "untitled".to_string()
        } else {
            trimmed.to_string()
        }
    }
}
