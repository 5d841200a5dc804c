use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

pub const PMID: &str = "pmid";
pub const PMCID: &str = "pmcid";
pub const BIORXIV: &str = "biorxiv";

/// One way of recognizing a work across sources and runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityKey {
    Doi { value: String },
    External { namespace: String, id: String },
    Title { fingerprint: String },
}

impl IdentityKey {
    pub fn doi(value: impl Into<String>) -> Self {
        Self::Doi {
            value: value.into().to_lowercase(),
        }
    }

    pub fn external(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self::External {
            namespace: namespace.into().to_lowercase(),
            id: id.into(),
        }
    }

    pub fn title(fingerprint: impl Into<String>) -> Self {
        Self::Title {
            fingerprint: fingerprint.into(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Doi { .. } => "doi",
            Self::External { namespace, .. } => namespace,
            Self::Title { .. } => "title",
        }
    }

    /// Lower sorts first when choosing a display key for a work.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Doi { .. } => 0,
            Self::External { namespace, .. } if namespace == PMID => 1,
            Self::External { .. } => 2,
            Self::Title { .. } => 3,
        }
    }

    /// Stable `kind:value` form used as the history primary key.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Doi { value } => format!("doi:{value}"),
            Self::External { namespace, id } => format!("{namespace}:{id}"),
            Self::Title { fingerprint } => format!("title:{fingerprint}"),
        }
    }

    pub fn parse_storage_key(raw: &str) -> Option<Self> {
        let (kind, value) = raw.split_once(':')?;
        if value.is_empty() {
            return None;
        }
        Some(match kind {
            "doi" => Self::doi(value),
            "title" => Self::title(value),
            namespace => Self::external(namespace, value),
        })
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Reduce a title to the form used for title-based identity.
///
/// Case, diacritics, punctuation and whitespace runs are erased so that
/// "Single-Cell  Atlas of the Mouse Brain." and "single cell atlas of the
/// mouse brain" share one fingerprint.
pub fn fingerprint_title(title: &str) -> String {
    let folded: String = title
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
