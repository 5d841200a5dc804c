use std::fmt;

use serde::{Deserialize, Serialize};

/// Adapter that reported a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    PubMed,
    BioRxiv,
    MedRxiv,
    Rss,
    Other(String),
}

impl Source {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pubmed" => Self::PubMed,
            "biorxiv" => Self::BioRxiv,
            "medrxiv" => Self::MedRxiv,
            "rss" => Self::Rss,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PubMed => "pubmed",
            Self::BioRxiv => "biorxiv",
            Self::MedRxiv => "medrxiv",
            Self::Rss => "rss",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Source> for String {
    fn from(value: Source) -> Self {
        value.as_str().to_string()
    }
}

/// Static precedence over sources. Earlier entries are more trusted; sources
/// missing from the table rank below every listed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustTable {
    order: Vec<Source>,
}

impl Default for TrustTable {
    fn default() -> Self {
        Self::new(vec![
            Source::PubMed,
            Source::BioRxiv,
            Source::MedRxiv,
            Source::Rss,
        ])
    }
}

impl TrustTable {
    pub fn new(order: Vec<Source>) -> Self {
        let mut deduped: Vec<Source> = Vec::with_capacity(order.len());
        for source in order {
            if !deduped.contains(&source) {
                deduped.push(source);
            }
        }
        Self { order: deduped }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(names.into_iter().map(|n| Source::parse(n.as_ref())).collect())
    }

    /// Lower is more trusted.
    pub fn rank(&self, source: &Source) -> usize {
        self.order
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.order.len())
    }

    /// Whether a value from `candidate` should replace one held from `incumbent`.
    ///
    /// Different sources of equal rank fall back to name order so that the
    /// decision does not depend on which record arrived first. The same source
    /// never displaces itself: first seen wins.
    pub fn prefers(&self, candidate: &Source, incumbent: &Source) -> bool {
        let (cand_rank, inc_rank) = (self.rank(candidate), self.rank(incumbent));
        if cand_rank != inc_rank {
            return cand_rank < inc_rank;
        }
        if candidate == incumbent {
            return false;
        }
        candidate.as_str() < incumbent.as_str()
    }

    pub fn sources(&self) -> &[Source] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Source::parse("PubMed"), Source::PubMed);
        assert_eq!(Source::parse(" bioRxiv "), Source::BioRxiv);
        assert_eq!(Source::parse("europepmc"), Source::Other("europepmc".into()));
    }

    #[test]
    fn default_table_ranks_pubmed_over_rss() {
        let table = TrustTable::default();
        assert!(table.prefers(&Source::PubMed, &Source::Rss));
        assert!(!table.prefers(&Source::Rss, &Source::PubMed));
    }

    #[test]
    fn unlisted_sources_rank_last() {
        let table = TrustTable::from_names(["rss"]);
        assert!(table.prefers(&Source::Rss, &Source::PubMed));
        assert_eq!(table.rank(&Source::PubMed), 1);
    }

    #[test]
    fn equal_rank_between_distinct_sources_is_symmetric() {
        let table = TrustTable::new(vec![]);
        let a = Source::Other("alpha".into());
        let b = Source::Other("beta".into());
        assert!(table.prefers(&a, &b));
        assert!(!table.prefers(&b, &a));
    }

    #[test]
    fn same_source_keeps_first_seen() {
        let table = TrustTable::default();
        assert!(!table.prefers(&Source::PubMed, &Source::PubMed));
    }

    #[test]
    fn duplicate_entries_are_collapsed() {
        let table = TrustTable::from_names(["rss", "pubmed", "rss"]);
        assert_eq!(table.sources(), &[Source::Rss, Source::PubMed]);
    }
}
