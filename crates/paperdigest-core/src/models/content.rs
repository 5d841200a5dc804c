use serde::{Deserialize, Serialize};

/// Kinds of content a work can be enriched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Figures,
    FullText,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Figures => "figures",
            Self::FullText => "full_text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentArtifact {
    Figures(FigureSet),
    FullText { text: String },
}

impl ContentArtifact {
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Figures(_) => ContentKind::Figures,
            Self::FullText { .. } => ContentKind::FullText,
        }
    }

    pub fn as_figures(&self) -> Option<&FigureSet> {
        match self {
            Self::Figures(set) => Some(set),
            Self::FullText { .. } => None,
        }
    }
}

/// Where a figure was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FigureLocator {
    Url(String),
    Page(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    /// "Figure 2", "Figure 3B", or a positional label when unnumbered.
    pub label: String,
    pub caption: Option<String>,
    pub locator: FigureLocator,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Perceptual hash used for near-duplicate suppression.
    pub fingerprint: u64,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Figure {
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "jpg",
        }
    }
}

/// Figures acquired for one work, in presentation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FigureSet {
    pub figures: Vec<Figure>,
    /// Name of the strategy that produced the set.
    pub acquired_by: String,
}

impl FigureSet {
    pub fn new(acquired_by: impl Into<String>) -> Self {
        Self {
            figures: Vec::new(),
            acquired_by: acquired_by.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }
}
