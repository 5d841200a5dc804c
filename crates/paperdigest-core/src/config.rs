use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DigestError, Result};
use crate::models::TrustTable;

/// Root configuration, loaded from `~/.config/paperdigest/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sources: SourcesConfig,
    pub storage: StorageConfig,
    pub content: ContentConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub enabled: Vec<String>,
    /// Most trusted first.
    pub trust: Vec<String>,
    pub max_works: usize,
    pub open_access_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub history_path: PathBuf,
    pub output_dir: PathBuf,
    pub papers_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub min_width: u32,
    pub min_height: u32,
    pub max_figures: usize,
    /// Hamming distance at or below which two figure hashes count as the same image.
    pub similarity_threshold: u32,
    pub fetch_concurrency: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpaywall_email: Option<String>,
    pub open_access_publishers: Vec<String>,
    /// Strategy name to timeout in seconds.
    pub timeouts: BTreeMap<String, u64>,
}

/// Provider names a credential slot may name. Aliases map onto the same backend.
pub const CREDENTIAL_PROVIDERS: &[&str] = &["anthropic", "claude", "openai", "gemini", "google"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSlot {
    pub env: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub order: Vec<String>,
    pub assistant_command: String,
    pub credential_slots: Vec<CredentialSlot>,
    pub local_url: String,
    pub local_model: String,
    pub probe_timeout_secs: u64,
    pub summary_language: String,
    pub max_tokens: u32,
    /// Ask the backend for a translated abstract alongside each summary.
    pub translate_abstract: bool,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: vec![
                "pubmed".into(),
                "biorxiv".into(),
                "medrxiv".into(),
                "rss".into(),
            ],
            trust: vec![
                "pubmed".into(),
                "biorxiv".into(),
                "medrxiv".into(),
                "rss".into(),
            ],
            max_works: 50,
            open_access_only: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("./data"))
            .join("paperdigest");
        Self {
            history_path: data.join("history.db"),
            output_dir: PathBuf::from("./output"),
            papers_dir: data.join("papers"),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        let timeouts = [
            ("pmc", 30),
            ("preprint_server", 30),
            ("doi_landing", 20),
            ("publisher", 30),
            ("document", 60),
            ("record_pdf", 60),
            ("pmc_pdf", 60),
            ("unpaywall", 30),
            ("preprint_pdf", 60),
        ]
        .into_iter()
        .map(|(name, secs)| (name.to_string(), secs))
        .collect();

        Self {
            min_width: 100,
            min_height: 100,
            max_figures: 10,
            similarity_threshold: 6,
            fetch_concurrency: 3,
            unpaywall_email: None,
            open_access_publishers: vec!["plos".into(), "elife".into(), "bmc".into()],
            timeouts,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            order: vec!["assistant".into(), "credentials".into(), "local".into()],
            assistant_command: "claude".into(),
            credential_slots: vec![
                CredentialSlot {
                    env: "ANTHROPIC_API_KEY".into(),
                    provider: "anthropic".into(),
                    model: "claude-sonnet-4-20250514".into(),
                },
                CredentialSlot {
                    env: "OPENAI_API_KEY".into(),
                    provider: "openai".into(),
                    model: "gpt-4o-mini".into(),
                },
                CredentialSlot {
                    env: "GOOGLE_API_KEY".into(),
                    provider: "gemini".into(),
                    model: "gemini-2.0-flash".into(),
                },
                CredentialSlot {
                    env: "GEMINI_API_KEY".into(),
                    provider: "gemini".into(),
                    model: "gemini-2.0-flash".into(),
                },
            ],
            local_url: "http://localhost:11434".into(),
            local_model: "llama3.1".into(),
            probe_timeout_secs: 5,
            summary_language: "Korean".into(),
            max_tokens: 2048,
            translate_abstract: true,
        }
    }
}

impl ContentConfig {
    pub fn timeout_for(&self, strategy: &str) -> Option<Duration> {
        self.timeouts
            .get(strategy)
            .copied()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl BackendConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/paperdigest/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PAPERDIGEST_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("paperdigest")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config: Self = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("PAPERDIGEST_HISTORY_PATH")
            && !path.trim().is_empty()
        {
            self.storage.history_path = PathBuf::from(path);
        }
    }

    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for name in &self.sources.trust {
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(DigestError::Config(format!(
                    "source '{name}' appears twice in [sources].trust"
                )));
            }
        }
        if self.content.min_width == 0 || self.content.min_height == 0 {
            return Err(DigestError::Config(
                "[content] minimum figure dimensions must be positive".into(),
            ));
        }
        if self.content.fetch_concurrency == 0 {
            return Err(DigestError::Config(
                "[content].fetch_concurrency must be at least 1".into(),
            ));
        }
        if self.content.similarity_threshold > 64 {
            return Err(DigestError::Config(
                "[content].similarity_threshold cannot exceed 64 bits".into(),
            ));
        }
        if self.backend.order.is_empty() {
            return Err(DigestError::Config("[backend].order is empty".into()));
        }
        for name in &self.backend.order {
            if !matches!(name.as_str(), "assistant" | "credentials" | "local") {
                return Err(DigestError::Config(format!(
                    "unknown backend strategy '{name}' in [backend].order"
                )));
            }
        }
        for slot in &self.backend.credential_slots {
            if !CREDENTIAL_PROVIDERS.contains(&slot.provider.to_ascii_lowercase().as_str()) {
                return Err(DigestError::Config(format!(
                    "credential slot {} names unsupported provider '{}' (expected one of {})",
                    slot.env,
                    slot.provider,
                    CREDENTIAL_PROVIDERS.join(", ")
                )));
            }
        }
        Ok(())
    }

    pub fn trust_table(&self) -> TrustTable {
        TrustTable::from_names(&self.sources.trust)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.content.similarity_threshold, 6);
        assert_eq!(cfg.content.max_figures, 10);
        assert_eq!(cfg.backend.order, ["assistant", "credentials", "local"]);
        assert_eq!(cfg.backend.credential_slots[0].env, "ANTHROPIC_API_KEY");
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.content.unpaywall_email = Some("lab@example.org".into());
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.content.unpaywall_email, cfg.content.unpaywall_email);
        assert_eq!(loaded.backend.credential_slots, cfg.backend.credential_slots);
        assert_eq!(loaded.content.timeouts, cfg.content.timeouts);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[content]\nmax_figures = 4\n\n[content.timeouts]\ndoi_landing = 5\n",
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.content.max_figures, 4);
        assert_eq!(cfg.content.min_width, 100);
        assert_eq!(cfg.content.timeout_for("doi_landing"), Some(Duration::from_secs(5)));
        assert_eq!(cfg.content.timeout_for("pmc"), None);
        assert_eq!(cfg.backend.assistant_command, "claude");
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let cfg =
            AppConfig::load_from(Path::new("/tmp/nonexistent_paperdigest_config.toml")).unwrap();
        assert_eq!(cfg.sources.max_works, 50);
    }

    #[test]
    fn test_validate_rejects_duplicate_trust_entries() {
        let mut cfg = AppConfig::default();
        cfg.sources.trust = vec!["rss".into(), "RSS".into()];
        assert!(matches!(cfg.validate(), Err(DigestError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_backend_strategy() {
        let mut cfg = AppConfig::default();
        cfg.backend.order.push("carrier-pigeon".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsupported_provider() {
        let mut cfg = AppConfig::default();
        cfg.backend.credential_slots.insert(
            0,
            CredentialSlot {
                env: "MISTRAL_API_KEY".into(),
                provider: "mistral".into(),
                model: "mistral-large".into(),
            },
        );
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("mistral"), "{err}");

        cfg.backend.credential_slots[0].provider = "Claude".into();
        cfg.validate().unwrap();
    }

    #[test]
    fn test_download_strategies_have_default_timeouts() {
        let content = ContentConfig::default();
        for name in ["record_pdf", "pmc_pdf", "unpaywall", "preprint_pdf"] {
            assert!(content.timeout_for(name).is_some(), "{name}");
        }
        assert!(BackendConfig::default().translate_abstract);
    }

    #[test]
    fn test_trust_table_follows_config_order() {
        let mut cfg = AppConfig::default();
        cfg.sources.trust = vec!["rss".into(), "pubmed".into()];
        let table = cfg.trust_table();
        assert!(table.prefers(&Source::Rss, &Source::PubMed));
    }
}
