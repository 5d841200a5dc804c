pub mod doi;
pub mod extract;

pub use doi::Doi;
pub use extract::{doi_from_url, extract_dois_from_text, normalize_pmcid, normalize_pmid};
