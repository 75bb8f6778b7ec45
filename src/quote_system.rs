// QuoteSystem configuration model and the built-in catalog.
// The catalog resource is parsed once per process and cached; a corrupt
// resource is a fatal configuration error surfaced to the caller.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use tracing::debug;

/// One quotation level: the marker that opens it, the marker that closes it,
/// and the continuer re-emitted at the start of each follow-on paragraph
/// while the level is still open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationMark {
    pub open: String,
    pub close: String,
    #[serde(rename = "continue")]
    pub continuer: String,
}

impl QuotationMark {
    pub fn new(open: &str, close: &str, continuer: &str) -> Self {
        QuotationMark {
            open: open.to_string(),
            close: close.to_string(),
            continuer: continuer.to_string(),
        }
    }
}

/// How a dialogue-dash quotation ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DashEnd {
    /// The quote runs to the end of the paragraph (or survives into a
    /// follow-on paragraph under the continuation rules).
    ParagraphOnly,
    /// An explicit end-marker string.
    Marker(String),
    /// Any word-final run of trailing punctuation closes the quote.
    AnyPunctuation,
}

/// Dialogue-dash convention: a leading dash introduces speech instead of
/// paired marks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogueDash {
    pub marker: String,
    pub end: DashEnd,
    /// Whether a fresh dash inside an open dash-quote signals a change of
    /// speaker (closing the current quote and opening a new one).
    pub change_of_speaker_allowed: bool,
}

/// A language's quotation-mark/dash convention, possibly multi-level.
/// Equality is structural: two systems with the same levels and dash
/// convention are the same system regardless of catalog name.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct QuoteSystem {
    pub name: String,
    pub levels: Vec<QuotationMark>,
    pub dash: Option<DialogueDash>,
}

impl PartialEq for QuoteSystem {
    fn eq(&self, other: &Self) -> bool {
        self.levels == other.levels && self.dash == other.dash
    }
}

impl Hash for QuoteSystem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.levels.hash(state);
        self.dash.hash(state);
    }
}

impl QuoteSystem {
    pub fn new(name: impl Into<String>, levels: Vec<QuotationMark>, dash: Option<DialogueDash>) -> Self {
        QuoteSystem { name: name.into(), levels, dash }
    }

    pub fn first_level(&self) -> Option<&QuotationMark> {
        self.levels.first()
    }

    /// 1-based level access.
    pub fn level(&self, n: usize) -> Option<&QuotationMark> {
        if n == 0 {
            return None;
        }
        self.levels.get(n - 1)
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// The named catalog fallback used when nothing better is known.
    pub fn default_system() -> Result<&'static QuoteSystem> {
        let systems = all_systems()?;
        systems
            .iter()
            .find(|s| s.name == DEFAULT_SYSTEM_NAME)
            .context("quote system catalog is missing the default entry")
    }
}

const DEFAULT_SYSTEM_NAME: &str = "Guillemets";

const CATALOG_JSON: &str = include_str!("quote_systems.json");

static CATALOG: OnceLock<Vec<QuoteSystem>> = OnceLock::new();

#[derive(Deserialize)]
struct CatalogFile {
    systems: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    name: String,
    levels: Vec<QuotationMark>,
    #[serde(default)]
    dash_marker: Option<String>,
    #[serde(default)]
    dash_end_marker: Option<String>,
    #[serde(default)]
    dash_change_of_speaker: bool,
}

impl CatalogEntry {
    fn into_system(self) -> QuoteSystem {
        let dash = self.dash_marker.map(|marker| DialogueDash {
            marker,
            end: match self.dash_end_marker.as_deref() {
                None => DashEnd::ParagraphOnly,
                Some("anyPunctuation") => DashEnd::AnyPunctuation,
                Some(m) => DashEnd::Marker(m.to_string()),
            },
            change_of_speaker_allowed: self.dash_change_of_speaker,
        });
        QuoteSystem { name: self.name, levels: self.levels, dash }
    }
}

fn parse_catalog(json: &str) -> Result<Vec<QuoteSystem>> {
    let file: CatalogFile =
        serde_json::from_str(json).context("built-in quote system catalog is corrupt")?;
    let systems: Vec<QuoteSystem> = file.systems.into_iter().map(CatalogEntry::into_system).collect();
    if systems.is_empty() {
        anyhow::bail!("built-in quote system catalog is empty");
    }
    Ok(systems)
}

/// All built-in quote systems. Parsed once and cached for the process
/// lifetime; a corrupt catalog is a fatal configuration error.
pub fn all_systems() -> Result<&'static [QuoteSystem]> {
    if let Some(systems) = CATALOG.get() {
        return Ok(systems.as_slice());
    }
    let parsed = parse_catalog(CATALOG_JSON)?;
    debug!("Loaded quote system catalog with {} entries", parsed.len());
    Ok(CATALOG.get_or_init(|| parsed).as_slice())
}

/// Catalog systems deduplicated on their first-level marks plus dash
/// convention - the candidate set the guesser can actually distinguish.
pub fn all_unique_first_level_systems() -> Result<Vec<&'static QuoteSystem>> {
    let systems = all_systems()?;
    let mut unique: Vec<&'static QuoteSystem> = Vec::new();
    for system in systems {
        let duplicate = unique
            .iter()
            .any(|u| u.first_level() == system.first_level() && u.dash == system.dash);
        if !duplicate {
            unique.push(system);
        }
    }
    Ok(unique)
}

/// Return the catalog system matching the given first level and dash
/// convention, or synthesize an ad-hoc system. A synthesized system inherits
/// higher levels from a catalog entry sharing the same first level when one
/// exists.
pub fn get_or_create(first_level: QuotationMark, dash: Option<DialogueDash>) -> Result<QuoteSystem> {
    let systems = all_systems()?;
    if let Some(found) = systems
        .iter()
        .find(|s| s.first_level() == Some(&first_level) && s.dash == dash)
    {
        return Ok(found.clone());
    }
    let mut levels = vec![first_level.clone()];
    if let Some(related) = systems.iter().find(|s| s.first_level() == Some(&first_level)) {
        levels.extend(related.levels.iter().skip(1).cloned());
    }
    debug!(open = %first_level.open, close = %first_level.close, "Synthesized ad-hoc quote system");
    Ok(QuoteSystem::new("", levels, dash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_loads_and_caches() {
        let systems = all_systems().unwrap();
        assert!(!systems.is_empty());
        // Second call returns the same cached slice.
        let again = all_systems().unwrap();
        assert_eq!(systems.as_ptr(), again.as_ptr());
    }

    #[test]
    fn test_default_system_is_guillemets() {
        let default = QuoteSystem::default_system().unwrap();
        assert_eq!(default.name, "Guillemets");
        assert_eq!(default.first_level().unwrap().open, "«");
        assert_eq!(default.first_level().unwrap().close, "»");
    }

    #[test]
    fn test_structural_equality_ignores_name() {
        let default = QuoteSystem::default_system().unwrap();
        let mut renamed = default.clone();
        renamed.name = "something else".to_string();
        assert_eq!(*default, renamed);
    }

    #[test]
    fn test_get_or_create_returns_catalog_match() {
        let level = QuotationMark::new("«", "»", "«");
        let system = get_or_create(level, None).unwrap();
        assert_eq!(system.name, "Guillemets");
        assert_eq!(system.depth(), 3);
    }

    #[test]
    fn test_get_or_create_synthesizes_with_inherited_levels() {
        let level = QuotationMark::new("«", "»", "«");
        let dash = DialogueDash {
            marker: "–".to_string(),
            end: DashEnd::ParagraphOnly,
            change_of_speaker_allowed: false,
        };
        let system = get_or_create(level.clone(), Some(dash.clone())).unwrap();
        assert!(system.name.is_empty());
        assert_eq!(system.first_level(), Some(&level));
        assert_eq!(system.dash, Some(dash));
        // Higher levels inherited from the catalog guillemets entry.
        assert_eq!(system.level(2).unwrap().open, "‹");
    }

    #[test]
    fn test_get_or_create_unknown_first_level() {
        let level = QuotationMark::new("<<", ">>", "<<");
        let system = get_or_create(level.clone(), None).unwrap();
        assert_eq!(system.levels, vec![level]);
    }

    #[test]
    fn test_unique_first_level_systems_dedupe() {
        let unique = all_unique_first_level_systems().unwrap();
        let all = all_systems().unwrap();
        assert!(unique.len() <= all.len());
        for (i, a) in unique.iter().enumerate() {
            for b in &unique[i + 1..] {
                assert!(a.first_level() != b.first_level() || a.dash != b.dash);
            }
        }
    }

    #[test]
    fn test_catalog_parse_rejects_garbage() {
        assert!(parse_catalog("not json").is_err());
        assert!(parse_catalog("{\"systems\": []}").is_err());
    }
}
