use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::TempoTarget;

/// One content variant of a catalog exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    #[serde(default)]
    pub id: Option<String>,
    pub label: String,
    /// Lowest student level allowed to draw this variation at random.
    #[serde(default = "default_min_level")]
    pub min_level: u32,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub media_links: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_min_level() -> u32 {
    1
}

impl Variation {
    /// Level gate for random draws. Zero counts as unset.
    pub fn required_level(&self) -> u32 {
        self.min_level.max(default_min_level())
    }

    /// Key recorded in outcomes: the id when present, else the label.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.label)
    }

    pub fn matches(&self, key: &str) -> bool {
        self.id.as_deref() == Some(key) || self.label == key
    }
}

/// Canonical catalog record for an exercise code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub achievement_indicator: Option<String>,
    #[serde(default)]
    pub media_links: Vec<String>,
    #[serde(default)]
    pub target_duration_secs: Option<u64>,
    #[serde(default)]
    pub tempo_targets: Vec<TempoTarget>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub backpack_key: Option<String>,
}

/// Read access to the exercise catalog.
pub trait Catalog {
    fn lookup(&self, code: &str) -> Option<&CatalogEntry>;
}

/// Catalog held in memory, keyed by exercise code.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `entry.code`.
    pub fn insert(&mut self, entry: CatalogEntry) {
        self.entries.insert(entry.code.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a JSON array of catalog entries.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&content)?;
        Ok(entries.into_iter().collect())
    }
}

impl FromIterator<CatalogEntry> for InMemoryCatalog {
    fn from_iter<I: IntoIterator<Item = CatalogEntry>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for entry in iter {
            catalog.insert(entry);
        }
        catalog
    }
}

impl Catalog for InMemoryCatalog {
    fn lookup(&self, code: &str) -> Option<&CatalogEntry> {
        self.entries.get(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variation_matches_id_or_label() {
        let v = Variation {
            id: Some("v-2".into()),
            label: "Legato".into(),
            min_level: 1,
            duration_secs: None,
            media_links: vec![],
            tags: vec![],
        };
        assert!(v.matches("v-2"));
        assert!(v.matches("Legato"));
        assert!(!v.matches("Staccato"));
        assert_eq!(v.key(), "v-2");
    }

    #[test]
    fn min_level_defaults_to_one() {
        let v: Variation = serde_json::from_str(r#"{"label":"Slurred"}"#).unwrap();
        assert_eq!(v.min_level, 1);
        let zero: Variation = serde_json::from_str(r#"{"label":"Slurred","min_level":0}"#).unwrap();
        assert_eq!(zero.required_level(), 1);
    }

    #[test]
    fn load_json_reads_entry_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{"code":"TC1","name":"Scales","variations":[{"label":"Slurred"}]},
                {"code":"FM1","name":"Etude bars 1-8"}]"#,
        )
        .unwrap();

        let catalog = InMemoryCatalog::load_json(&path).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("TC1").unwrap().variations[0].label, "Slurred");
        assert!(catalog.lookup("XX").is_none());
    }
}
