//! Achievement classification table: which ids skip the minimum-effort gate
//! and which are retained forever once earned.
//!
//! Kept as loaded data rather than inline lists so a new achievement id can
//! be classified without touching evaluation logic.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationEntry {
    pub id: String,
    /// Exempt from the minimum-effort qualification gate. First-test,
    /// time-of-day, explorer, endurance, and exact-number achievements
    /// would be actively unfair to gate.
    #[serde(default)]
    pub exempt: bool,
    /// Retained once earned, even when reconciliation finds no remaining
    /// evidence: deleting an unrelated later result cannot make a historical
    /// moment not have happened.
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Clone)]
pub struct Classification {
    entries: HashMap<String, ClassificationEntry>,
}

/// Bundled default table covering the built-in rule set.
const DEFAULT_TABLE: &str = r#"[
    {"id": "first_test",      "exempt": true},
    {"id": "explorer",        "exempt": true},
    {"id": "endurance",       "exempt": true},
    {"id": "night_owl",       "exempt": true, "permanent": true},
    {"id": "early_bird",      "exempt": true, "permanent": true},
    {"id": "weekend_warrior", "exempt": true, "permanent": true},
    {"id": "new_year",        "exempt": true, "permanent": true},
    {"id": "halloween",       "exempt": true, "permanent": true},
    {"id": "exact_100",       "exempt": true, "permanent": true},
    {"id": "exact_42",        "exempt": true, "permanent": true},
    {"id": "pb_leap",         "permanent": true}
]"#;

impl Classification {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        let list: Vec<ClassificationEntry> = serde_json::from_str(json)?;
        Ok(Self {
            entries: list.into_iter().map(|e| (e.id.clone(), e)).collect(),
        })
    }

    /// Load from a JSON file, falling back to the bundled table when the
    /// file is missing or malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        if let Ok(text) = fs::read_to_string(path) {
            if let Ok(table) = Self::from_json_str(&text) {
                return table;
            }
        }
        Self::default()
    }

    /// Gate-exempt: evaluated over all valid results, not just qualifying
    /// ones.
    pub fn is_exempt(&self, id: &str) -> bool {
        self.entries.get(id).map(|e| e.exempt).unwrap_or(false)
    }

    /// Never removed by reconciliation once earned.
    pub fn is_permanent(&self, id: &str) -> bool {
        self.entries.get(id).map(|e| e.permanent).unwrap_or(false)
    }
}

impl Default for Classification {
    fn default() -> Self {
        // The bundled table is a compile-time constant; parsing it cannot
        // fail once the unit tests pass.
        Self::from_json_str(DEFAULT_TABLE)
            .unwrap_or(Self {
                entries: HashMap::new(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_table_parses() {
        let c = Classification::from_json_str(DEFAULT_TABLE).unwrap();
        assert!(c.is_exempt("first_test"));
        assert!(!c.is_permanent("first_test"));
        assert!(c.is_exempt("night_owl"));
        assert!(c.is_permanent("night_owl"));
        assert!(c.is_permanent("pb_leap"));
        assert!(!c.is_exempt("pb_leap"));
    }

    #[test]
    fn unknown_ids_are_gated_and_removable() {
        let c = Classification::default();
        assert!(!c.is_exempt("speed_100"));
        assert!(!c.is_permanent("speed_100"));
    }

    #[test]
    fn custom_table_overrides_default() {
        let c = Classification::from_json_str(r#"[{"id": "speed_100", "exempt": true}]"#).unwrap();
        assert!(c.is_exempt("speed_100"));
        assert!(!c.is_exempt("first_test"));
    }

    #[test]
    fn load_missing_file_falls_back_to_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let c = Classification::load(dir.path().join("nope.json"));
        assert!(c.is_exempt("explorer"));
    }
}
