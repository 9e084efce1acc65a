use std::io;
use std::path::Path;

use dashmap::DashMap;

use crate::model::PersonId;

/// Shown when the directory has no entry for a person.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Resolves person ids to human names for notification text.
pub trait Directory: Send + Sync {
    fn display_name(&self, person: &str) -> Option<String>;

    /// Never fails; unresolved people render as [`UNKNOWN_NAME`].
    fn display_name_or_unknown(&self, person: &str) -> String {
        self.display_name(person)
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }
}

/// In-memory directory, optionally seeded from a JSON object `{"person": "Name"}`.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    names: DashMap<PersonId, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let entries: std::collections::HashMap<PersonId, String> = serde_json::from_str(json)?;
        Ok(Self {
            names: entries.into_iter().collect(),
        })
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn insert(&self, person: impl Into<PersonId>, name: impl Into<String>) {
        self.names.insert(person.into(), name.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Directory for StaticDirectory {
    fn display_name(&self, person: &str) -> Option<String> {
        self.names.get(person).map(|e| e.value().clone())
    }
}
