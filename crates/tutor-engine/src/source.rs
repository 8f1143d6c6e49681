//! Source content catalog and roleplay counterpart resolution.
//!
//! A source is either a reading text or a dialog script. Dialog scripts name
//! their participants; roleplay sessions assign one participant to the learner
//! and the other to the AI.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};
use crate::session::Language;

/// Maximum size of a catalog file (5MB).
pub const MAX_CATALOG_SIZE: u64 = 5 * 1024 * 1024;

/// One scripted line of a dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogLine {
    /// Participant speaking the line.
    pub speaker: String,
    /// The line itself.
    pub text: String,
}

/// A text or dialog script owned by the content collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContent {
    /// Unique id.
    pub id: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Language the source is written in, if known.
    #[serde(default)]
    pub language: Option<Language>,
    /// Full text, or a synopsis for dialogs.
    #[serde(default)]
    pub body: String,
    /// Named participants; empty for plain texts.
    #[serde(default)]
    pub participants: Vec<String>,
    /// Scripted lines, for dialogs.
    #[serde(default)]
    pub lines: Vec<DialogLine>,
}

impl SourceContent {
    /// Returns `true` if the source is a dialog script.
    #[must_use]
    pub fn is_dialog(&self) -> bool {
        !self.participants.is_empty()
    }

    /// Participants trimmed and de-duplicated, in first-seen order.
    #[must_use]
    pub fn distinct_participants(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.participants.len());
        for name in self.participants.iter().map(|p| p.trim()) {
            if !name.is_empty() && !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    /// Text handed to generation as context: the body followed by the script.
    #[must_use]
    pub fn context(&self) -> String {
        let mut context = self.body.clone();
        for line in &self.lines {
            if !context.is_empty() {
                context.push('\n');
            }
            context.push_str(&line.speaker);
            context.push_str(": ");
            context.push_str(&line.text);
        }
        context
    }
}

/// Resolves the AI's role for a roleplay in which the learner plays `selected_role`.
///
/// # Errors
///
/// Returns `TutorError::InvalidStructure` unless the source has exactly two
/// distinct participants and `selected_role` is one of them.
pub fn resolve_counterpart(source: &SourceContent, selected_role: &str) -> Result<String> {
    let participants = source.distinct_participants();
    let selected = selected_role.trim();

    if participants.len() != 2 {
        return Err(TutorError::invalid_structure(format!(
            "roleplay needs exactly two participants, source '{}' has {}",
            source.id,
            participants.len()
        )));
    }

    if !participants.contains(&selected) {
        return Err(TutorError::invalid_structure(format!(
            "'{selected}' is not a participant of source '{}'",
            source.id
        )));
    }

    participants
        .into_iter()
        .find(|p| *p != selected)
        .map(str::to_string)
        .ok_or_else(|| TutorError::invalid_structure("no counterpart role available"))
}

/// Read access to source content.
pub trait SourceCatalog: Send + Sync {
    /// Looks up a source by id.
    fn get(&self, source_id: &str) -> Option<SourceContent>;
}

/// Catalog loaded once from a JSON array on disk.
#[derive(Debug, Clone, Default)]
pub struct JsonSourceCatalog {
    sources: HashMap<String, SourceContent>,
}

impl JsonSourceCatalog {
    /// Builds a catalog from sources already in memory.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Validation` on an empty or duplicate id.
    pub fn from_sources(sources: Vec<SourceContent>) -> Result<Self> {
        let mut map = HashMap::with_capacity(sources.len());
        for source in sources {
            if source.id.trim().is_empty() {
                return Err(TutorError::validation("source id must not be empty"));
            }
            if map.contains_key(&source.id) {
                return Err(TutorError::validation(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            map.insert(source.id.clone(), source);
        }
        Ok(Self { sources: map })
    }

    /// Loads a catalog file.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::CatalogLoadError` if the file is missing, larger
    /// than 5MB, not UTF-8, not a JSON array of sources, or has duplicate ids.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TutorError::catalog_load(path, "file not found")
            } else {
                TutorError::Io(e)
            }
        })?;

        if metadata.len() > MAX_CATALOG_SIZE {
            return Err(TutorError::catalog_load(
                path,
                format!("file is {}KB, limit is 5MB", metadata.len() / 1024),
            ));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                TutorError::catalog_load(path, "file is not valid UTF-8")
            } else {
                TutorError::Io(e)
            }
        })?;

        let sources: Vec<SourceContent> = serde_json::from_str(&content)
            .map_err(|e| TutorError::catalog_load(path, e.to_string()))?;

        let catalog = Self::from_sources(sources)
            .map_err(|e| TutorError::catalog_load(path, e.to_string()))?;

        tracing::info!(path = %path.display(), sources = catalog.len(), "Loaded source catalog");
        Ok(catalog)
    }

    /// Number of sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` if the catalog has no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl SourceCatalog for JsonSourceCatalog {
    fn get(&self, source_id: &str) -> Option<SourceContent> {
        self.sources.get(source_id).cloned()
    }
}
