use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned write timestamp in epoch milliseconds.
///
/// Only timestamps handed out by the store are ever compared; client clocks are not
/// trusted for ordering.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn as_ms(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque note identifier assigned by the store on first create.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct NoteId(pub String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a note editor: at most one note exists per (user, lesson).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NoteKey {
    pub user_id: String,
    pub lesson_id: String,
}

impl NoteKey {
    pub fn new(user_id: impl Into<String>, lesson_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            lesson_id: lesson_id.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.user_id.trim().is_empty() || self.lesson_id.trim().is_empty()
    }
}

impl fmt::Display for NoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.lesson_id)
    }
}

/// Signed-in account as stored by the auth flow.
///
/// Only `id` matters here; the rest is kept opaque.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AccountInfo {
    pub id: String,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Persisted lesson note row.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Note {
    pub id: NoteId,
    pub user_id: String,
    pub lesson_id: String,
    pub course_id: String,
    pub content: String,
    pub updated_at: Timestamp,
}

impl Note {
    pub fn key(&self) -> NoteKey {
        NoteKey::new(self.user_id.clone(), self.lesson_id.clone())
    }
}

/// Result of a successful create or update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedNote {
    pub id: NoteId,
    pub updated_at: Timestamp,
}
