use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a document as reported by the metadata API
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    #[serde(rename = "colab-statement")]
    ColabStatement,
    #[serde(rename = "colab-sheet")]
    ColabSheet,
    #[serde(other)]
    Other,
}

impl DocumentKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "colab-statement" => DocumentKind::ColabStatement,
            "colab-sheet" => DocumentKind::ColabSheet,
            _ => DocumentKind::Other,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::ColabStatement => write!(f, "colab-statement"),
            DocumentKind::ColabSheet => write!(f, "colab-sheet"),
            DocumentKind::Other => write!(f, "other"),
        }
    }
}

/// Room identifier shared by the persistent and the ephemeral channel of a document.
/// Format: "org_id/doc_id"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(org_id: &str, doc_id: &str) -> Self {
        RoomId(format!("{}/{}", org_id, doc_id))
    }

    /// Parse a room identifier, splitting on the first '/'
    pub fn parse(value: &str) -> Option<Self> {
        let (org, doc) = value.split_once('/')?;
        if org.is_empty() || doc.is_empty() {
            return None;
        }
        Some(RoomId(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn org_id(&self) -> &str {
        self.0.split_once('/').map(|(org, _)| org).unwrap_or(&self.0)
    }

    pub fn doc_id(&self) -> &str {
        self.0.split_once('/').map(|(_, doc)| doc).unwrap_or("")
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Externally supplied identity of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentIdentity {
    pub org_id: String,
    pub doc_id: String,
}

impl DocumentIdentity {
    pub fn new(org_id: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            doc_id: doc_id.into(),
        }
    }

    pub fn room_id(&self) -> RoomId {
        RoomId::new(&self.org_id, &self.doc_id)
    }
}

/// Document metadata returned by the metadata API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub id: String,
    pub org: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DocumentMetadata {
    pub fn identity(&self) -> DocumentIdentity {
        DocumentIdentity::new(self.org.clone(), self.id.clone())
    }
}

/// The signed-in user a session participates as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
