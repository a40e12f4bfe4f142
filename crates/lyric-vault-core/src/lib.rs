use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod codec;
pub mod role;
pub mod validate;

pub use codec::{checksum, verify_checksum, Codec, SecretKey, KEY_LEN};
pub use role::{Capabilities, Grant, Operation, Role};
pub use validate::{validate, validate_field, ALLOWED_TEXT_PATTERN};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum VaultError {
    #[error("invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("{actor} is not authorized to {operation}{}", artefact_suffix(.id.as_ref()))]
    Unauthorized { operation: Operation, actor: String, id: Option<ArtefactId> },
    #[error("artefact {id} not found for {operation}")]
    NotFound { operation: Operation, id: ArtefactId },
    #[error("decryption failed{}: {reason}", for_artefact_suffix(.id.as_ref()))]
    Decryption { id: Option<ArtefactId>, reason: String },
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("thumbnail for artefact {id} failed: {reason}")]
    Thumbnail { id: ArtefactId, reason: String },
    #[error("store error: {0}")]
    Store(String),
    #[error("key material error: {0}")]
    KeyMaterial(String),
}

fn artefact_suffix(id: Option<&ArtefactId>) -> String {
    id.map(|id| format!(" artefact {id}")).unwrap_or_default()
}

fn for_artefact_suffix(id: Option<&ArtefactId>) -> String {
    id.map(|id| format!(" for artefact {id}")).unwrap_or_default()
}

impl VaultError {
    /// Stable machine-readable code for each failure kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::UnknownRole(_) => "unknown_role",
            Self::Unauthorized { .. } => "unauthorized",
            Self::NotFound { .. } => "not_found",
            Self::Decryption { .. } => "decryption_error",
            Self::Encryption(_) => "encryption_error",
            Self::Thumbnail { .. } => "thumbnail_error",
            Self::Store(_) => "store_error",
            Self::KeyMaterial(_) => "key_material_error",
        }
    }

    /// Attach the artefact a decryption failure belongs to.
    #[must_use]
    pub fn for_artefact(self, artefact_id: ArtefactId) -> Self {
        match self {
            Self::Decryption { id: None, reason } => {
                Self::Decryption { id: Some(artefact_id), reason }
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ArtefactId(pub u64);

impl ArtefactId {
    pub const FIRST: Self = Self(1);

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Display for ArtefactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArtefactId {
    type Err = VaultError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().parse::<u64>() {
            Ok(raw) if raw >= 1 => Ok(Self(raw)),
            _ => Err(VaultError::InvalidInput {
                field: "id".to_string(),
                reason: format!("artefact ids are positive integers (received: {value})"),
            }),
        }
    }
}

/// Caller-supplied title and plaintext content for create and update.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewArtefact {
    pub title: String,
    pub content: String,
}

impl NewArtefact {
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self { title: title.into(), content: content.into() }
    }
}

/// An artefact as it sits in the collection: `content` holds the cipher token
/// and `checksum` is the SHA-256 of that token.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ArtefactRecord {
    pub id: ArtefactId,
    pub title: String,
    pub content: String,
    pub checksum: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_by: String,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<OffsetDateTime>,
}

impl ArtefactRecord {
    /// Whether the stored checksum still matches the stored ciphertext.
    #[must_use]
    pub fn checksum_matches(&self) -> bool {
        verify_checksum(&self.content, &self.checksum)
    }
}

/// Decrypted view of an [`ArtefactRecord`] handed back to callers.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Artefact {
    pub id: ArtefactId,
    pub title: String,
    pub content: String,
    pub checksum: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_by: String,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<OffsetDateTime>,
}

impl Artefact {
    #[must_use]
    pub fn from_record(record: ArtefactRecord, plaintext: String) -> Self {
        Self {
            id: record.id,
            title: record.title,
            content: plaintext,
            checksum: record.checksum,
            created_at: record.created_at,
            created_by: record.created_by,
            modified_at: record.modified_at,
        }
    }
}
