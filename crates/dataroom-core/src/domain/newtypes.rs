//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers and values.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// UUID-based ID types
// ============================================================================

/// Identifier for Folder records
///
/// Assigned by the remote store when the folder is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(Uuid);

impl FolderId {
    /// Create a new random FolderId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a FolderId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FolderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FolderId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid folder UUID: {e}")))
    }
}

impl From<Uuid> for FolderId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier for File records (both physical files and links)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Create a new random FileId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a FileId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid file UUID: {e}")))
    }
}

impl From<Uuid> for FileId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Either kind of tree item identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ItemId {
    Folder(FolderId),
    File(FileId),
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Folder(id) => write!(f, "{id}"),
            ItemId::File(id) => write!(f, "{id}"),
        }
    }
}

impl From<FolderId> for ItemId {
    fn from(id: FolderId) -> Self {
        ItemId::Folder(id)
    }
}

impl From<FileId> for ItemId {
    fn from(id: FileId) -> Self {
        ItemId::File(id)
    }
}

// ============================================================================
// UserId
// ============================================================================

/// Opaque reference to a user of the data room
///
/// The identity provider is external; the only requirement enforced here is
/// that the reference is non-blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a new UserId with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidId` if the value is empty or whitespace
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::InvalidId(
                "User ID cannot be empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// TreePath
// ============================================================================

/// An ordered sequence of slugs from a root folder down to a target folder
///
/// The empty path denotes the root level: a virtual folder holding the
/// top-level folders only (files cannot live at root).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreePath(Vec<String>);

impl TreePath {
    /// The root level
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from slug segments
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if any segment is empty or contains `/`
    pub fn from_slugs<I, S>(slugs: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = slugs.into_iter().map(Into::into).collect();
        for segment in &segments {
            if segment.is_empty() || segment.contains('/') {
                return Err(DomainError::InvalidPath(format!(
                    "invalid segment '{segment}'"
                )));
            }
        }
        Ok(Self(segments))
    }

    /// Parse a `/`-separated path; leading and trailing separators are ignored
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` on empty interior segments (`a//b`)
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let trimmed = s.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        if trimmed.split('/').any(str::is_empty) {
            return Err(DomainError::InvalidPath(s.to_string()));
        }
        Ok(Self(trimmed.split('/').map(str::to_string).collect()))
    }

    /// Returns true for the root level
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The slug segments, root first
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Returns a new path one level deeper
    #[must_use]
    pub fn child(&self, slug: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(slug.into());
        Self(segments)
    }

    /// Returns the parent path, or `None` for the root level
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }
}

impl Display for TreePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

impl FromStr for TreePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
