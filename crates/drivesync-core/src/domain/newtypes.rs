//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers and values.
//! Each newtype ensures data validity at construction time, so a value that
//! exists is a value that can be trusted by the reconciler and the executor.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier for a single sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(Uuid);

impl CycleId {
    /// Create a new random CycleId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a CycleId from an existing UUID
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

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CycleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CycleId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid CycleId: {e}")))
    }
}

/// Name of a sync root, used as its stable identifier in the state store
///
/// Format: 1 to 64 characters of `[A-Za-z0-9_-]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncRootId(String);

impl SyncRootId {
    const MAX_LEN: usize = 64;

    /// Create a new SyncRootId
    ///
    /// # Errors
    /// Returns error if the name is empty, too long, or has invalid characters
    pub fn new(name: String) -> Result<Self, DomainError> {
        if name.is_empty() {
            return Err(DomainError::InvalidRootName(
                "Root name cannot be empty".to_string(),
            ));
        }

        if name.len() > Self::MAX_LEN {
            return Err(DomainError::InvalidRootName(format!(
                "Root name longer than {} characters: {name}",
                Self::MAX_LEN
            )));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::InvalidRootName(format!(
                "Root name contains invalid characters: {name}"
            )));
        }

        Ok(Self(name))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SyncRootId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncRootId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for SyncRootId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<SyncRootId> for String {
    fn from(id: SyncRootId) -> Self {
        id.0
    }
}

// ============================================================================
// Path types
// ============================================================================

/// A validated path relative to the sync root, using `/` as separator
///
/// RelativePath ensures the path is:
/// - Non-empty, with no leading or trailing `/`
/// - Free of empty, `.` and `..` components
/// - Free of backslashes and NUL bytes
///
/// The same value names an item on both sides of a sync root. Ordering is
/// plain string ordering, which keeps scan output deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Create a new RelativePath
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if any component is invalid
    pub fn new(path: String) -> Result<Self, DomainError> {
        if path.is_empty() {
            return Err(DomainError::InvalidPath("Path cannot be empty".to_string()));
        }

        if path.contains('\\') || path.contains('\0') {
            return Err(DomainError::InvalidPath(format!(
                "Path contains invalid characters: {path}"
            )));
        }

        for component in path.split('/') {
            Self::validate_component(component).map_err(|_| {
                DomainError::InvalidPath(format!("Path has invalid component: {path}"))
            })?;
        }

        Ok(Self(path))
    }

    /// Create a single-component path from an item name
    ///
    /// # Errors
    /// Returns error if the name is not a valid component
    pub fn from_name(name: &str) -> Result<Self, DomainError> {
        Self::validate_component(name)?;
        Ok(Self(name.to_string()))
    }

    /// Build a RelativePath from a local path below `root`
    ///
    /// # Errors
    /// Returns error if `path` is not below `root` or is not valid UTF-8
    pub fn from_local(root: &Path, path: &Path) -> Result<Self, DomainError> {
        let relative = path.strip_prefix(root).map_err(|_| {
            DomainError::InvalidPath(format!(
                "{} is not within {}",
                path.display(),
                root.display()
            ))
        })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            let part = component.as_os_str().to_str().ok_or_else(|| {
                DomainError::InvalidPath(format!("Path is not valid UTF-8: {}", path.display()))
            })?;
            parts.push(part);
        }

        Self::new(parts.join("/"))
    }

    fn validate_component(component: &str) -> Result<(), DomainError> {
        if component.is_empty()
            || component == "."
            || component == ".."
            || component.contains('/')
            || component.contains('\\')
            || component.contains('\0')
        {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path component: {component:?}"
            )));
        }
        Ok(())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a single component onto this path
    ///
    /// # Errors
    /// Returns error if the component is invalid
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        Self::validate_component(component)?;
        Ok(Self(format!("{}/{component}", self.0)))
    }

    /// Get the parent path, `None` for top-level items
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Get the final component
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Replace the final component
    ///
    /// # Errors
    /// Returns error if `name` is not a valid component
    pub fn with_file_name(&self, name: &str) -> Result<Self, DomainError> {
        match self.parent() {
            Some(parent) => parent.join(name),
            None => Self::from_name(name),
        }
    }

    /// Number of components (`a` is 1, `a/b` is 2)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.matches('/').count() + 1
    }

    /// Returns true if `self` is a strict ancestor of `other`
    #[must_use]
    pub fn is_ancestor_of(&self, other: &RelativePath) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Strict ancestors, nearest first
    #[must_use]
    pub fn ancestors(&self) -> Vec<RelativePath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(path) = current {
            current = path.parent();
            out.push(path);
        }
        out
    }

    /// Resolve this path below a local root directory
    #[must_use]
    pub fn to_local(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, c| acc.join(c))
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RelativePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RelativePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}

// ============================================================================
// Remote store types
// ============================================================================

/// Remote item identifier (opaque, provider-assigned)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains whitespace/control characters
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }

        if id.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains invalid characters: {id:?}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}

/// Content digest in lowercase hex
///
/// Local and remote sides must report digests of the same algorithm for
/// cross-side comparison to be meaningful (md5 by default, which matches
/// the checksum most object stores expose).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Create a new ContentHash, normalising to lowercase
    ///
    /// # Errors
    /// Returns error if the hash is empty, not hex, or of odd length
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("Hash cannot be empty".to_string()));
        }

        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidHash(format!(
                "Hash is not hexadecimal: {hash}"
            )));
        }

        if hash.len() % 2 != 0 {
            return Err(DomainError::InvalidHash(format!(
                "Hash has odd length: {hash}"
            )));
        }

        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// Hex-encode the raw output of a digest function
    #[must_use]
    pub fn from_digest(bytes: &[u8]) -> Self {
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Remote revision marker (opaque version/etag string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionMarker(String);

impl RevisionMarker {
    /// Create a new RevisionMarker
    ///
    /// # Errors
    /// Returns error if the marker is empty
    pub fn new(revision: String) -> Result<Self, DomainError> {
        if revision.is_empty() {
            return Err(DomainError::InvalidRevision(
                "Revision marker cannot be empty".to_string(),
            ));
        }
        Ok(Self(revision))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RevisionMarker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RevisionMarker {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RevisionMarker {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RevisionMarker> for String {
    fn from(revision: RevisionMarker) -> Self {
        revision.0
    }
}

// ============================================================================
// Tests
// ============================================================================
