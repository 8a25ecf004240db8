//! Core identifiers shared by every layer: content ids, roots and object paths.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

/// Raw 32-byte BLAKE3 digest
pub type Hash = [u8; 32];

/// Deterministic identifier of a byte sequence or directory listing.
///
/// Serialized as lowercase hex so manifests stay readable on disk and on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Hash);

impl ContentId {
    pub fn from_bytes(bytes: Hash) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.short())
    }
}

impl FromStr for ContentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid content id {:?}: {}", s, e))?;
        let hash: Hash = bytes
            .try_into()
            .map_err(|_| format!("invalid content id length: {:?}", s))?;
        Ok(Self(hash))
    }
}

impl Serialize for ContentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logical namespace for one watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Root(String);

impl Root {
    /// Build a root name, rejecting anything that cannot be a single path segment.
    pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
        let name: String = name.into().nfc().collect();
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(StoreError::InvalidPath(format!(
                "invalid root name: {:?}",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Derive the root name from the base name of a watched directory
    pub fn from_directory(dir: &Path) -> Result<Self, StoreError> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                StoreError::InvalidPath(format!("directory has no base name: {:?}", dir))
            })?;
        Self::new(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Top-level store path owned by this root
    pub fn object_path(&self) -> ObjectPath {
        ObjectPath(format!("/{}", self.0))
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized, slash-separated store path (`/Root/relative/file`).
///
/// Always has a single leading slash, no empty, `.` or `..` segments and no
/// trailing slash (except the store root `/`). Unicode is NFC-normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let normalized: String = raw.nfc().collect();
        let mut segments = Vec::new();
        for segment in normalized.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(StoreError::InvalidPath(format!(
                        "parent segments are not allowed: {:?}",
                        raw
                    )))
                }
                s => segments.push(s),
            }
        }
        Ok(Self(format!("/{}", segments.join("/"))))
    }

    /// Map a file below a watched directory into its root's namespace.
    pub fn for_file(root: &Root, relative: &Path) -> Result<Self, StoreError> {
        let mut path = root.object_path();
        for component in relative.components() {
            match component {
                Component::Normal(name) => {
                    path = path.join(&name.to_string_lossy())?;
                }
                Component::CurDir => continue,
                other => {
                    return Err(StoreError::InvalidPath(format!(
                        "unexpected component {:?} in {:?}",
                        other, relative
                    )))
                }
            }
        }
        Ok(path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Staging area used by object writes unless configured otherwise
    pub fn default_scratch() -> Self {
        Self("/.upload".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn join(&self, name: &str) -> Result<Self, StoreError> {
        if self.is_root() {
            Self::parse(&format!("/{}", name))
        } else {
            Self::parse(&format!("{}/{}", self.0, name))
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Final segment; empty for the store root
    pub fn name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// First segment, i.e. the root that owns this path
    pub fn top_level(&self) -> Option<&str> {
        self.segments().next()
    }

    /// True when `self` equals `ancestor` or lies below it
    pub fn starts_with(&self, ancestor: &ObjectPath) -> bool {
        if ancestor.is_root() || self == ancestor {
            return true;
        }
        self.0.starts_with(&ancestor.0) && self.0[ancestor.0.len()..].starts_with('/')
    }

    /// Re-home `self` from below `from` to below `to`
    pub fn rebase(&self, from: &ObjectPath, to: &ObjectPath) -> Option<Self> {
        if !self.starts_with(from) {
            return None;
        }
        let rest = if from.is_root() {
            &self.0[..]
        } else {
            &self.0[from.0.len()..]
        };
        Self::parse(&format!("{}{}", to.0, rest)).ok()
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectPath> for String {
    fn from(value: ObjectPath) -> Self {
        value.0
    }
}

/// Entry kind as reported by the content store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}
