//! Content id derivation using BLAKE3

use crate::types::{ContentId, NodeKind};
use blake3::Hasher;

/// Compute the ContentId for file bytes
///
/// ContentId = hash("blob" || len || bytes)
///
/// The path is not part of the id: equal bytes anywhere in the
/// store yield the same id.
pub fn compute_blob_id(content: &[u8]) -> ContentId {
    let mut hasher = Hasher::new();

    // Hash type discriminator
    hasher.update(b"blob");

    // Hash length (8 bytes, big-endian for determinism)
    hasher.update(&(content.len() as u64).to_be_bytes());

    hasher.update(content);

    ContentId::from_bytes(*hasher.finalize().as_bytes())
}

/// Compute the ContentId for a directory listing
///
/// ContentId = hash("directory" || children_count || (kind || name_len || name || child_id)*)
///
/// Children must be sorted by name for determinism.
pub fn compute_directory_id(children: &[(String, NodeKind, ContentId)]) -> ContentId {
    let mut hasher = Hasher::new();

    hasher.update(b"directory");

    // Hash children count (8 bytes, big-endian)
    hasher.update(&(children.len() as u64).to_be_bytes());

    for (name, kind, child_id) in children.iter() {
        hasher.update(match kind {
            NodeKind::File => b"f",
            NodeKind::Directory => b"d",
        });
        hasher.update(&(name.len() as u64).to_be_bytes());
        hasher.update(name.as_bytes());
        hasher.update(child_id.as_bytes());
    }

    ContentId::from_bytes(*hasher.finalize().as_bytes())
}

/// Id of a directory with no children
pub fn empty_directory_id() -> ContentId {
    compute_directory_id(&[])
}
