//! On-disk layout of node directories.
//!
//! ```text
//! <root>/ab/cd/ef/<id>/
//!     <id>.json            node snapshot
//!     <id>.data            file bytes
//!     <id>.subset.idx      compressed subset index (subset nodes)
//!     idx/<name>.idx       built indexes
//!     parts/<n>            staged parts
//! ```

use crate::error::{StorageError, StorageResult};
use shoal_core::NodeId;
use std::path::{Component, Path, PathBuf};

/// Path arithmetic for the node directory tree. Pure, no I/O.
#[derive(Clone, Debug)]
pub struct NodeLayout {
    root: PathBuf,
}

impl NodeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn node_dir(&self, id: &NodeId) -> PathBuf {
        self.root.join(id.shard_path())
    }

    pub fn data_path(&self, id: &NodeId) -> PathBuf {
        self.node_dir(id).join(format!("{id}.data"))
    }

    pub fn snapshot_path(&self, id: &NodeId) -> PathBuf {
        self.node_dir(id).join(format!("{id}.json"))
    }

    pub fn subset_index_path(&self, id: &NodeId) -> PathBuf {
        self.node_dir(id).join(format!("{id}.subset.idx"))
    }

    pub fn index_dir(&self, id: &NodeId) -> PathBuf {
        self.node_dir(id).join("idx")
    }

    /// `idx/<name>.idx`, rejecting names that could leave the index directory.
    pub fn index_path(&self, id: &NodeId, name: &str) -> StorageResult<PathBuf> {
        validate_name(name)?;
        Ok(self.index_dir(id).join(format!("{name}.idx")))
    }

    pub fn parts_dir(&self, id: &NodeId) -> PathBuf {
        self.node_dir(id).join("parts")
    }

    pub fn part_path(&self, id: &NodeId, part: u32) -> PathBuf {
        self.parts_dir(id).join(part.to_string())
    }
}

/// Accept a single path component made of ASCII letters, digits, `_`, `-`
/// and `.`, not starting with a dot.
pub fn validate_name(name: &str) -> StorageResult<()> {
    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if name.is_empty() || name.starts_with('.') || !valid_chars || name.len() > 128 {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Resolve a server-local path for ingestion.
///
/// The path must be absolute, free of `.`/`..` components, and resolve
/// (after following symlinks) to a location inside one of `allowed`.
pub fn resolve_local_path(path: &Path, allowed: &[PathBuf]) -> StorageResult<PathBuf> {
    if !path.is_absolute() {
        return Err(StorageError::InvalidPath(format!(
            "local path must be absolute: {}",
            path.display()
        )));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return Err(StorageError::InvalidPath(format!(
            "local path contains unsafe components: {}",
            path.display()
        )));
    }

    let canonical = path
        .canonicalize()
        .map_err(|e| StorageError::from_io(e, path.display()))?;
    if !canonical.is_file() {
        return Err(StorageError::InvalidPath(format!(
            "local path is not a regular file: {}",
            path.display()
        )));
    }

    let permitted = allowed.iter().any(|prefix| {
        prefix
            .canonicalize()
            .is_ok_and(|prefix| canonical.starts_with(prefix))
    });
    if !permitted {
        return Err(StorageError::InvalidPath(format!(
            "local path is outside the allowed prefixes: {}",
            path.display()
        )));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharded_paths() {
        let id = NodeId::parse("0a1b2c3d-0000-4000-8000-000000000000").unwrap();
        let layout = NodeLayout::new("/srv/nodes");
        let dir = PathBuf::from("/srv/nodes/0a/1b/2c/0a1b2c3d-0000-4000-8000-000000000000");
        assert_eq!(layout.node_dir(&id), dir);
        assert_eq!(
            layout.data_path(&id),
            dir.join("0a1b2c3d-0000-4000-8000-000000000000.data")
        );
        assert_eq!(
            layout.index_path(&id, "record").unwrap(),
            dir.join("idx").join("record.idx")
        );
        assert_eq!(layout.part_path(&id, 3), dir.join("parts").join("3"));
    }

    #[test]
    fn test_index_names_cannot_escape() {
        let layout = NodeLayout::new("/srv/nodes");
        let id = NodeId::new();
        for bad in ["", "../x", "a/b", ".hidden", "a\\b", "name with space"] {
            assert!(
                matches!(layout.index_path(&id, bad), Err(StorageError::InvalidName(_))),
                "{bad:?}"
            );
        }
        assert!(layout.index_path(&id, "my_subset-1.v2").is_ok());
    }

    #[test]
    fn test_local_path_allow_list() {
        let allowed = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let inside = allowed.path().join("reads.fa");
        let outside = other.path().join("reads.fa");
        std::fs::write(&inside, b">a\nAC\n").unwrap();
        std::fs::write(&outside, b">a\nAC\n").unwrap();
        let prefixes = vec![allowed.path().to_path_buf()];

        assert!(resolve_local_path(&inside, &prefixes).is_ok());
        assert!(matches!(
            resolve_local_path(&outside, &prefixes),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            resolve_local_path(Path::new("relative.fa"), &prefixes),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            resolve_local_path(&allowed.path().join("missing.fa"), &prefixes),
            Err(StorageError::NotFound(_))
        ));
        assert!(resolve_local_path(&inside, &[]).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_out_of_allowed_prefix_rejected() {
        use std::os::unix::fs::symlink;

        let allowed = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let secret = other.path().join("secret.fa");
        std::fs::write(&secret, b">s\nAC\n").unwrap();
        let link = allowed.path().join("link.fa");
        symlink(&secret, &link).unwrap();

        assert!(matches!(
            resolve_local_path(&link, &[allowed.path().to_path_buf()]),
            Err(StorageError::InvalidPath(_))
        ));
    }
}
