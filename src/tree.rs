//! In-memory filesystem trees
//!
//! `FileTree` is the canonical representation of filesystem content moving
//! through the engine: layer deltas, mount cache contents, and final build
//! bundles are all trees. A tree is a sorted map of relative paths to file
//! entries, which makes digests and comparisons deterministic.

use crate::error::{StrataError, StrataResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A single file in a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File contents
    pub contents: Vec<u8>,
    /// Whether the file carries the executable bit
    pub executable: bool,
}

impl FileEntry {
    /// Create a regular (non-executable) file entry
    pub fn regular(contents: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: contents.into(),
            executable: false,
        }
    }

    /// Content digest of this entry (sha256 hex)
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.contents);
        hex::encode(hasher.finalize())
    }
}

/// A sorted relative-path → file map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    files: BTreeMap<PathBuf, FileEntry>,
}

impl FileTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Insert or replace a file at a relative path
    pub fn insert(&mut self, path: impl Into<PathBuf>, entry: FileEntry) {
        self.files.insert(path.into(), entry);
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&FileEntry> {
        self.files.get(path.as_ref())
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.files.contains_key(path.as_ref())
    }

    /// Iterate entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &FileEntry)> {
        self.files.iter()
    }

    /// Overlay `layer` onto this tree (layer entries win on conflict)
    pub fn apply(&mut self, layer: &FileTree) {
        for (path, entry) in layer.iter() {
            self.files.insert(path.clone(), entry.clone());
        }
    }

    /// This tree overlaid with `layer`, as a new tree
    pub fn overlaid(&self, layer: &FileTree) -> FileTree {
        let mut out = self.clone();
        out.apply(layer);
        out
    }

    /// Entries of this tree that are new or changed relative to `base`.
    ///
    /// Files present in `base` but absent here are not represented; the
    /// layer model carries additions and modifications only.
    pub fn delta_from(&self, base: &FileTree) -> FileTree {
        let mut delta = FileTree::new();
        for (path, entry) in self.iter() {
            if base.get(path) != Some(entry) {
                delta.insert(path.clone(), entry.clone());
            }
        }
        delta
    }

    /// Remove and return the subtree under `prefix` (paths made relative to it)
    pub fn take_subtree(&mut self, prefix: impl AsRef<Path>) -> FileTree {
        let prefix = prefix.as_ref();
        let mut taken = FileTree::new();
        let keys: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        for key in keys {
            if let Some(entry) = self.files.remove(&key) {
                let rel = key.strip_prefix(prefix).unwrap_or(&key).to_path_buf();
                taken.insert(rel, entry);
            }
        }
        taken
    }

    /// Insert every entry of `subtree` under `prefix`
    pub fn insert_subtree(&mut self, prefix: impl AsRef<Path>, subtree: &FileTree) {
        let prefix = prefix.as_ref();
        for (path, entry) in subtree.iter() {
            self.files.insert(prefix.join(path), entry.clone());
        }
    }

    /// Stable content digest over paths and contents (sha256 hex).
    ///
    /// Paths and contents are length-prefixed so `("ab", "c")` and
    /// `("a", "bc")` cannot collide.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, entry) in self.iter() {
            let path_str = path.to_string_lossy().replace('\\', "/");
            hasher.update((path_str.len() as u64).to_be_bytes());
            hasher.update(path_str.as_bytes());
            hasher.update((entry.contents.len() as u64).to_be_bytes());
            hasher.update(&entry.contents);
            hasher.update([u8::from(entry.executable)]);
        }
        hex::encode(hasher.finalize())
    }

    /// Capture a directory as a tree (regular files only, paths relative to `dir`)
    pub fn from_dir(dir: &Path) -> StrataResult<FileTree> {
        let mut tree = FileTree::new();
        if !dir.exists() {
            return Ok(tree);
        }
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| {
                StrataError::io(
                    format!("walking {}", dir.display()),
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walkdir loop")),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(dir)
                .map_err(|_| StrataError::Internal(format!("path escape: {}", path.display())))?
                .to_path_buf();
            let contents = fs::read(path)
                .map_err(|e| StrataError::io(format!("reading {}", path.display()), e))?;
            let executable = is_executable(&entry.metadata().map_err(|e| {
                StrataError::io(
                    format!("stat {}", path.display()),
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("metadata")),
                )
            })?);
            tree.insert(
                rel,
                FileEntry {
                    contents,
                    executable,
                },
            );
        }
        Ok(tree)
    }

    /// Materialize this tree under `dir`, creating parent directories
    pub fn write_to_dir(&self, dir: &Path) -> StrataResult<()> {
        for (path, entry) in self.iter() {
            let dest = dir.join(path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| StrataError::io(format!("creating {}", parent.display()), e))?;
            }
            fs::write(&dest, &entry.contents)
                .map_err(|e| StrataError::io(format!("writing {}", dest.display()), e))?;
            #[cfg(unix)]
            if entry.executable {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))
                    .map_err(|e| StrataError::io(format!("chmod {}", dest.display()), e))?;
            }
        }
        Ok(())
    }
}

impl FromIterator<(PathBuf, FileEntry)> for FileTree {
    fn from_iter<T: IntoIterator<Item = (PathBuf, FileEntry)>>(iter: T) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

#[cfg(unix)]
fn is_executable(md: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_md: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree_of(entries: &[(&str, &str)]) -> FileTree {
        entries
            .iter()
            .map(|(p, c)| (PathBuf::from(p), FileEntry::regular(c.as_bytes())))
            .collect()
    }

    #[test]
    fn digest_deterministic() {
        let a = tree_of(&[("a.txt", "one"), ("b/c.txt", "two")]);
        let b = tree_of(&[("b/c.txt", "two"), ("a.txt", "one")]);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_changes_with_content() {
        let a = tree_of(&[("a.txt", "one")]);
        let b = tree_of(&[("a.txt", "two")]);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn digest_length_prefixed() {
        // Path/content boundary must not be ambiguous
        let a = tree_of(&[("ab", "c")]);
        let b = tree_of(&[("a", "bc")]);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn overlay_layer_wins() {
        let base = tree_of(&[("a.txt", "old"), ("keep.txt", "keep")]);
        let layer = tree_of(&[("a.txt", "new")]);
        let merged = base.overlaid(&layer);
        assert_eq!(merged.get("a.txt").unwrap().contents, b"new");
        assert_eq!(merged.get("keep.txt").unwrap().contents, b"keep");
    }

    #[test]
    fn delta_excludes_unchanged() {
        let base = tree_of(&[("same.txt", "x"), ("changed.txt", "old")]);
        let after = tree_of(&[("same.txt", "x"), ("changed.txt", "new"), ("added.txt", "a")]);
        let delta = after.delta_from(&base);
        assert_eq!(delta.len(), 2);
        assert!(delta.contains("changed.txt"));
        assert!(delta.contains("added.txt"));
        assert!(!delta.contains("same.txt"));
    }

    #[test]
    fn subtree_roundtrip() {
        let mut tree = tree_of(&[("cache/pkg/a", "1"), ("cache/pkg/b", "2"), ("src/main", "m")]);
        let taken = tree.take_subtree("cache/pkg");
        assert_eq!(taken.len(), 2);
        assert!(taken.contains("a"));
        assert_eq!(tree.len(), 1);

        tree.insert_subtree("cache/pkg", &taken);
        assert!(tree.contains("cache/pkg/b"));
    }

    #[test]
    fn dir_roundtrip() {
        let dir = TempDir::new().unwrap();
        let tree = tree_of(&[("a.txt", "hello"), ("nested/b.txt", "world")]);
        tree.write_to_dir(dir.path()).unwrap();

        let read = FileTree::from_dir(dir.path()).unwrap();
        assert_eq!(read, tree);
    }

    #[test]
    fn from_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let tree = FileTree::from_dir(&dir.path().join("nope")).unwrap();
        assert!(tree.is_empty());
    }
}
