//! Directory tree for the naming service.
//!
//! The tree is held in memory as nested [`DirectoryNode`]s. Structural
//! operations are serialized by an internal `RwLock`, independent of the
//! path locks granted by the lock manager: path locks express application
//! semantics, while concurrent registrations and creates can still race on
//! the same subtree.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use crate::path::{Path, ROOT_NAME};
use crate::types::{EntryKind, NamingError, Result};

/// One directory in the tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryNode {
    /// Name of this directory within its parent.
    pub name: String,
    /// Subdirectories by name.
    pub subdirs: BTreeMap<String, DirectoryNode>,
    /// File names held directly by this directory.
    pub files: BTreeSet<String>,
}

impl DirectoryNode {
    /// Creates an empty directory node.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subdirs: BTreeMap::new(),
            files: BTreeSet::new(),
        }
    }

    /// Kind of the child named `name`, if any.
    pub fn child_kind(&self, name: &str) -> Option<EntryKind> {
        if self.subdirs.contains_key(name) {
            Some(EntryKind::Directory)
        } else if self.files.contains(name) {
            Some(EntryKind::File)
        } else {
            None
        }
    }

    /// Names of all children, files and subdirectories together, sorted.
    pub fn child_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .iter()
            .chain(self.subdirs.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn count_entries(&self) -> usize {
        self.files.len()
            + self.subdirs.len()
            + self.subdirs.values().map(|d| d.count_entries()).sum::<usize>()
    }
}

/// The naming service's path hierarchy.
pub struct PathHierarchy {
    root: RwLock<DirectoryNode>,
}

impl PathHierarchy {
    /// Creates a hierarchy holding only the root directory.
    pub fn new() -> Self {
        Self {
            root: RwLock::new(DirectoryNode::new(ROOT_NAME)),
        }
    }

    /// Inserts a file or directory, creating missing intermediate directories.
    ///
    /// Re-inserting a path of the same kind is a no-op. Returns true if the
    /// tree changed. Fails with `InvalidState` if a component already exists
    /// with the other kind.
    pub fn insert(&self, path: &Path, kind: EntryKind) -> Result<bool> {
        let Some(last) = path.last() else {
            return match kind {
                EntryKind::Directory => Ok(false),
                EntryKind::File => Err(NamingError::InvalidState(
                    "root is always a directory".to_string(),
                )),
            };
        };

        let mut root = self
            .root
            .write()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;

        // Check the whole walk before touching the tree so a conflict leaves it unchanged.
        let mut node: &DirectoryNode = &root;
        let mut existing = true;
        for component in &path.components()[..path.depth() - 1] {
            match node.subdirs.get(component) {
                Some(child) => node = child,
                None if node.files.contains(component) => {
                    return Err(NamingError::InvalidState(format!(
                        "{} has a file where a directory is needed: {}",
                        path, component
                    )));
                }
                None => {
                    existing = false;
                    break;
                }
            }
        }
        if existing {
            match (node.child_kind(last), kind) {
                (Some(found), wanted) if found == wanted => return Ok(false),
                (Some(found), _) => {
                    return Err(NamingError::InvalidState(format!(
                        "{} already exists as {:?}",
                        path, found
                    )));
                }
                (None, _) => {}
            }
        }

        let mut node: &mut DirectoryNode = &mut root;
        for component in &path.components()[..path.depth() - 1] {
            node = node
                .subdirs
                .entry(component.clone())
                .or_insert_with(|| DirectoryNode::new(component));
        }
        match kind {
            EntryKind::File => {
                node.files.insert(last.to_string());
            }
            EntryKind::Directory => {
                node.subdirs
                    .insert(last.to_string(), DirectoryNode::new(last));
            }
        }
        Ok(true)
    }

    /// Removes a file or a whole subdirectory. Returns the removed kind.
    pub fn remove(&self, path: &Path) -> Result<EntryKind> {
        let Some(last) = path.last() else {
            return Err(NamingError::InvalidState(
                "the root directory cannot be removed".to_string(),
            ));
        };

        let mut root = self
            .root
            .write()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;

        let mut node: &mut DirectoryNode = &mut root;
        for component in &path.components()[..path.depth() - 1] {
            node = node
                .subdirs
                .get_mut(component)
                .ok_or_else(|| NamingError::NotFound(path.clone()))?;
        }

        if node.files.remove(last) {
            Ok(EntryKind::File)
        } else if node.subdirs.remove(last).is_some() {
            Ok(EntryKind::Directory)
        } else {
            Err(NamingError::NotFound(path.clone()))
        }
    }

    /// Resolves a path to the kind of its final component.
    pub fn resolve(&self, path: &Path) -> Result<EntryKind> {
        let root = self
            .root
            .read()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;

        let Some(last) = path.last() else {
            return Ok(EntryKind::Directory);
        };
        let parent = Self::walk(&root, &path.components()[..path.depth() - 1])
            .ok_or_else(|| NamingError::NotFound(path.clone()))?;
        parent
            .child_kind(last)
            .ok_or_else(|| NamingError::NotFound(path.clone()))
    }

    /// Returns true if the path resolves.
    pub fn contains(&self, path: &Path) -> bool {
        self.resolve(path).is_ok()
    }

    /// Returns true for a directory, false for a file.
    pub fn is_directory(&self, path: &Path) -> Result<bool> {
        Ok(self.resolve(path)? == EntryKind::Directory)
    }

    /// Lists file and subdirectory names of a directory.
    pub fn list_children(&self, path: &Path) -> Result<Vec<String>> {
        let root = self
            .root
            .read()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;
        Self::walk(&root, path.components())
            .map(DirectoryNode::child_names)
            .ok_or_else(|| NamingError::NotFound(path.clone()))
    }

    /// Total number of files and directories below root.
    pub fn len(&self) -> usize {
        self.root
            .read()
            .map(|root| root.count_entries())
            .unwrap_or(0)
    }

    /// Returns true if the tree holds nothing but root.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn walk<'a>(root: &'a DirectoryNode, components: &[String]) -> Option<&'a DirectoryNode> {
        components
            .iter()
            .try_fold(root, |node, component| node.subdirs.get(component))
    }
}

impl Default for PathHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    fn make_tree() -> PathHierarchy {
        let tree = PathHierarchy::new();
        tree.insert(&p("/data/file1"), EntryKind::File).unwrap();
        tree.insert(&p("/data/files/file2"), EntryKind::File).unwrap();
        tree.insert(&p("/data/files/bollywood"), EntryKind::File).unwrap();
        tree.insert(&p("/data/xoxo/files/tvf/pr"), EntryKind::File).unwrap();
        tree
    }

    #[test]
    fn test_insert_creates_intermediate_directories() {
        let tree = make_tree();
        assert!(tree.is_directory(&p("/data/xoxo")).unwrap());
        assert!(tree.is_directory(&p("/data/xoxo/files/tvf")).unwrap());
        assert!(!tree.is_directory(&p("/data/xoxo/files/tvf/pr")).unwrap());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let tree = make_tree();
        let before = tree.len();
        assert!(!tree.insert(&p("/data/files/file2"), EntryKind::File).unwrap());
        assert!(!tree.insert(&p("/data/files"), EntryKind::Directory).unwrap());
        assert!(!tree.insert(&Path::root(), EntryKind::Directory).unwrap());
        assert_eq!(tree.len(), before);
    }

    #[test]
    fn test_insert_rejects_kind_conflict() {
        let tree = make_tree();
        let before = tree.len();
        assert!(matches!(
            tree.insert(&p("/data/files"), EntryKind::File),
            Err(NamingError::InvalidState(_))
        ));
        assert!(matches!(
            tree.insert(&p("/data/file1/nested"), EntryKind::File),
            Err(NamingError::InvalidState(_))
        ));
        assert!(matches!(
            tree.insert(&p("/data/file1"), EntryKind::Directory),
            Err(NamingError::InvalidState(_))
        ));
        assert_eq!(tree.len(), before);
    }

    #[test]
    fn test_list_children_unions_files_and_dirs() {
        let tree = make_tree();
        assert_eq!(
            tree.list_children(&Path::root()).unwrap(),
            vec!["file1", "files", "xoxo"]
        );
        assert_eq!(
            tree.list_children(&p("/data/files")).unwrap(),
            vec!["bollywood", "file2"]
        );
    }

    #[test]
    fn test_list_children_not_a_directory() {
        let tree = make_tree();
        assert!(matches!(
            tree.list_children(&p("/data/file1")),
            Err(NamingError::NotFound(_))
        ));
        assert!(matches!(
            tree.list_children(&p("/data/nope")),
            Err(NamingError::NotFound(_))
        ));
    }

    #[test]
    fn test_is_directory_missing_paths() {
        let tree = make_tree();
        assert!(tree.is_directory(&Path::root()).unwrap());
        assert!(matches!(
            tree.is_directory(&p("/data/files/xx")),
            Err(NamingError::NotFound(_))
        ));
        assert!(matches!(
            tree.is_directory(&p("/data/missing/xx")),
            Err(NamingError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_file_and_subtree() {
        let tree = make_tree();
        assert_eq!(tree.remove(&p("/data/file1")).unwrap(), EntryKind::File);
        assert!(!tree.contains(&p("/data/file1")));

        assert_eq!(tree.remove(&p("/data/xoxo")).unwrap(), EntryKind::Directory);
        assert!(!tree.contains(&p("/data/xoxo/files/tvf/pr")));
        assert_eq!(tree.list_children(&Path::root()).unwrap(), vec!["files"]);
    }

    #[test]
    fn test_remove_missing_and_root() {
        let tree = make_tree();
        assert!(matches!(
            tree.remove(&p("/data/ghost")),
            Err(NamingError::NotFound(_))
        ));
        assert!(matches!(
            tree.remove(&p("/data/ghost/deeper")),
            Err(NamingError::NotFound(_))
        ));
        assert!(matches!(
            tree.remove(&Path::root()),
            Err(NamingError::InvalidState(_))
        ));
    }

    #[test]
    fn test_len_counts_entries() {
        let tree = PathHierarchy::new();
        assert!(tree.is_empty());
        tree.insert(&p("/data/a/b/c"), EntryKind::File).unwrap();
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_concurrent_inserts_same_subtree() {
        let tree = std::sync::Arc::new(PathHierarchy::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tree = tree.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let path = p(&format!("/data/shared/dir{}/f{}", j % 5, i));
                        tree.insert(&path, EntryKind::File).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tree.list_children(&p("/data/shared")).unwrap().len(), 5);
        assert_eq!(tree.list_children(&p("/data/shared/dir0")).unwrap().len(), 8);
    }
}
