//! In-memory namespace of directories, files and symlinks

use std::collections::HashMap;
use std::path::{Component, Path};
use std::time::SystemTime;

use indexmap::IndexMap;

use crate::error::{FsError, FsResult};
use crate::{Attributes, BackingId, FileTimes, FileType, NodeId};

/// Filesystem node types
#[derive(Clone, Debug)]
pub enum NodeKind {
    Directory { children: IndexMap<String, NodeId> },
    File { backing: BackingId },
    Symlink { target: String },
}

/// Filesystem node
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    /// Owning directory; `None` only for the root
    pub parent: Option<NodeId>,
    pub name: String,
    pub kind: NodeKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    pub times: FileTimes,
}

impl Node {
    pub fn file_type(&self) -> FileType {
        match self.kind {
            NodeKind::Directory { .. } => FileType::Directory,
            NodeKind::File { .. } => FileType::File,
            NodeKind::Symlink { .. } => FileType::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn backing(&self) -> Option<&BackingId> {
        match &self.kind {
            NodeKind::File { backing } => Some(backing),
            _ => None,
        }
    }

    pub fn attributes(&self) -> Attributes {
        Attributes {
            node: self.id,
            file_type: self.file_type(),
            size: self.size,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            nlink: self.nlink,
            times: self.times,
        }
    }

    /// Record a content or entry-list change.
    pub fn touch(&mut self) {
        let now = SystemTime::now();
        self.times.mtime = now;
        self.times.ctime = now;
    }
}

/// A non-directory node to attach under an existing directory
#[derive(Clone, Debug)]
pub enum Leaf {
    File { backing: BackingId, mode: u32 },
    Symlink { target: String },
}

/// Split a path into its named components. `.` is ignored; `..` and
/// non-UTF-8 names are rejected.
fn components(path: &Path) -> FsResult<Vec<&str>> {
    let mut names = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(name) => names.push(name.to_str().ok_or(FsError::InvalidName)?),
            Component::ParentDir | Component::Prefix(_) => return Err(FsError::InvalidArgument),
        }
    }
    Ok(names)
}

/// Components of the parent directory plus the final name.
fn split_last(path: &Path) -> FsResult<(Vec<&str>, &str)> {
    let mut names = components(path)?;
    // The root has no name to split off
    let name = names.pop().ok_or(FsError::InvalidArgument)?;
    Ok((names, name))
}

/// Owner of every node in the namespace.
///
/// Nodes live in an arena keyed by [`NodeId`]. A directory owns its children
/// through its name index; children point back at their directory with a
/// plain id, used to walk ancestor chains when link counts change.
pub struct PathTree {
    nodes: HashMap<NodeId, Node>,
    next_node_id: u64,
    uid: u32,
    gid: u32,
}

impl PathTree {
    pub fn new(root_mode: u32, uid: u32, gid: u32) -> Self {
        let root = Node {
            id: NodeId::ROOT,
            parent: None,
            name: String::new(),
            kind: NodeKind::Directory {
                children: IndexMap::new(),
            },
            mode: root_mode,
            uid,
            gid,
            nlink: 2,
            size: 0,
            times: FileTimes::now(),
        };

        let mut nodes = HashMap::new();
        nodes.insert(NodeId::ROOT, root);
        Self {
            nodes,
            next_node_id: NodeId::ROOT.0 + 1,
            uid,
            gid,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn get(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes.get(&id).ok_or(FsError::NotFound)
    }

    fn get_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FsError::NotFound)
    }

    /// Look up `name` in directory `dir`.
    fn child(&self, dir: NodeId, name: &str) -> FsResult<Option<NodeId>> {
        match &self.get(dir)?.kind {
            NodeKind::Directory { children } => Ok(children.get(name).copied()),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn walk(&self, names: &[&str]) -> FsResult<NodeId> {
        let mut current = NodeId::ROOT;
        for name in names {
            current = self.child(current, name)?.ok_or(FsError::NotFound)?;
        }
        Ok(current)
    }

    pub fn resolve(&self, path: &Path) -> FsResult<NodeId> {
        self.walk(&components(path)?)
    }

    /// Create every missing component of `path` as a directory with `mode`.
    /// Existing directories are not modified.
    pub fn ensure_directories(&mut self, path: &Path, mode: u32) -> FsResult<NodeId> {
        let mut current = NodeId::ROOT;
        for name in components(path)? {
            current = match self.child(current, name)? {
                Some(child) if self.get(child)?.is_dir() => child,
                Some(_) => return Err(FsError::NotADirectory),
                None => self.attach(
                    current,
                    name,
                    NodeKind::Directory {
                        children: IndexMap::new(),
                    },
                    mode,
                )?,
            };
        }
        Ok(current)
    }

    /// Attach a file or symlink named `name` under the directory at `parent`.
    pub fn insert_leaf(&mut self, parent: &Path, name: &str, leaf: Leaf) -> FsResult<NodeId> {
        let parent_id = self.resolve(parent)?;
        if self.child(parent_id, name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }

        let (kind, mode, size) = match leaf {
            Leaf::File { backing, mode } => (NodeKind::File { backing }, mode, 0),
            Leaf::Symlink { target } => {
                let size = target.len() as u64;
                (NodeKind::Symlink { target }, 0o777, size)
            }
        };
        let id = self.attach(parent_id, name, kind, mode)?;
        self.get_mut(id)?.size = size;
        Ok(id)
    }

    fn attach(&mut self, parent: NodeId, name: &str, kind: NodeKind, mode: u32) -> FsResult<NodeId> {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let nlink = if matches!(kind, NodeKind::Directory { .. }) { 2 } else { 1 };
        let node = Node {
            id,
            parent: Some(parent),
            name: name.to_string(),
            kind,
            mode,
            uid: self.uid,
            gid: self.gid,
            nlink,
            size: 0,
            times: FileTimes::now(),
        };

        let parent_node = self.get_mut(parent)?;
        match &mut parent_node.kind {
            NodeKind::Directory { children } => {
                children.insert(name.to_string(), id);
            }
            _ => return Err(FsError::NotADirectory),
        }
        parent_node.touch();
        self.nodes.insert(id, node);
        self.recompute_links(parent);
        Ok(id)
    }

    /// Take `id` out of its parent's name index, leaving it in the arena.
    fn unhook(&mut self, id: NodeId) -> FsResult<NodeId> {
        let (parent, name) = {
            let node = self.get(id)?;
            (node.parent.ok_or(FsError::InvalidArgument)?, node.name.clone())
        };
        let parent_node = self.get_mut(parent)?;
        if let NodeKind::Directory { children } = &mut parent_node.kind {
            children.shift_remove(&name);
        }
        parent_node.touch();
        Ok(parent)
    }

    /// Detach the node at `path` and hand it back. Directories must be empty.
    pub fn remove(&mut self, path: &Path) -> FsResult<Node> {
        let id = self.resolve(path)?;
        if let NodeKind::Directory { children } = &self.get(id)?.kind {
            if id == NodeId::ROOT {
                return Err(FsError::InvalidArgument);
            }
            if !children.is_empty() {
                return Err(FsError::NotEmpty);
            }
        }

        let parent = self.unhook(id)?;
        let node = self.nodes.remove(&id).ok_or(FsError::NotFound)?;
        self.recompute_links(parent);
        Ok(node)
    }

    /// Relocate the subtree at `from` so that it lives at `to`.
    pub fn move_subtree(&mut self, from: &Path, to: &Path) -> FsResult<()> {
        let id = self.resolve(from)?;
        if id == NodeId::ROOT {
            return Err(FsError::InvalidArgument);
        }

        let (parent_names, new_name) = split_last(to)?;
        let new_parent = self.walk(&parent_names)?;
        match self.child(new_parent, new_name)? {
            Some(existing) if existing == id => return Ok(()),
            Some(_) => return Err(FsError::AlreadyExists),
            None => {}
        }
        if self.is_ancestor_or_self(id, new_parent) {
            return Err(FsError::InvalidArgument);
        }

        let old_parent = self.unhook(id)?;
        let new_parent_node = self.get_mut(new_parent)?;
        if let NodeKind::Directory { children } = &mut new_parent_node.kind {
            children.insert(new_name.to_string(), id);
        }
        new_parent_node.touch();

        let node = self.get_mut(id)?;
        node.parent = Some(new_parent);
        node.name = new_name.to_string();
        node.times.ctime = SystemTime::now();

        self.recompute_links(old_parent);
        self.recompute_links(new_parent);
        Ok(())
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Children of the directory at `path`, in insertion order.
    pub fn list(&self, path: &Path) -> FsResult<Vec<(&str, &Node)>> {
        let id = self.resolve(path)?;
        match &self.get(id)?.kind {
            NodeKind::Directory { children } => children
                .iter()
                .map(|(name, child)| Ok((name.as_str(), self.get(*child)?)))
                .collect(),
            _ => Err(FsError::NotADirectory),
        }
    }

    /// Re-derive link counts from `dir` up to the root.
    fn recompute_links(&mut self, dir: NodeId) {
        let mut current = Some(dir);
        while let Some(id) = current {
            let subdirs = match self.nodes.get(&id).map(|n| &n.kind) {
                Some(NodeKind::Directory { children }) => children
                    .values()
                    .filter(|child| self.nodes.get(*child).map_or(false, Node::is_dir))
                    .count() as u32,
                _ => return,
            };
            let Some(node) = self.nodes.get_mut(&id) else {
                return;
            };
            node.nlink = 2 + subdirs;
            current = node.parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> PathTree {
        PathTree::new(0o755, 1000, 1000)
    }

    fn nlink(tree: &PathTree, path: &str) -> u32 {
        tree.node(tree.resolve(Path::new(path)).unwrap()).unwrap().nlink
    }

    fn file(id: &str) -> Leaf {
        Leaf::File {
            backing: BackingId::new(id),
            mode: 0o644,
        }
    }

    #[test]
    fn test_root_resolves() {
        let tree = tree();
        assert_eq!(tree.resolve(Path::new("/")).unwrap(), NodeId::ROOT);
        assert_eq!(nlink(&tree, "/"), 2);
        assert!(matches!(tree.resolve(Path::new("/missing")), Err(FsError::NotFound)));
    }

    #[test]
    fn test_ensure_directories_link_counts() {
        let mut tree = tree();
        tree.ensure_directories(Path::new("/a/b/c"), 0o755).unwrap();

        assert_eq!(nlink(&tree, "/"), 3);
        assert_eq!(nlink(&tree, "/a"), 3);
        assert_eq!(nlink(&tree, "/a/b"), 3);
        assert_eq!(nlink(&tree, "/a/b/c"), 2);
    }

    #[test]
    fn test_ensure_directories_is_idempotent() {
        let mut tree = tree();
        let first = tree.ensure_directories(Path::new("/a/b"), 0o700).unwrap();
        let a = tree.resolve(Path::new("/a")).unwrap();
        let before = tree.node(a).unwrap().clone();

        let second = tree.ensure_directories(Path::new("/a/b"), 0o755).unwrap();
        assert_eq!(first, second);

        let after = tree.node(a).unwrap();
        assert_eq!(after.nlink, 3);
        assert_eq!(after.nlink, before.nlink);
        assert_eq!(after.mode, 0o700);
        assert_eq!(after.times, before.times);
    }

    #[test]
    fn test_ensure_directories_through_file_fails() {
        let mut tree = tree();
        tree.insert_leaf(Path::new("/"), "f", file("doc-1")).unwrap();
        assert!(matches!(
            tree.ensure_directories(Path::new("/f/g"), 0o755),
            Err(FsError::NotADirectory)
        ));
        assert!(matches!(tree.resolve(Path::new("/f/g")), Err(FsError::NotADirectory)));
    }

    #[test]
    fn test_insert_leaf_errors() {
        let mut tree = tree();
        assert!(matches!(
            tree.insert_leaf(Path::new("/nope"), "f", file("doc-1")),
            Err(FsError::NotFound)
        ));

        tree.insert_leaf(Path::new("/"), "f", file("doc-1")).unwrap();
        assert!(matches!(
            tree.insert_leaf(Path::new("/"), "f", file("doc-2")),
            Err(FsError::AlreadyExists)
        ));
        // Leaves do not count as directory links
        assert_eq!(nlink(&tree, "/"), 2);
    }

    #[test]
    fn test_symlink_size_is_target_length() {
        let mut tree = tree();
        let id = tree
            .insert_leaf(
                Path::new("/"),
                "link",
                Leaf::Symlink {
                    target: "/a/b".to_string(),
                },
            )
            .unwrap();
        let node = tree.node(id).unwrap();
        assert_eq!(node.size, 4);
        assert_eq!(node.file_type(), FileType::Symlink);
        assert_eq!(node.nlink, 1);
    }

    #[test]
    fn test_resolution_is_case_sensitive() {
        let mut tree = tree();
        tree.ensure_directories(Path::new("/Docs"), 0o755).unwrap();
        assert!(tree.resolve(Path::new("/Docs")).is_ok());
        assert!(matches!(tree.resolve(Path::new("/docs")), Err(FsError::NotFound)));
    }

    #[test]
    fn test_remove_non_empty_directory_fails() {
        let mut tree = tree();
        tree.ensure_directories(Path::new("/a/b"), 0o755).unwrap();
        tree.insert_leaf(Path::new("/a/b"), "f", file("doc-1")).unwrap();

        assert!(matches!(tree.remove(Path::new("/a/b")), Err(FsError::NotEmpty)));
        assert_eq!(nlink(&tree, "/a"), 3);

        let removed = tree.remove(Path::new("/a/b/f")).unwrap();
        assert_eq!(removed.backing(), Some(&BackingId::new("doc-1")));

        tree.remove(Path::new("/a/b")).unwrap();
        assert_eq!(nlink(&tree, "/a"), 2);
        assert!(matches!(tree.resolve(Path::new("/a/b")), Err(FsError::NotFound)));
    }

    #[test]
    fn test_root_cannot_be_removed_or_moved() {
        let mut tree = tree();
        assert!(matches!(tree.remove(Path::new("/")), Err(FsError::InvalidArgument)));
        assert!(matches!(
            tree.move_subtree(Path::new("/"), Path::new("/x")),
            Err(FsError::InvalidArgument)
        ));
    }

    #[test]
    fn test_move_relocates_whole_subtree() {
        let mut tree = tree();
        tree.ensure_directories(Path::new("/a/b/deep"), 0o755).unwrap();
        tree.insert_leaf(Path::new("/a/b/deep"), "f", file("doc-1")).unwrap();
        tree.ensure_directories(Path::new("/c"), 0o755).unwrap();
        assert_eq!(nlink(&tree, "/a"), 3);
        assert_eq!(nlink(&tree, "/c"), 2);

        tree.move_subtree(Path::new("/a/b"), Path::new("/c/b")).unwrap();

        assert!(matches!(tree.resolve(Path::new("/a/b")), Err(FsError::NotFound)));
        let moved = tree.resolve(Path::new("/c/b/deep/f")).unwrap();
        assert_eq!(tree.node(moved).unwrap().backing(), Some(&BackingId::new("doc-1")));
        assert_eq!(nlink(&tree, "/a"), 2);
        assert_eq!(nlink(&tree, "/c"), 3);
        assert_eq!(nlink(&tree, "/c/b"), 3);
    }

    #[test]
    fn test_move_renames_leaf_in_place() {
        let mut tree = tree();
        tree.insert_leaf(Path::new("/"), "old", file("doc-1")).unwrap();
        tree.move_subtree(Path::new("/old"), Path::new("/new")).unwrap();

        let id = tree.resolve(Path::new("/new")).unwrap();
        assert_eq!(tree.node(id).unwrap().name, "new");
        assert!(tree.resolve(Path::new("/old")).is_err());
    }

    #[test]
    fn test_move_errors() {
        let mut tree = tree();
        tree.ensure_directories(Path::new("/a/b"), 0o755).unwrap();
        tree.ensure_directories(Path::new("/c"), 0o755).unwrap();

        assert!(matches!(
            tree.move_subtree(Path::new("/x"), Path::new("/y")),
            Err(FsError::NotFound)
        ));
        assert!(matches!(
            tree.move_subtree(Path::new("/a"), Path::new("/c")),
            Err(FsError::AlreadyExists)
        ));
        assert!(matches!(
            tree.move_subtree(Path::new("/a"), Path::new("/missing/a")),
            Err(FsError::NotFound)
        ));
        assert!(matches!(
            tree.move_subtree(Path::new("/a"), Path::new("/a/b/a")),
            Err(FsError::InvalidArgument)
        ));
        tree.move_subtree(Path::new("/a"), Path::new("/a")).unwrap();
        assert_eq!(nlink(&tree, "/"), 4);
    }

    #[test]
    fn test_list_keeps_insertion_order() {
        let mut tree = tree();
        tree.ensure_directories(Path::new("/zeta"), 0o755).unwrap();
        tree.insert_leaf(Path::new("/"), "alpha", file("doc-1")).unwrap();
        tree.ensure_directories(Path::new("/mid"), 0o755).unwrap();

        let names: Vec<&str> = tree.list(Path::new("/")).unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert!(matches!(tree.list(Path::new("/alpha")), Err(FsError::NotADirectory)));
    }

    #[test]
    fn test_parent_components_are_rejected() {
        let tree = tree();
        assert!(matches!(tree.resolve(Path::new("/a/../b")), Err(FsError::InvalidArgument)));
    }
}
