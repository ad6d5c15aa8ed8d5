//! In-memory project file tree

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};

/// A node in the file tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNode {
    File { contents: Vec<u8> },
    Directory { children: FileTree },
}

/// Recursive mapping from path segment to file or directory.
///
/// Paths are `/`-delimited and case-sensitive. A tree is always built fresh
/// from an archive or a template, so it cannot contain cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    entries: BTreeMap<String, FileNode>,
}

/// Kind of a projected tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// Content-free projection of a tree for viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeEntry>,
}

/// Split a path into validated segments
fn segments(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if parts.is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }
    if parts.iter().any(|s| *s == "." || *s == ".." || s.contains('\\')) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

impl FileTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, contents)` pairs
    pub fn from_files<I, P, C>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<Vec<u8>>,
    {
        let mut tree = Self::new();
        for (path, contents) in files {
            tree.insert_file(path.as_ref(), contents)?;
        }
        Ok(tree)
    }

    /// Insert a file, creating intermediate directories.
    ///
    /// A file already at `path` is replaced. Fails if any intermediate
    /// segment is an existing file.
    pub fn insert_file(&mut self, path: &str, contents: impl Into<Vec<u8>>) -> Result<()> {
        let parts = segments(path)?;
        let (name, dirs) = parts.split_last().ok_or_else(|| Error::InvalidPath(path.to_string()))?;

        let mut current = self;
        for dir in dirs {
            let node = current
                .entries
                .entry((*dir).to_string())
                .or_insert_with(|| FileNode::Directory {
                    children: FileTree::new(),
                });
            current = match node {
                FileNode::Directory { children } => children,
                FileNode::File { .. } => return Err(Error::InvalidPath(path.to_string())),
            };
        }

        if let Some(FileNode::Directory { .. }) = current.entries.get(*name) {
            return Err(Error::InvalidPath(path.to_string()));
        }
        current.entries.insert(
            (*name).to_string(),
            FileNode::File {
                contents: contents.into(),
            },
        );
        Ok(())
    }

    /// Look up a node by path
    pub fn get(&self, path: &str) -> Option<&FileNode> {
        let parts = segments(path).ok()?;
        let (last, dirs) = parts.split_last()?;
        let mut current = self;
        for dir in dirs {
            match current.entries.get(*dir)? {
                FileNode::Directory { children } => current = children,
                FileNode::File { .. } => return None,
            }
        }
        current.entries.get(*last)
    }

    /// Contents of the file at `path`, if it is a file
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        match self.get(path)? {
            FileNode::File { contents } => Some(contents),
            FileNode::Directory { .. } => None,
        }
    }

    /// Whether a file exists at `path`
    pub fn contains_file(&self, path: &str) -> bool {
        self.file(path).is_some()
    }

    /// All files as `(path, contents)`, depth first in name order
    pub fn files(&self) -> Vec<(String, &[u8])> {
        let mut out = Vec::new();
        self.collect_files("", &mut out);
        out
    }

    fn collect_files<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a [u8])>) {
        for (name, node) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            match node {
                FileNode::File { contents } => out.push((path, contents.as_slice())),
                FileNode::Directory { children } => children.collect_files(&path, out),
            }
        }
    }

    /// Number of files in the tree
    pub fn file_count(&self) -> usize {
        self.entries
            .values()
            .map(|node| match node {
                FileNode::File { .. } => 1,
                FileNode::Directory { children } => children.file_count(),
            })
            .sum()
    }

    /// Content-free projection, directories first then files, each by name
    pub fn projection(&self) -> Vec<TreeEntry> {
        self.project("")
    }

    fn project(&self, prefix: &str) -> Vec<TreeEntry> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for (name, node) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            match node {
                FileNode::Directory { children } => dirs.push(TreeEntry {
                    name: name.clone(),
                    children: children.project(&path),
                    path,
                    kind: EntryKind::Directory,
                    size: None,
                }),
                FileNode::File { contents } => files.push(TreeEntry {
                    name: name.clone(),
                    path,
                    kind: EntryKind::File,
                    size: Some(contents.len() as u64),
                    children: Vec::new(),
                }),
            }
        }
        dirs.extend(files);
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_creates_intermediate_directories() {
        let mut tree = FileTree::new();
        tree.insert_file("src/app/page.tsx", "export default 1").unwrap();

        assert!(matches!(tree.get("src"), Some(FileNode::Directory { .. })));
        assert_eq!(
            tree.file("src/app/page.tsx"),
            Some("export default 1".as_bytes())
        );
        assert_eq!(tree.file_count(), 1);
    }

    #[test]
    fn paths_are_case_sensitive() {
        let tree = FileTree::from_files([("README.md", "hi")]).unwrap();
        assert!(tree.contains_file("README.md"));
        assert!(!tree.contains_file("readme.md"));
    }

    #[test]
    fn traversal_segments_are_rejected() {
        let mut tree = FileTree::new();
        assert!(matches!(
            tree.insert_file("../etc/passwd", "x"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(tree.insert_file("", "x"), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn file_cannot_shadow_directory() {
        let mut tree = FileTree::from_files([("src/index.js", "")]).unwrap();
        assert!(tree.insert_file("src", "oops").is_err());
        assert!(tree.insert_file("src/index.js/inner", "oops").is_err());
    }

    #[test]
    fn projection_lists_directories_first() {
        let tree = FileTree::from_files([
            ("package.json", "{}"),
            ("src/main.ts", "console.log(1)"),
            ("index.html", "<html></html>"),
        ])
        .unwrap();

        let projection = tree.projection();
        let names: Vec<&str> = projection.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["src", "index.html", "package.json"]);
        assert_eq!(projection[0].children[0].path, "src/main.ts");
        assert_eq!(projection[2].size, Some(2));
    }

    #[test]
    fn files_walks_nested_paths() {
        let tree = FileTree::from_files([("a/b/c.txt", "1"), ("d.txt", "2")]).unwrap();
        let paths: Vec<String> = tree.files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["a/b/c.txt".to_string(), "d.txt".to_string()]);
    }
}
