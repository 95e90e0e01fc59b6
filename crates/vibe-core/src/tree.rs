//! File map to tree view conversion.
//!
//! Paths are sorted, split on `/` and folded into nested directories. Each
//! level keeps first-seen order. The serialized form is the nested-array
//! shape consumed by file explorers: a file is its name, a directory is
//! `[name, ...children]`.

use std::collections::BTreeMap;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

/// One entry of the tree view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeItem {
    File(String),
    Directory { name: String, children: Vec<TreeItem> },
}

impl Serialize for TreeItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TreeItem::File(name) => serializer.serialize_str(name),
            TreeItem::Directory { name, children } => {
                let mut seq = serializer.serialize_seq(Some(children.len() + 1))?;
                seq.serialize_element(name)?;
                for child in children {
                    seq.serialize_element(child)?;
                }
                seq.end()
            }
        }
    }
}

/// Insertion-ordered directory node; `None` marks a file.
#[derive(Default)]
struct Node {
    entries: Vec<(String, Option<Node>)>,
}

impl Node {
    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    /// The directory called `name`, created or converted from a file in place.
    fn dir(&mut self, name: &str) -> &mut Node {
        let idx = match self.position(name) {
            Some(idx) => idx,
            None => {
                self.entries.push((name.to_string(), None));
                self.entries.len() - 1
            }
        };
        self.entries[idx].1.get_or_insert_with(Node::default)
    }

    fn file(&mut self, name: &str) {
        match self.position(name) {
            Some(idx) => self.entries[idx].1 = None,
            None => self.entries.push((name.to_string(), None)),
        }
    }

    fn into_items(self) -> Vec<TreeItem> {
        self.entries
            .into_iter()
            .map(|(name, node)| match node {
                None => TreeItem::File(name),
                Some(node) if node.entries.is_empty() => TreeItem::File(name),
                Some(node) => TreeItem::Directory {
                    name,
                    children: node.into_items(),
                },
            })
            .collect()
    }
}

/// Build the tree view of a file map. An empty map yields an empty tree.
pub fn files_to_tree(files: &BTreeMap<String, String>) -> Vec<TreeItem> {
    let mut paths: Vec<&str> = files.keys().map(String::as_str).collect();
    paths.sort_unstable();

    let mut root = Node::default();
    for path in paths {
        let mut parts: Vec<&str> = path.split('/').collect();
        let Some(file_name) = parts.pop() else {
            continue;
        };
        let mut node = &mut root;
        for part in parts {
            node = node.dir(part);
        }
        node.file(file_name);
    }
    root.into_items()
}
