//! Tree model: nodes as served by the tree/index service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{CellarError, Result};

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    #[default]
    Unknown,
    Leaf,
    Collection,
}

/// A file or folder in the tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub uuid: String,
    pub path: String,
    #[serde(default, rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub size: i64,
    /// Modification time, unix seconds.
    #[serde(default)]
    pub mtime: i64,
    #[serde(default)]
    pub etag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl Node {
    /// A node known only by its path.
    pub fn from_path(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn leaf(path: &str, size: i64) -> Self {
        Self {
            path: path.to_string(),
            node_type: NodeType::Leaf,
            size,
            ..Default::default()
        }
    }

    pub fn collection(path: &str) -> Self {
        Self {
            path: path.to_string(),
            node_type: NodeType::Collection,
            ..Default::default()
        }
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Extension of the last path segment, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type == NodeType::Leaf
    }
}

/// Read access to the tree service.
#[async_trait]
pub trait TreeClient: Send + Sync {
    /// Stat a single node.
    async fn read_node(&self, path: &str) -> Result<Node>;

    /// Every node at or below `prefix`, ordered by path.
    async fn list_nodes(&self, prefix: &str) -> Result<Vec<Node>>;
}

/// In-memory tree, used by the standalone binary and by tests.
#[derive(Default)]
pub struct MemoryTree {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let tree = Self::new();
        for node in nodes {
            tree.insert(node);
        }
        tree
    }

    pub fn insert(&self, node: Node) {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes.insert(node.path.clone(), node);
    }

    pub fn remove(&self, path: &str) -> Option<Node> {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes.remove(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TreeClient for MemoryTree {
    async fn read_node(&self, path: &str) -> Result<Node> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        nodes
            .get(path)
            .cloned()
            .ok_or_else(|| CellarError::not_found(format!("node {path}")))
    }

    async fn list_nodes(&self, prefix: &str) -> Result<Vec<Node>> {
        let root = prefix.trim_end_matches('/');
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        Ok(nodes
            .values()
            .filter(|n| {
                root.is_empty()
                    || n.path == root
                    || n.path
                        .strip_prefix(root)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_extension() {
        let node = Node::leaf("/docs/report.PDF", 10);
        assert_eq!(node.name(), "report.PDF");
        assert_eq!(node.extension(), Some("PDF"));
        assert_eq!(Node::collection("/docs/").name(), "docs");
        assert_eq!(Node::leaf("/.hidden", 1).extension(), None);
        assert_eq!(Node::leaf("/noext", 1).extension(), None);
    }

    #[tokio::test]
    async fn test_memory_tree_listing() {
        let tree = MemoryTree::with_nodes([
            Node::collection("/a"),
            Node::leaf("/a/one.txt", 1),
            Node::leaf("/ab/two.txt", 2),
            Node::leaf("/b/three.txt", 3),
        ]);
        let under_a = tree.list_nodes("/a").await.unwrap();
        let paths: Vec<_> = under_a.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/a/one.txt"]);
        assert_eq!(tree.list_nodes("/").await.unwrap().len(), 4);
        assert!(tree.read_node("/missing").await.unwrap_err().is_not_found());
    }
}
