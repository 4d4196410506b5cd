//! Task tree: an owned root plus its depth budget.

use serde::{Deserialize, Serialize};

use super::node::{Evidence, TaskId, TaskNode};

/// A task tree for one `solve` invocation.
///
/// # Invariants
/// - every node's depth is `<= max_depth`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTree {
    root: TaskNode,
    max_depth: usize,
}

impl TaskTree {
    pub fn new(root: TaskNode, max_depth: usize) -> Self {
        Self { root, max_depth }
    }

    pub fn root(&self) -> &TaskNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut TaskNode {
        &mut self.root
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Pre-order traversal (parent before children, children in creation order).
    pub fn walk(&self) -> Vec<&TaskNode> {
        let mut out = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in node.children().iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    pub fn find(&self, id: TaskId) -> Option<&TaskNode> {
        self.walk().into_iter().find(|n| n.id() == id)
    }

    pub fn node_count(&self) -> usize {
        self.walk().len()
    }

    /// Deepest level reached by any node.
    pub fn deepest(&self) -> usize {
        self.walk().iter().map(|n| n.depth()).max().unwrap_or(0)
    }

    /// All evidence in the tree, pre-order.
    pub fn evidence_trail(&self) -> Vec<Evidence> {
        self.walk()
            .into_iter()
            .flat_map(|n| n.evidence().iter().cloned())
            .collect()
    }

    /// Indented outline, one line per node.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for node in self.walk() {
            out.push_str(&"  ".repeat(node.depth()));
            out.push_str(&format!(
                "- [{}] {} ({})",
                node.nature(),
                node.problem(),
                node.status()
            ));
            if !node.resources().is_empty() {
                out.push_str(&format!(" <{}>", node.resources().join(", ")));
            }
            out.push('\n');
        }
        out
    }
}
