//! Task module - task nodes, their OODA status machine, and the owning tree.
//!
//! Nodes own their children, so a tree is finite and acyclic by
//! construction; depth is checked whenever a child is added.

mod node;
mod tree;

pub use node::{Evidence, TaskError, TaskId, TaskNature, TaskNode, TaskStatus};
pub use tree::TaskTree;
