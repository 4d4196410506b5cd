//! Program storage with pluggable backends.
//!
//! A program is a named, reusable decomposition shape. Backends only need a
//! key-value contract (`get`, `put`, `list`); the [`ProgramStore`] on top of
//! them adds duplicate-name protection and language-model lookup.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `file`: JSON snapshot file

mod file;
mod memory;
mod store;

pub use file::FileProgramBackend;
pub use memory::InMemoryProgramBackend;
pub use store::ProgramStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskError, TaskNature, TaskNode};

/// Placeholder standing for the problem text inside a template.
pub const PROBLEM_PLACEHOLDER: &str = "{problem}";

/// One node of a reusable decomposition shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Ask text; may contain `{problem}`
    pub ask: String,
    #[serde(default)]
    pub nature: TaskNature,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, rename = "sub-htps", skip_serializing_if = "Vec::is_empty")]
    pub subs: Vec<TaskTemplate>,
}

impl TaskTemplate {
    /// Capture the shape of `node`, replacing the root problem text with the
    /// placeholder wherever it appears.
    pub fn from_node(node: &TaskNode, root_problem: &str) -> Self {
        let ask = if root_problem.trim().is_empty() {
            node.problem().to_string()
        } else {
            node.problem().replace(root_problem, PROBLEM_PLACEHOLDER)
        };
        Self {
            ask,
            nature: node.nature(),
            resources: node.resources().to_vec(),
            subs: node
                .children()
                .iter()
                .map(|c| Self::from_node(c, root_problem))
                .collect(),
        }
    }

    pub fn fill(&self, problem: &str) -> String {
        self.ask.replace(PROBLEM_PLACEHOLDER, problem)
    }

    /// Build a fresh task tree for `problem`. Levels below `max_depth` are
    /// cut off.
    pub fn instantiate(&self, problem: &str, max_depth: usize) -> Result<TaskNode, TaskError> {
        let mut root = TaskNode::root(self.fill(problem), self.nature)?;
        root.set_resources(self.resources.clone());
        self.attach_subs(&mut root, problem, max_depth)?;
        Ok(root)
    }

    fn attach_subs(
        &self,
        node: &mut TaskNode,
        problem: &str,
        max_depth: usize,
    ) -> Result<(), TaskError> {
        if node.depth() >= max_depth {
            if !self.subs.is_empty() {
                tracing::warn!(
                    "Template for '{}' is deeper than the depth budget {}, truncating",
                    node.problem(),
                    max_depth
                );
            }
            return Ok(());
        }
        for sub in &self.subs {
            let child = node.add_child(
                sub.fill(problem),
                sub.nature,
                sub.resources.clone(),
                max_depth,
            )?;
            sub.attach_subs(child, problem, max_depth)?;
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.subs.iter().map(|s| s.depth() + 1).max().unwrap_or(0)
    }
}

/// A named, reusable solving program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    /// Natural-language summary used for matching
    pub description: String,
    pub template: TaskTemplate,
    pub created_at: DateTime<Utc>,
}

impl Program {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        template: TaskTemplate,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            template,
            created_at: Utc::now(),
        }
    }

    pub fn nature(&self) -> TaskNature {
        self.template.nature
    }
}

/// Errors raised by the program store.
#[derive(Debug, thiserror::Error)]
pub enum ProgramStoreError {
    #[error("A program named {0} already exists")]
    DuplicateName(String),

    #[error("No program named {0}")]
    UnknownProgram(String),

    #[error("Program lookup returned an unknown token: {0:?}")]
    AmbiguousMatch(String),

    #[error("Program lookup failed: {0}")]
    Backend(String),

    #[error("Program store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Program store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable key-value storage for programs.
#[async_trait]
pub trait ProgramBackend: Send + Sync {
    fn is_persistent(&self) -> bool;

    async fn get(&self, name: &str) -> Result<Option<Program>, ProgramStoreError>;

    /// Insert or replace `program` under its name.
    async fn put(&self, program: Program) -> Result<(), ProgramStoreError>;

    /// Name to description, sorted by name.
    async fn list(&self) -> Result<BTreeMap<String, String>, ProgramStoreError>;
}
