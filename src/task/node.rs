//! Task node: one unit of the problem-decomposition tree.
//!
//! # Invariants
//! - `result.is_some()` iff `status` is `Confident` or `UnconfidentTerminal`
//! - `depth` of a child is its parent's `depth + 1` and never exceeds the tree budget
//! - `children` are only ever appended, never reordered or removed

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of work a task asks for. Governs applicable resources and
/// the decomposition heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskNature {
    /// Look something up
    #[default]
    Retrieval,
    /// Derive a figure from inputs
    Calculation,
    /// Judge something against criteria
    Assessment,
}

impl TaskNature {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskNature::Retrieval => "retrieval",
            TaskNature::Calculation => "calculation",
            TaskNature::Assessment => "assessment",
        }
    }
}

impl std::fmt::Display for TaskNature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskNature {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retrieval" | "retrieve" => Ok(TaskNature::Retrieval),
            "calculation" | "calc" | "compute" => Ok(TaskNature::Calculation),
            "assessment" | "assess" => Ok(TaskNature::Assessment),
            other => Err(TaskError::UnknownNature(other.to_string())),
        }
    }
}

/// Status of a node in the OODA cycle.
///
/// # State Machine
/// ```text
/// Pending -> Observing -> OrientingDeciding -> Confident
///                ^                 |       \-> UnconfidentTerminal
///                |                 v
///                +------ UnconfidentRecurse -> UnconfidentTerminal
///
/// any non-terminal state -> Failed
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    /// Gathering evidence from resources or children
    Observing,
    /// Waiting on the orient/decide backend call
    OrientingDeciding,
    /// Unconfident, about to be decomposed and re-observed
    UnconfidentRecurse,
    Confident,
    /// Best-effort answer without confidence
    UnconfidentTerminal,
    Failed { reason: String },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Confident | TaskStatus::UnconfidentTerminal | TaskStatus::Failed { .. }
        )
    }

    /// Whether this status carries a result.
    pub fn has_result(&self) -> bool {
        matches!(self, TaskStatus::Confident | TaskStatus::UnconfidentTerminal)
    }

    fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Observing => "observing",
            TaskStatus::OrientingDeciding => "orienting-deciding",
            TaskStatus::UnconfidentRecurse => "unconfident-recurse",
            TaskStatus::Confident => "confident",
            TaskStatus::UnconfidentTerminal => "unconfident-terminal",
            TaskStatus::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One (source, answer) pair gathered during Observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Resource full name, child problem, or `preliminary reasoning`
    pub source: String,
    pub answer: String,
}

impl Evidence {
    pub fn new(source: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            answer: answer.into(),
        }
    }
}

/// A node of the task tree. Children are owned, so a tree is acyclic by
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    id: TaskId,
    parent: Option<TaskId>,
    depth: usize,
    problem: String,
    nature: TaskNature,
    /// Resource unique names assigned by the plan; empty means "all applicable"
    resources: Vec<String>,
    children: Vec<TaskNode>,
    status: TaskStatus,
    result: Option<String>,
    evidence: Vec<Evidence>,
    /// Last unconfident orient text, kept while the node recurses
    draft: Option<String>,
    /// No resource and no program applies; reason without evidence
    no_match: bool,
}

impl TaskNode {
    /// Create a root node.
    ///
    /// # Errors
    /// `TaskError::EmptyProblem` if `problem` is blank.
    pub fn root(problem: impl Into<String>, nature: TaskNature) -> Result<Self, TaskError> {
        let problem = problem.into();
        if problem.trim().is_empty() {
            return Err(TaskError::EmptyProblem);
        }
        Ok(Self {
            id: TaskId::new(),
            parent: None,
            depth: 0,
            problem,
            nature,
            resources: Vec::new(),
            children: Vec::new(),
            status: TaskStatus::Pending,
            result: None,
            evidence: Vec::new(),
            draft: None,
            no_match: false,
        })
    }

    /// Append a child one level below this node.
    ///
    /// # Errors
    /// - `TaskError::DepthExceeded` if the child would sit deeper than `max_depth`
    /// - `TaskError::EmptyProblem` if `problem` is blank
    pub fn add_child(
        &mut self,
        problem: impl Into<String>,
        nature: TaskNature,
        resources: Vec<String>,
        max_depth: usize,
    ) -> Result<&mut TaskNode, TaskError> {
        let depth = self.depth + 1;
        if depth > max_depth {
            return Err(TaskError::DepthExceeded {
                depth,
                max: max_depth,
            });
        }
        let mut child = TaskNode::root(problem, nature)?;
        child.parent = Some(self.id);
        child.depth = depth;
        child.resources = resources;
        self.children.push(child);
        let last = self.children.len() - 1;
        Ok(&mut self.children[last])
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn problem(&self) -> &str {
        &self.problem
    }

    pub fn nature(&self) -> TaskNature {
        self.nature
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn set_resources(&mut self, resources: Vec<String>) {
        self.resources = resources;
    }

    pub fn children(&self) -> &[TaskNode] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [TaskNode] {
        &mut self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn status(&self) -> &TaskStatus {
        &self.status
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    /// Replace the evidence gathered for the current Observe pass.
    pub fn set_evidence(&mut self, evidence: Vec<Evidence>) {
        self.evidence = evidence;
    }

    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub fn no_match(&self) -> bool {
        self.no_match
    }

    pub fn mark_no_match(&mut self, no_match: bool) {
        self.no_match = no_match;
    }

    // State transitions

    /// Enter Observe from `Pending` or `UnconfidentRecurse`.
    pub fn begin_observe(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Pending | TaskStatus::UnconfidentRecurse => {
                self.status = TaskStatus::Observing;
                Ok(())
            }
            _ => Err(self.invalid("observing")),
        }
    }

    pub fn begin_orient(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Observing => {
                self.status = TaskStatus::OrientingDeciding;
                Ok(())
            }
            _ => Err(self.invalid("orienting-deciding")),
        }
    }

    pub fn settle_confident(&mut self, result: String) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::OrientingDeciding => {
                self.status = TaskStatus::Confident;
                self.result = Some(result);
                self.draft = None;
                Ok(())
            }
            _ => Err(self.invalid("confident")),
        }
    }

    /// Park an unconfident answer while the node is decomposed further.
    pub fn defer(&mut self, draft: String) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::OrientingDeciding => {
                self.status = TaskStatus::UnconfidentRecurse;
                self.draft = Some(draft);
                Ok(())
            }
            _ => Err(self.invalid("unconfident-recurse")),
        }
    }

    pub fn settle_unconfident(&mut self, result: String) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::OrientingDeciding | TaskStatus::UnconfidentRecurse => {
                self.status = TaskStatus::UnconfidentTerminal;
                self.result = Some(result);
                self.draft = None;
                Ok(())
            }
            _ => Err(self.invalid("unconfident-terminal")),
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(self.invalid("failed"));
        }
        self.status = TaskStatus::Failed {
            reason: reason.into(),
        };
        self.draft = None;
        Ok(())
    }

    /// Fail this node and every non-terminal descendant.
    pub fn fail_unresolved(&mut self, reason: &str) {
        for child in &mut self.children {
            child.fail_unresolved(reason);
        }
        if !self.status.is_terminal() {
            self.status = TaskStatus::Failed {
                reason: reason.to_string(),
            };
            self.draft = None;
        }
    }

    fn invalid(&self, to: &str) -> TaskError {
        TaskError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Task problem cannot be empty")]
    EmptyProblem,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task depth {depth} exceeds the budget of {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("Unknown task nature: {0}")]
    UnknownNature(String),
}
