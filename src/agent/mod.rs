//! Agent façade: `solve(problem) -> answer`.
//!
//! Wires the registry, program store, planner, reasoner and consolidator
//! together for one process. Low confidence is reported through
//! [`Solution::confident`], never as an error; [`SolveError::Unsolvable`]
//! is reserved for a root that could not be resolved at all.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::consolidator::Consolidator;
use crate::llm::LmBackend;
use crate::planner::{HierarchicalPlanner, PlanError, PlanOrigin};
use crate::program::ProgramStore;
use crate::reasoner::{query_all, AnswerStyle, OodaReasoner, SolveContext};
use crate::resource::ResourceRegistry;
use crate::task::{Evidence, TaskError, TaskNature, TaskStatus, TaskTree};

/// Per-call options for [`Agent::solve_with`].
#[derive(Debug, Clone)]
pub struct SolveOptions {
    pub nature: TaskNature,
    pub allow_reject: bool,
    /// Overrides the configured depth budget
    pub depth_budget: Option<usize>,
    /// Overrides the configured word budget
    pub n_words: Option<usize>,
    pub cancel: CancellationToken,
    /// Offer a freshly decomposed plan to the program store afterwards
    pub write_back: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            nature: TaskNature::default(),
            allow_reject: false,
            depth_budget: None,
            n_words: None,
            cancel: CancellationToken::new(),
            write_back: true,
        }
    }
}

/// Outcome of a solve that produced an answer.
#[derive(Debug, Clone)]
pub struct Solution {
    pub answer: String,
    pub confident: bool,
    /// Unconfident while rejection was allowed: the caller should treat the
    /// answer as a request for more information.
    pub rejected: bool,
    /// Stored program the plan was instantiated from
    pub program: Option<String>,
    /// Name under which this solve's plan was stored for reuse
    pub stored_program: Option<String>,
    pub tree: TaskTree,
}

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("Problem cannot be empty")]
    EmptyProblem,

    #[error("Unable to solve: {reason}")]
    Unsolvable { reason: String, trail: Vec<Evidence> },
}

pub struct Agent {
    registry: Arc<ResourceRegistry>,
    store: Arc<ProgramStore>,
    planner: Arc<HierarchicalPlanner>,
    reasoner: OodaReasoner,
    consolidator: Consolidator,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        store: Arc<ProgramStore>,
        llm: LmBackend,
        config: AgentConfig,
    ) -> Self {
        let planner = Arc::new(HierarchicalPlanner::new(
            llm.clone(),
            store.clone(),
            registry.clone(),
            config.max_subtasks_per_decomp,
        ));
        let reasoner = OodaReasoner::new(
            llm.clone(),
            registry.clone(),
            planner.clone(),
            config.clone(),
        );
        Self {
            registry,
            store,
            planner,
            reasoner,
            consolidator: Consolidator::new(llm),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ProgramStore> {
        &self.store
    }

    pub fn planner(&self) -> &HierarchicalPlanner {
        &self.planner
    }

    pub async fn solve(&self, problem: &str) -> Result<Solution, SolveError> {
        self.solve_with(problem, SolveOptions::default()).await
    }

    /// Plan, reason over the plan, and return the root's answer.
    ///
    /// # Errors
    /// - `SolveError::EmptyProblem` if `problem` is blank
    /// - `SolveError::Unsolvable` if the root fails, with the evidence
    ///   gathered anywhere in the tree
    pub async fn solve_with(
        &self,
        problem: &str,
        options: SolveOptions,
    ) -> Result<Solution, SolveError> {
        if problem.trim().is_empty() {
            return Err(SolveError::EmptyProblem);
        }
        let depth_budget = options.depth_budget.unwrap_or(self.config.max_depth);
        tracing::info!(
            "Solving {} problem (depth budget {}): {}",
            options.nature,
            depth_budget,
            problem
        );

        let mut plan = match self.planner.plan(problem, options.nature, depth_budget).await {
            Ok(plan) => plan,
            Err(PlanError::Task(TaskError::EmptyProblem)) => return Err(SolveError::EmptyProblem),
            Err(e) => {
                return Err(SolveError::Unsolvable {
                    reason: e.to_string(),
                    trail: Vec::new(),
                })
            }
        };

        let ctx = SolveContext {
            n_words: options.n_words.unwrap_or(self.config.n_words),
            allow_reject: options.allow_reject,
            cancel: options.cancel,
        };
        self.reasoner.resolve_tree(&mut plan.tree, &ctx).await;

        let root = plan.tree.root();
        let (answer, confident) = match (root.status(), root.result()) {
            (TaskStatus::Confident, Some(result)) => (result.to_string(), true),
            (TaskStatus::UnconfidentTerminal, Some(result)) => (result.to_string(), false),
            (status, _) => {
                let reason = match status {
                    TaskStatus::Failed { reason } => reason.clone(),
                    other => format!("root ended {}", other),
                };
                tracing::warn!("Unable to solve '{}': {}", problem, reason);
                return Err(SolveError::Unsolvable {
                    reason,
                    trail: plan.tree.evidence_trail(),
                });
            }
        };

        let stored_program = if options.write_back {
            match self.planner.write_back(&plan).await {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!("Could not store program for reuse: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let program = match &plan.origin {
            PlanOrigin::Program(name) => Some(name.clone()),
            PlanOrigin::Fresh => None,
        };
        tracing::info!(
            "Solved with {} answer{}",
            if confident { "a confident" } else { "an unconfident" },
            program
                .as_deref()
                .map(|name| format!(" using program {}", name))
                .unwrap_or_default()
        );

        Ok(Solution {
            answer,
            confident,
            rejected: options.allow_reject && !confident,
            program,
            stored_program,
            tree: plan.tree,
        })
    }

    /// Ask every registered resource directly and consolidate their answers,
    /// without planning.
    ///
    /// # Errors
    /// `SolveError::Unsolvable` if no resource answers or the backend is
    /// unavailable.
    pub async fn consult(&self, question: &str, max_words: usize) -> Result<String, SolveError> {
        if question.trim().is_empty() {
            return Err(SolveError::EmptyProblem);
        }
        let resources = self.registry.resources();
        let results = query_all(
            &resources,
            question,
            max_words,
            AnswerStyle::Framed,
            self.reasoner.query_policy(),
            &CancellationToken::new(),
        )
        .await;
        let answers: Vec<Evidence> = resources
            .iter()
            .zip(results)
            .filter_map(|(resource, result)| {
                result
                    .ok()
                    .map(|answer| Evidence::new(resource.unique_name(), answer))
            })
            .collect();

        if !resources.is_empty() && answers.is_empty() {
            return Err(SolveError::Unsolvable {
                reason: format!("all {} resources unavailable", resources.len()),
                trail: Vec::new(),
            });
        }

        let merged = self
            .consolidator
            .consolidate(question, &answers, &[], max_words)
            .await;
        match merged {
            Ok(answer) => Ok(answer),
            Err(e) => Err(SolveError::Unsolvable {
                reason: e.to_string(),
                trail: answers,
            }),
        }
    }
}
