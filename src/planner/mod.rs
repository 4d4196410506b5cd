//! Hierarchical planner.
//!
//! Builds the task tree for a problem. A stored program that the program
//! store matches is instantiated as-is; otherwise the problem is decomposed
//! with a heuristic chosen by its nature:
//!
//! ```text
//! retrieval    -> leaf
//! calculation  -> [retrieve inputs (retrieval), compute (calculation)]
//! assessment   -> one child per evaluation criterion (asked from the model)
//! ```
//!
//! Trees grow lazily afterwards: the reasoner calls [`HierarchicalPlanner::expand`]
//! on an unconfident leaf while depth budget remains.

mod prompts;

pub use prompts::{parse_headed_list, parse_htp, ProposedTask, CRITERION_HEADER, SUB_TASK_HEADER};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::llm::{BackendError, LmBackend};
use crate::program::{Program, ProgramStore, ProgramStoreError, TaskTemplate};
use crate::resource::ResourceRegistry;
use crate::task::{TaskError, TaskNature, TaskNode, TaskTree};
use crate::util::{sanitize_names, slugify};

/// Where a plan came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOrigin {
    /// Instantiated from the named stored program
    Program(String),
    /// Freshly decomposed
    Fresh,
}

/// A task tree plus its provenance.
#[derive(Debug, Clone)]
pub struct Plan {
    pub tree: TaskTree,
    pub origin: PlanOrigin,
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Depth budget exhausted at depth {depth}")]
    DepthBudgetExhausted { depth: usize },

    #[error("No decomposition available")]
    NoDecomposition,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

pub struct HierarchicalPlanner {
    llm: LmBackend,
    store: Arc<ProgramStore>,
    registry: Arc<ResourceRegistry>,
    max_subtasks_per_decomp: usize,
    decompositions: AtomicUsize,
}

impl HierarchicalPlanner {
    pub fn new(
        llm: LmBackend,
        store: Arc<ProgramStore>,
        registry: Arc<ResourceRegistry>,
        max_subtasks_per_decomp: usize,
    ) -> Self {
        Self {
            llm,
            store,
            registry,
            max_subtasks_per_decomp: max_subtasks_per_decomp.max(1),
            decompositions: AtomicUsize::new(0),
        }
    }

    /// How many times a fresh decomposition (heuristic or lazy) ran.
    pub fn decompositions(&self) -> usize {
        self.decompositions.load(Ordering::SeqCst)
    }

    /// Build the task tree for `problem`, at most `depth_budget` levels deep.
    ///
    /// # Errors
    /// `PlanError::Task` if the problem is blank. Program-store and backend
    /// trouble during planning is logged and planning continues without it.
    pub async fn plan(
        &self,
        problem: &str,
        nature: TaskNature,
        depth_budget: usize,
    ) -> Result<Plan, PlanError> {
        let mut root = TaskNode::root(problem, nature)?;

        if let Some((name, program)) = self.find_program(problem, nature).await {
            match program.template.instantiate(problem, depth_budget) {
                Ok(mut instantiated) => {
                    self.assign_resources(&mut instantiated);
                    tracing::info!(
                        "Reusing program {} for problem: {}",
                        name,
                        problem
                    );
                    return Ok(Plan {
                        tree: TaskTree::new(instantiated, depth_budget),
                        origin: PlanOrigin::Program(name),
                    });
                }
                Err(e) => tracing::warn!("Could not instantiate program {}: {}", name, e),
            }
        }

        self.decompose_by_nature(&mut root, depth_budget).await?;
        self.assign_resources(&mut root);
        Ok(Plan {
            tree: TaskTree::new(root, depth_budget),
            origin: PlanOrigin::Fresh,
        })
    }

    /// Only programs of the requested nature are offered to the lookup, so a
    /// match of another nature falls back to fresh decomposition.
    async fn find_program(&self, problem: &str, nature: TaskNature) -> Option<(String, Program)> {
        let descriptions = match self.store.descriptions_of(nature).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Program store unavailable, planning afresh: {}", e);
                return None;
            }
        };
        if descriptions.is_empty() {
            return None;
        }
        let overviews = self.registry.overviews().await;
        let name = match self.store.lookup(problem, &overviews, &descriptions).await {
            Ok(Some(name)) => name,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Program lookup failed, planning afresh: {}", e);
                return None;
            }
        };
        match self.store.get(&name).await {
            Ok(program) if program.nature() == nature => Some((name, program)),
            Ok(program) => {
                tracing::warn!(
                    "Matched program {} is a {} program, not {}; planning afresh",
                    name,
                    program.nature(),
                    nature
                );
                None
            }
            Err(e) => {
                tracing::warn!("Matched program {} could not be loaded: {}", name, e);
                None
            }
        }
    }

    /// Nature-specific decomposition of a fresh root.
    async fn decompose_by_nature(
        &self,
        root: &mut TaskNode,
        depth_budget: usize,
    ) -> Result<(), PlanError> {
        if depth_budget == 0 {
            return Ok(());
        }
        self.decompositions.fetch_add(1, Ordering::SeqCst);
        let problem = root.problem().to_string();

        match root.nature() {
            TaskNature::Retrieval => {}
            TaskNature::Calculation => {
                root.add_child(
                    format!("Retrieve the inputs needed for: {}", problem),
                    TaskNature::Retrieval,
                    Vec::new(),
                    depth_budget,
                )?;
                root.add_child(
                    format!("Compute the answer from the retrieved inputs for: {}", problem),
                    TaskNature::Calculation,
                    Vec::new(),
                    depth_budget,
                )?;
            }
            TaskNature::Assessment => {
                for criterion in self.criteria(&problem).await {
                    root.add_child(
                        format!(
                            "{}\nAssess specifically against this criterion: {}",
                            problem, criterion
                        ),
                        TaskNature::Assessment,
                        Vec::new(),
                        depth_budget,
                    )?;
                }
            }
        }

        if !root.is_leaf() {
            tracing::debug!(
                "Decomposed {} problem into {} sub-tasks",
                root.nature(),
                root.children().len()
            );
        }
        Ok(())
    }

    async fn criteria(&self, problem: &str) -> Vec<String> {
        let prompt = prompts::criteria_prompt(problem, self.max_subtasks_per_decomp);
        match self.llm.complete(&prompt).await {
            Ok(response) => {
                let mut criteria = parse_headed_list(&response, CRITERION_HEADER);
                criteria.truncate(self.max_subtasks_per_decomp);
                criteria
            }
            Err(e) => {
                tracing::warn!("Could not obtain assessment criteria, keeping a leaf: {}", e);
                Vec::new()
            }
        }
    }

    /// Decompose an unconfident leaf one level, asking the model for a JSON
    /// hierarchical task plan and falling back to a headed list.
    ///
    /// # Errors
    /// - `PlanError::DepthBudgetExhausted` if `node` already sits at `max_depth`
    /// - `PlanError::NoDecomposition` if `node` has children or the model
    ///   proposes none
    /// - `PlanError::Backend` if the model is unavailable
    pub async fn expand(&self, node: &mut TaskNode, max_depth: usize) -> Result<(), PlanError> {
        if node.depth() >= max_depth {
            return Err(PlanError::DepthBudgetExhausted { depth: node.depth() });
        }
        if !node.is_leaf() {
            return Err(PlanError::NoDecomposition);
        }
        self.decompositions.fetch_add(1, Ordering::SeqCst);

        let overviews = if self.registry.is_empty() {
            Vec::new()
        } else {
            self.registry.overviews().await
        };
        let problem = node.problem().to_string();

        let prompt = prompts::htp_prompt(&problem, &overviews, self.max_subtasks_per_decomp);
        tracing::debug!("Decomposition prompt:\n{}", prompt);
        let response = self.llm.complete(&prompt).await?;

        let proposed = match parse_htp(&response) {
            Some(tasks) => tasks,
            None => {
                tracing::debug!("Hierarchical task plan unusable, using simplified decomposition");
                let prompt = prompts::simplified_decomposition_prompt(
                    &problem,
                    &overviews,
                    self.max_subtasks_per_decomp,
                );
                let response = self.llm.complete(&prompt).await?;
                parse_headed_list(&response, SUB_TASK_HEADER)
                    .into_iter()
                    .map(|ask| ProposedTask {
                        ask,
                        nature: None,
                        resources: Vec::new(),
                    })
                    .collect()
            }
        };

        if proposed.is_empty() {
            return Err(PlanError::NoDecomposition);
        }

        let parent_nature = node.nature();
        for task in proposed.into_iter().take(self.max_subtasks_per_decomp) {
            let resources = self.registry.retain_known(sanitize_names(task.resources));
            node.add_child(
                task.ask,
                task.nature.unwrap_or(parent_nature),
                resources,
                max_depth,
            )?;
        }
        for child in node.children_mut() {
            self.assign_resources(child);
        }
        tracing::info!(
            "Expanded '{}' into {} sub-tasks",
            problem,
            node.children().len()
        );
        Ok(())
    }

    /// Drop unknown resource names and flag leaves no resource applies to.
    fn assign_resources(&self, node: &mut TaskNode) {
        let known = self.registry.retain_known(node.resources().to_vec());
        node.set_resources(known);
        if node.is_leaf() {
            let applicable = self.registry.applicable(node.nature(), node.resources());
            node.mark_no_match(applicable.is_empty());
            if applicable.is_empty() {
                tracing::debug!("No resource applies to '{}'", node.problem());
            }
        }
        for child in node.children_mut() {
            self.assign_resources(child);
        }
    }

    /// Offer a freshly decomposed tree back to the store as a reusable
    /// program. Returns the stored name, or `None` if there is nothing to
    /// reuse (a bare leaf, or a tree that came from a program).
    pub async fn write_back(&self, plan: &Plan) -> Result<Option<String>, ProgramStoreError> {
        let root = plan.tree.root();
        if plan.origin != PlanOrigin::Fresh || root.is_leaf() {
            return Ok(None);
        }

        let base = {
            let slug = slugify(root.problem(), 6);
            if slug.is_empty() {
                root.nature().to_string()
            } else {
                format!("{}-{}", root.nature(), slug)
            }
        };
        let mut name = base.clone();
        let mut suffix = 2;
        while self.store.contains(&name).await? {
            name = format!("{}-{}", base, suffix);
            suffix += 1;
        }

        let description = format!(
            "{} program decomposing into {} sub-tasks, built for problems like: {}",
            root.nature(),
            root.children().len(),
            root.problem()
        );
        let template = TaskTemplate::from_node(root, root.problem());
        match self
            .store
            .store(Program::new(name.clone(), description, template), false)
            .await
        {
            Ok(()) => Ok(Some(name)),
            // Lost a race to a concurrent writer with the same name.
            Err(ProgramStoreError::DuplicateName(taken)) => {
                tracing::debug!("Program {} was stored concurrently, skipping", taken);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ChatOptions, ChatResponse, LlmClient, LlmError, RetryConfig};
    use crate::program::InMemoryProgramBackend;
    use crate::resource::{Resource, ResourceError, ResourceKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const DOWN: &str = "<backend down>";

    /// Replies by the first matching prompt fragment; `DOWN` fails the call.
    struct Script {
        rules: Vec<(&'static str, &'static str)>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for Script {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ChatResponse, LlmError> {
            let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt.clone());
            let reply = self
                .rules
                .iter()
                .find(|(fragment, _)| prompt.contains(fragment))
                .map(|(_, reply)| reply.to_string())
                .unwrap_or_default();
            if reply == DOWN {
                return Err(LlmError::server_error(503, "scripted outage"));
            }
            Ok(ChatResponse {
                content: Some(reply),
                ..ChatResponse::default()
            })
        }
    }

    struct Docs;

    #[async_trait]
    impl Resource for Docs {
        fn unique_name(&self) -> &str {
            "docs"
        }

        fn kind(&self) -> ResourceKind {
            ResourceKind::Document
        }

        fn supports(&self, nature: TaskNature) -> bool {
            nature != TaskNature::Calculation
        }

        async fn answer(&self, _q: &str, _n: usize) -> Result<String, ResourceError> {
            Ok("text".to_string())
        }

        async fn summarize(&self) -> Result<String, ResourceError> {
            Ok("company reports".to_string())
        }
    }

    fn planner(rules: Vec<(&'static str, &'static str)>) -> (HierarchicalPlanner, Arc<Script>) {
        let client = Arc::new(Script {
            rules,
            prompts: Mutex::new(Vec::new()),
        });
        let llm =
            LmBackend::new(client.clone(), "test").with_retry_config(RetryConfig::immediate(0));
        let store = Arc::new(ProgramStore::new(
            Arc::new(InMemoryProgramBackend::new()),
            llm.clone(),
        ));
        let registry = Arc::new(ResourceRegistry::new());
        registry.register(Arc::new(Docs));
        (HierarchicalPlanner::new(llm, store, registry, 4), client)
    }

    #[tokio::test]
    async fn retrieval_plans_a_leaf() {
        let (planner, client) = planner(vec![]);
        let plan = planner
            .plan("Who founded ACME?", TaskNature::Retrieval, 2)
            .await
            .unwrap();
        assert!(plan.tree.root().is_leaf());
        assert_eq!(plan.origin, PlanOrigin::Fresh);
        assert!(!plan.tree.root().no_match());
        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn calculation_splits_into_retrieve_and_compute() {
        let (planner, _) = planner(vec![]);
        let plan = planner
            .plan("ACME margin?", TaskNature::Calculation, 2)
            .await
            .unwrap();
        let children = plan.tree.root().children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].nature(), TaskNature::Retrieval);
        assert!(children[0].problem().starts_with("Retrieve the inputs"));
        assert!(!children[0].no_match());
        // Only the document resource is registered and it skips calculations.
        assert_eq!(children[1].nature(), TaskNature::Calculation);
        assert!(children[1].no_match());
    }

    #[tokio::test]
    async fn zero_budget_keeps_a_leaf() {
        let (planner, _) = planner(vec![]);
        let plan = planner
            .plan("ACME margin?", TaskNature::Calculation, 0)
            .await
            .unwrap();
        assert!(plan.tree.root().is_leaf());
        assert_eq!(planner.decompositions(), 0);
    }

    #[tokio::test]
    async fn assessment_splits_by_criterion() {
        let (planner, _) = planner(vec![(
            "evaluation criteria",
            "[CRITERION]\nCost\n[CRITERION]\nSafety\n",
        )]);
        let plan = planner
            .plan("Is plan X sound?", TaskNature::Assessment, 1)
            .await
            .unwrap();
        let children = plan.tree.root().children();
        assert_eq!(children.len(), 2);
        assert!(children[1].problem().ends_with("criterion: Safety"));
        assert_eq!(children[1].nature(), TaskNature::Assessment);
    }

    #[tokio::test]
    async fn expand_uses_json_plan() {
        let (planner, _) = planner(vec![(
            "JSON hierarchical task plan",
            r#"{"task": {"ask": "q"}, "sub-htps": [
                {"task": {"ask": "part one", "resources": ["docs", "ghost"]}},
                {"task": {"ask": "part two", "nature": "calculation"}}]}"#,
        )]);
        let mut node = TaskNode::root("q", TaskNature::Retrieval).unwrap();
        planner.expand(&mut node, 1).await.unwrap();

        assert_eq!(node.children().len(), 2);
        assert_eq!(node.children()[0].resources(), ["docs".to_string()]);
        assert_eq!(node.children()[1].nature(), TaskNature::Calculation);
        assert!(matches!(
            planner.expand(&mut node, 1).await,
            Err(PlanError::NoDecomposition)
        ));
    }

    #[tokio::test]
    async fn expand_falls_back_to_headed_list() {
        let (planner, client) = planner(vec![
            ("JSON hierarchical task plan", "I cannot produce JSON"),
            (
                "EACH PREPENDED by a header \"[SUB-QUESTION",
                "[SUB-QUESTION/PROBLEM/TASK]\nfirst\n[SUB-QUESTION/PROBLEM/TASK]\nsecond",
            ),
        ]);
        let mut node = TaskNode::root("q", TaskNature::Retrieval).unwrap();
        planner.expand(&mut node, 2).await.unwrap();
        let asks: Vec<&str> = node.children().iter().map(|c| c.problem()).collect();
        assert_eq!(asks, vec!["first", "second"]);
        assert_eq!(client.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expand_respects_depth_budget() {
        let (planner, client) = planner(vec![]);
        let mut node = TaskNode::root("q", TaskNature::Retrieval).unwrap();
        assert!(matches!(
            planner.expand(&mut node, 0).await,
            Err(PlanError::DepthBudgetExhausted { depth: 0 })
        ));
        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_back_then_reuse() {
        let (planner, client) = planner(vec![(
            "executable solution programs",
            "calculation-acme-margin",
        )]);
        let plan = planner
            .plan("ACME margin?", TaskNature::Calculation, 2)
            .await
            .unwrap();
        let name = planner.write_back(&plan).await.unwrap();
        assert_eq!(name.as_deref(), Some("calculation-acme-margin"));

        let decompositions = planner.decompositions();
        let reused = planner
            .plan("ACME margin?", TaskNature::Calculation, 2)
            .await
            .unwrap();
        assert_eq!(
            reused.origin,
            PlanOrigin::Program("calculation-acme-margin".to_string())
        );
        assert_eq!(reused.tree.root().children().len(), 2);
        assert_eq!(planner.decompositions(), decompositions);
        assert_eq!(client.prompts.lock().unwrap().len(), 1);

        // Same problem shape again gets a suffixed name.
        let again = planner.write_back(&plan).await.unwrap();
        assert_eq!(again.as_deref(), Some("calculation-acme-margin-2"));
        // Reused plans are never written back.
        assert_eq!(planner.write_back(&reused).await.unwrap(), None);
    }

    fn calculation_program(name: &str) -> Program {
        Program::new(
            name,
            "margin calculation from yearly figures",
            TaskTemplate {
                ask: "{problem}".to_string(),
                nature: TaskNature::Calculation,
                resources: vec![],
                subs: vec![TaskTemplate {
                    ask: "Retrieve the figures for: {problem}".to_string(),
                    nature: TaskNature::Retrieval,
                    resources: vec![],
                    subs: vec![],
                }],
            },
        )
    }

    #[tokio::test]
    async fn program_of_another_nature_is_not_reused() {
        let (planner, client) = planner(vec![("executable solution programs", "calc-prog")]);
        planner
            .store
            .store(calculation_program("calc-prog"), false)
            .await
            .unwrap();

        let plan = planner
            .plan("Is plan X safe?", TaskNature::Assessment, 2)
            .await
            .unwrap();
        assert_eq!(plan.origin, PlanOrigin::Fresh);
        assert_eq!(plan.tree.root().nature(), TaskNature::Assessment);
        assert!(client
            .prompts
            .lock()
            .unwrap()
            .iter()
            .all(|p| !p.contains("executable solution programs")));

        let reused = planner
            .plan("ACME margin?", TaskNature::Calculation, 2)
            .await
            .unwrap();
        assert_eq!(reused.origin, PlanOrigin::Program("calc-prog".to_string()));
        assert_eq!(reused.tree.root().nature(), TaskNature::Calculation);
    }

    #[tokio::test]
    async fn lookup_outage_falls_back_to_fresh_decomposition() {
        let (planner, client) = planner(vec![("executable solution programs", DOWN)]);
        planner
            .store
            .store(calculation_program("calc-prog"), false)
            .await
            .unwrap();

        let plan = planner
            .plan("ACME margin?", TaskNature::Calculation, 2)
            .await
            .unwrap();
        assert_eq!(plan.origin, PlanOrigin::Fresh);
        assert_eq!(planner.decompositions(), 1);
        let children = plan.tree.root().children();
        assert_eq!(children.len(), 2);
        assert!(children[1].problem().starts_with("Compute the answer"));
        assert_eq!(client.prompts.lock().unwrap().len(), 1);
    }
}
