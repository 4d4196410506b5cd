//! OODA reasoner.
//!
//! Resolves a task tree bottom-up. For every node:
//!
//! ```text
//! Observe   leaf: query applicable resources concurrently
//!           internal: resolve children, then consolidate their results
//! Orient    one backend call; answer prefixed [CONFIDENT] or [UNCONFIDENT]
//! Decide    confident -> done
//!           unconfident leaf with depth budget -> expand, observe again
//!           otherwise -> unconfident-terminal with the best-effort answer
//! ```
//!
//! Failures stay local: a resource that errors or times out contributes no
//! evidence, and a child that fails is missing evidence for its parent. A
//! node fails only when it has nothing at all to orient on, or when the
//! backend is unavailable for its own orient call.

mod observe;
mod prompts;

pub use observe::{query_all, AnswerStyle, QueryPolicy};
pub use prompts::{
    orient_prompt, parse_orientation, Orientation, CONFIDENT_TAG, PRELIMINARY_SOURCE,
    UNCONFIDENT_TAG,
};

use std::sync::Arc;

use async_recursion::async_recursion;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::consolidator::{render_other_results, render_resource_answers, Consolidator};
use crate::llm::LmBackend;
use crate::planner::HierarchicalPlanner;
use crate::resource::ResourceRegistry;
use crate::task::{Evidence, TaskError, TaskNode, TaskTree};
use crate::util::truncate_words;

/// Per-solve settings shared by every node of one tree.
#[derive(Debug, Clone)]
pub struct SolveContext {
    pub n_words: usize,
    /// Let consolidation ask for clarification instead of guessing
    pub allow_reject: bool,
    pub cancel: CancellationToken,
}

impl Default for SolveContext {
    fn default() -> Self {
        Self {
            n_words: AgentConfig::default().n_words,
            allow_reject: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// What a node has to orient on after Observe.
enum Observation {
    Ready(String),
    Unavailable(String),
}

pub struct OodaReasoner {
    llm: LmBackend,
    registry: Arc<ResourceRegistry>,
    planner: Arc<HierarchicalPlanner>,
    consolidator: Consolidator,
    config: AgentConfig,
}

impl OodaReasoner {
    pub fn new(
        llm: LmBackend,
        registry: Arc<ResourceRegistry>,
        planner: Arc<HierarchicalPlanner>,
        config: AgentConfig,
    ) -> Self {
        let consolidator = Consolidator::new(llm.clone());
        Self {
            llm,
            registry,
            planner,
            consolidator,
            config,
        }
    }

    pub fn query_policy(&self) -> QueryPolicy {
        QueryPolicy {
            timeout: self.config.resource_timeout,
            retries: self.config.resource_retries,
        }
    }

    /// Resolve `tree` until its root is terminal.
    pub async fn resolve_tree(&self, tree: &mut TaskTree, ctx: &SolveContext) {
        if !tree.root().is_leaf() {
            tracing::info!("Executing task plan:\n{}", tree.outline());
        }
        let max_depth = tree.max_depth();
        self.resolve(tree.root_mut(), max_depth, ctx, &[]).await;
        tracing::info!(
            "Task plan finished with root {}:\n{}",
            tree.root().status(),
            tree.outline()
        );
    }

    /// Resolve one node and, through it, its subtree.
    ///
    /// `other_results` are results of earlier siblings when siblings are
    /// resolved sequentially.
    #[async_recursion]
    pub async fn resolve(
        &self,
        node: &mut TaskNode,
        max_depth: usize,
        ctx: &SolveContext,
        other_results: &[Evidence],
    ) {
        if node.status().is_terminal() {
            return;
        }
        if let Err(e) = self.run_cycles(node, max_depth, ctx, other_results).await {
            tracing::error!("Task '{}' left the OODA cycle: {}", node.problem(), e);
            node.fail_unresolved(&e.to_string());
        }
    }

    async fn run_cycles(
        &self,
        node: &mut TaskNode,
        max_depth: usize,
        ctx: &SolveContext,
        other_results: &[Evidence],
    ) -> Result<(), TaskError> {
        loop {
            if ctx.cancel.is_cancelled() {
                node.fail_unresolved("cancelled");
                return Ok(());
            }

            node.begin_observe()?;
            let observation = if node.is_leaf() {
                self.observe_resources(node, ctx, other_results).await
            } else {
                self.observe_children(node, max_depth, ctx, other_results).await
            };
            let observations = match observation {
                Observation::Ready(text) => text,
                Observation::Unavailable(reason) => {
                    tracing::warn!("Task '{}' failed: {}", node.problem(), reason);
                    return node.fail(reason);
                }
            };

            node.begin_orient()?;
            let prompt = orient_prompt(node.problem(), &observations, ctx.n_words);
            tracing::debug!("Orient prompt for '{}':\n{}", node.problem(), prompt);
            let response = match self.llm.complete(&prompt).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("Task '{}' failed: {}", node.problem(), e);
                    return node.fail(e.to_string());
                }
            };

            let orientation = match parse_orientation(&response) {
                // Without any applicable resource there is nothing to be confident about.
                Orientation::Confident(text) if node.no_match() && node.is_leaf() => {
                    Orientation::Unconfident(text)
                }
                other => other,
            };
            tracing::debug!(
                "Task '{}' oriented {}: {}",
                node.problem(),
                if orientation.is_confident() { "confident" } else { "unconfident" },
                truncate_words(orientation.text(), 30)
            );

            match orientation {
                Orientation::Confident(text) => return node.settle_confident(text),
                Orientation::Unconfident(text) => {
                    if !node.is_leaf() || node.depth() >= max_depth {
                        return node.settle_unconfident(text);
                    }
                    node.defer(text.clone())?;
                    match self.planner.expand(node, max_depth).await {
                        Ok(()) => continue,
                        Err(e) => {
                            tracing::debug!(
                                "Task '{}' cannot be decomposed further: {}",
                                node.problem(),
                                e
                            );
                            return node.settle_unconfident(text);
                        }
                    }
                }
            }
        }
    }

    async fn observe_resources(
        &self,
        node: &mut TaskNode,
        ctx: &SolveContext,
        other_results: &[Evidence],
    ) -> Observation {
        let resources = if node.no_match() {
            Vec::new()
        } else {
            self.registry.applicable(node.nature(), node.resources())
        };

        let results = query_all(
            &resources,
            node.problem(),
            ctx.n_words,
            AnswerStyle::Plain,
            self.query_policy(),
            &ctx.cancel,
        )
        .await;
        let evidence: Vec<Evidence> = resources
            .iter()
            .zip(results)
            .filter_map(|(resource, result)| {
                result
                    .ok()
                    .map(|answer| Evidence::new(resource.unique_name(), answer))
            })
            .collect();

        if !resources.is_empty() && evidence.is_empty() && other_results.is_empty() {
            return Observation::Unavailable(format!(
                "all {} resources unavailable",
                resources.len()
            ));
        }

        tracing::debug!(
            "Observed {}/{} resource answers for '{}'",
            evidence.len(),
            resources.len(),
            node.problem()
        );
        let text = join_sections(
            render_resource_answers(&evidence),
            render_other_results(other_results),
        );
        node.set_evidence(evidence);
        Observation::Ready(text)
    }

    async fn observe_children(
        &self,
        node: &mut TaskNode,
        max_depth: usize,
        ctx: &SolveContext,
        other_results: &[Evidence],
    ) -> Observation {
        if self.config.sequential_siblings {
            let mut shared: Vec<Evidence> = Vec::new();
            for child in node.children_mut() {
                self.resolve(child, max_depth, ctx, &shared).await;
                if let Some(result) = child.result() {
                    shared.push(Evidence::new(child.problem(), result));
                }
            }
        } else {
            join_all(
                node.children_mut()
                    .iter_mut()
                    .map(|child| self.resolve(child, max_depth, ctx, &[])),
            )
            .await;
        }

        let mut evidence: Vec<Evidence> = Vec::new();
        if let Some(draft) = node.draft() {
            evidence.push(Evidence::new(PRELIMINARY_SOURCE, draft));
        }
        let answered = node
            .children()
            .iter()
            .filter_map(|child| child.result().map(|r| Evidence::new(child.problem(), r)));
        evidence.extend(answered);

        if evidence.is_empty() {
            return Observation::Unavailable("every sub-task failed".to_string());
        }

        let mut inputs = evidence.clone();
        inputs.extend_from_slice(other_results);
        let merged = if ctx.allow_reject {
            self.consolidator
                .consolidate_or_reject(node.problem(), &[], &inputs, ctx.n_words)
                .await
        } else {
            self.consolidator
                .consolidate(node.problem(), &[], &inputs, ctx.n_words)
                .await
        };
        node.set_evidence(evidence);
        match merged {
            Ok(text) => Observation::Ready(text),
            Err(e) => Observation::Unavailable(e.to_string()),
        }
    }
}

fn join_sections(first: String, second: String) -> String {
    match (first.is_empty(), second.is_empty()) {
        (false, false) => format!("{}\n\n{}", first, second),
        (false, true) => first,
        _ => second,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ChatOptions, ChatResponse, LlmClient, LlmError, RetryConfig};
    use crate::program::{InMemoryProgramBackend, ProgramStore};
    use crate::resource::{Resource, ResourceError, ResourceKind};
    use crate::task::{TaskNature, TaskStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const DOWN: &str = "<backend down>";

    /// Replies by the first rule whose fragment the prompt contains; `DOWN`
    /// fails the call.
    struct Script {
        rules: Vec<(&'static str, &'static str)>,
        fallback: &'static str,
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
                .map_or(self.fallback, |(_, reply)| *reply);
            if reply == DOWN {
                return Err(LlmError::server_error(503, "scripted outage"));
            }
            Ok(ChatResponse {
                content: Some(reply.to_string()),
                ..ChatResponse::default()
            })
        }
    }

    struct Fixed {
        name: &'static str,
        answer: Option<&'static str>,
    }

    #[async_trait]
    impl Resource for Fixed {
        fn unique_name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> ResourceKind {
            ResourceKind::Document
        }

        async fn answer(&self, _q: &str, _n: usize) -> Result<String, ResourceError> {
            self.answer
                .map(str::to_string)
                .ok_or_else(|| ResourceError::unavailable(self.name, "offline"))
        }

        async fn summarize(&self) -> Result<String, ResourceError> {
            Ok(format!("{} notes", self.name))
        }
    }

    fn reasoner(
        rules: Vec<(&'static str, &'static str)>,
        fallback: &'static str,
        resources: Vec<Fixed>,
        config: AgentConfig,
    ) -> (OodaReasoner, Arc<Script>) {
        let client = Arc::new(Script {
            rules,
            fallback,
            prompts: Mutex::new(Vec::new()),
        });
        let llm =
            LmBackend::new(client.clone(), "test").with_retry_config(RetryConfig::immediate(0));
        let registry = Arc::new(ResourceRegistry::new());
        for resource in resources {
            registry.register(Arc::new(resource));
        }
        let store = Arc::new(ProgramStore::new(
            Arc::new(InMemoryProgramBackend::new()),
            llm.clone(),
        ));
        let planner = Arc::new(HierarchicalPlanner::new(
            llm.clone(),
            store,
            registry.clone(),
            config.max_subtasks_per_decomp,
        ));
        (OodaReasoner::new(llm, registry, planner, config), client)
    }

    fn docs(answer: Option<&'static str>) -> Fixed {
        Fixed { name: "docs", answer }
    }

    #[tokio::test]
    async fn confident_leaf_settles_with_stripped_result() {
        let (reasoner, client) = reasoner(
            vec![],
            "[CONFIDENT] 42 units",
            vec![docs(Some("forty-two"))],
            AgentConfig::default(),
        );
        let root = TaskNode::root("How many?", TaskNature::Retrieval).unwrap();
        let mut tree = TaskTree::new(root, 2);
        reasoner.resolve_tree(&mut tree, &SolveContext::default()).await;

        let root = tree.root();
        assert_eq!(root.status(), &TaskStatus::Confident);
        assert_eq!(root.result(), Some("42 units"));
        assert_eq!(root.evidence(), [Evidence::new("docs", "forty-two")]);
        assert!(client.prompts.lock().unwrap()[0].contains("docs:\nforty-two"));
    }

    #[tokio::test]
    async fn unconfident_leaf_without_budget_keeps_best_effort() {
        let (reasoner, _) = reasoner(
            vec![],
            "roughly 40",
            vec![docs(Some("forty-ish"))],
            AgentConfig::default(),
        );
        let root = TaskNode::root("How many?", TaskNature::Retrieval).unwrap();
        let mut tree = TaskTree::new(root, 0);
        reasoner.resolve_tree(&mut tree, &SolveContext::default()).await;

        assert_eq!(tree.root().status(), &TaskStatus::UnconfidentTerminal);
        assert_eq!(tree.root().result(), Some("roughly 40"));
    }

    #[tokio::test]
    async fn unconfident_leaf_expands_and_reorients() {
        let (reasoner, client) = reasoner(
            vec![
                (
                    "JSON hierarchical task plan",
                    r#"{"task": {"ask": "q"}, "sub-htps": [{"task": "Part one"}, {"task": "Part two"}]}"#,
                ),
                ("consolidate within", "merged parts"),
                ("merged parts", "[CONFIDENT] whole answer"),
                ("Part ", "[CONFIDENT] part answer"),
            ],
            "[UNCONFIDENT] first guess",
            vec![docs(Some("notes"))],
            AgentConfig::default(),
        );
        let root = TaskNode::root("Big question", TaskNature::Retrieval).unwrap();
        let mut tree = TaskTree::new(root, 2);
        reasoner.resolve_tree(&mut tree, &SolveContext::default()).await;

        let root = tree.root();
        assert_eq!(root.status(), &TaskStatus::Confident);
        assert_eq!(root.result(), Some("whole answer"));
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.evidence()[0].source, PRELIMINARY_SOURCE);
        assert_eq!(root.evidence()[0].answer, "first guess");

        let prompts = client.prompts.lock().unwrap();
        let consolidation = prompts.iter().find(|p| p.contains("consolidate within")).unwrap();
        let preliminary_at = consolidation.find("first guess").unwrap();
        let part_at = consolidation.find("Part one").unwrap();
        assert!(preliminary_at < part_at);
    }

    #[tokio::test]
    async fn all_resources_down_fails_the_leaf() {
        let (reasoner, client) =
            reasoner(vec![], "[CONFIDENT] x", vec![docs(None)], AgentConfig::default());
        let mut tree = TaskTree::new(TaskNode::root("q", TaskNature::Retrieval).unwrap(), 2);
        reasoner.resolve_tree(&mut tree, &SolveContext::default()).await;

        assert!(matches!(tree.root().status(), TaskStatus::Failed { .. }));
        assert!(tree.root().result().is_none());
        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_child_is_missing_evidence_for_parent() {
        let (reasoner, client) = reasoner(
            vec![
                ("consolidate within", "only the good part"),
                ("only the good part", "[CONFIDENT] parent answer"),
                ("Good part", "[CONFIDENT] good"),
            ],
            "[CONFIDENT] unused",
            vec![docs(Some("notes")), Fixed { name: "db", answer: None }],
            AgentConfig::default(),
        );
        let mut root = TaskNode::root("Parent", TaskNature::Retrieval).unwrap();
        root.add_child("Good part", TaskNature::Retrieval, vec!["docs".to_string()], 1).unwrap();
        root.add_child("Bad part", TaskNature::Retrieval, vec!["db".to_string()], 1).unwrap();
        let mut tree = TaskTree::new(root, 1);
        reasoner.resolve_tree(&mut tree, &SolveContext::default()).await;

        let root = tree.root();
        assert_eq!(root.result(), Some("parent answer"));
        assert!(matches!(root.children()[1].status(), TaskStatus::Failed { .. }));
        assert_eq!(root.evidence().len(), 1);

        let prompts = client.prompts.lock().unwrap();
        let consolidation = prompts.iter().find(|p| p.contains("consolidate within")).unwrap();
        assert!(!consolidation.contains("Bad part"));
    }

    #[tokio::test]
    async fn child_backend_outage_is_missing_evidence_for_parent() {
        let (reasoner, client) = reasoner(
            vec![
                ("consolidate within", "only the good part"),
                ("only the good part", "[CONFIDENT] parent answer"),
                ("Broken part", DOWN),
                ("Good part", "[CONFIDENT] good"),
            ],
            "[CONFIDENT] unused",
            vec![docs(Some("notes"))],
            AgentConfig::default(),
        );
        let mut root = TaskNode::root("Parent", TaskNature::Retrieval).unwrap();
        root.add_child("Good part", TaskNature::Retrieval, vec![], 1).unwrap();
        root.add_child("Broken part", TaskNature::Retrieval, vec![], 1).unwrap();
        let mut tree = TaskTree::new(root, 1);
        reasoner.resolve_tree(&mut tree, &SolveContext::default()).await;

        let root = tree.root();
        assert_eq!(root.status(), &TaskStatus::Confident);
        assert_eq!(root.result(), Some("parent answer"));
        match root.children()[1].status() {
            TaskStatus::Failed { reason } => assert!(reason.contains("unavailable")),
            other => panic!("expected a failed child, got {}", other),
        }
        assert!(root.children()[1].result().is_none());
        assert_eq!(root.evidence(), [Evidence::new("Good part", "good")]);

        let prompts = client.prompts.lock().unwrap();
        let consolidation = prompts.iter().find(|p| p.contains("consolidate within")).unwrap();
        assert!(!consolidation.contains("Broken part"));
    }

    #[tokio::test]
    async fn consolidation_outage_fails_only_that_subtree() {
        let (reasoner, _) = reasoner(
            vec![
                ("consolidate within", DOWN),
                ("Inner step", "[CONFIDENT] inner done"),
            ],
            "[CONFIDENT] unused",
            vec![docs(Some("notes"))],
            AgentConfig::default(),
        );
        let mut root = TaskNode::root("Parent", TaskNature::Retrieval).unwrap();
        let middle = root.add_child("Middle", TaskNature::Retrieval, vec![], 2).unwrap();
        middle.add_child("Inner step", TaskNature::Retrieval, vec![], 2).unwrap();
        let mut tree = TaskTree::new(root, 2);
        reasoner.resolve_tree(&mut tree, &SolveContext::default()).await;

        let middle = &tree.root().children()[0];
        assert_eq!(middle.children()[0].result(), Some("inner done"));
        assert!(matches!(middle.status(), TaskStatus::Failed { .. }));
        // With its only child failed the parent has nothing to orient on.
        match tree.root().status() {
            TaskStatus::Failed { reason } => assert_eq!(reason, "every sub-task failed"),
            other => panic!("expected a failed root, got {}", other),
        }
    }

    #[tokio::test]
    async fn no_match_leaf_is_never_confident() {
        let (reasoner, _) = reasoner(vec![], "[CONFIDENT] guessed", vec![], AgentConfig::default());
        let mut node = TaskNode::root("q", TaskNature::Retrieval).unwrap();
        node.mark_no_match(true);
        let mut tree = TaskTree::new(node, 0);
        reasoner.resolve_tree(&mut tree, &SolveContext::default()).await;

        assert_eq!(tree.root().status(), &TaskStatus::UnconfidentTerminal);
        assert_eq!(tree.root().result(), Some("guessed"));
    }

    #[tokio::test]
    async fn sequential_siblings_share_results() {
        let config = AgentConfig {
            sequential_siblings: true,
            ..AgentConfig::default()
        };
        let (reasoner, client) = reasoner(
            vec![
                ("consolidate within", "merged"),
                ("Second step", "[CONFIDENT] step two done"),
                ("First step", "[CONFIDENT] step one done"),
            ],
            "[CONFIDENT] root done",
            vec![docs(Some("notes"))],
            config,
        );
        let mut root = TaskNode::root("Do both", TaskNature::Retrieval).unwrap();
        root.add_child("First step", TaskNature::Retrieval, vec![], 1).unwrap();
        root.add_child("Second step", TaskNature::Retrieval, vec![], 1).unwrap();
        let mut tree = TaskTree::new(root, 1);
        reasoner.resolve_tree(&mut tree, &SolveContext::default()).await;

        let prompts = client.prompts.lock().unwrap();
        let second = prompts
            .iter()
            .find(|p| p.starts_with("Assuming") && p.contains("```\nSecond step\n```"))
            .unwrap();
        assert!(second.contains("QUESTION/TASK:\nFirst step\n\nRESULT:\nstep one done"));
    }

    #[tokio::test]
    async fn cancelled_solve_fails_unresolved_nodes() {
        let (reasoner, client) = reasoner(
            vec![],
            "[CONFIDENT] x",
            vec![docs(Some("notes"))],
            AgentConfig::default(),
        );
        let mut tree = TaskTree::new(TaskNode::root("q", TaskNature::Retrieval).unwrap(), 2);
        let ctx = SolveContext::default();
        ctx.cancel.cancel();
        reasoner.resolve_tree(&mut tree, &ctx).await;

        assert_eq!(
            tree.root().status(),
            &TaskStatus::Failed {
                reason: "cancelled".to_string()
            }
        );
        assert!(client.prompts.lock().unwrap().is_empty());
    }
}
