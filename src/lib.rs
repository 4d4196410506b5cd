//! # OODA Agent
//!
//! Problem-solving agent that answers a question by coordinating several
//! knowledge resources and a language model.
//!
//! This library provides:
//! - A resource abstraction (documents, SQLite, web search, sensors) with a
//!   deduplicating registry
//! - A program store of reusable decomposition plans, matched by the model
//! - A hierarchical planner and an Observe-Orient-Decide-Act reasoner that
//!   resolves the resulting task tree bottom-up
//! - Multi-source answer consolidation under a word budget
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │              Agent               │
//!        │     solve(problem) -> answer     │
//!        └───────┬──────────────────┬───────┘
//!                │                  │
//!                ▼                  ▼
//!      ┌──────────────────┐ ┌──────────────────┐
//!      │ HierarchicalPlan │ │   OodaReasoner   │──► Consolidator
//!      │       -ner       │◄│ (lazy expansion) │
//!      └───┬──────────┬───┘ └────────┬─────────┘
//!          │          │              │
//!          ▼          ▼              ▼
//!   ProgramStore  ResourceRegistry ──► Resource (doc/db/web/sensor)
//!          │
//!          ▼
//!      LmBackend (retry + concurrency ceiling) ──► LlmClient
//! ```
//!
//! ## Solve Flow
//! 1. Look up a stored program for the problem, or decompose by nature
//! 2. Resolve the task tree: resources feed leaves, children feed parents
//! 3. Each node orients once; unconfident leaves are decomposed further
//! 4. Return the root's answer with its confidence; store the new plan
//!
//! ## Modules
//! - `llm`: backend client, error classification, rate-limited access
//! - `resource`: knowledge sources and their registry
//! - `task`: task nodes and trees
//! - `program`: reusable programs and their store
//! - `planner`, `reasoner`, `consolidator`: the solving pipeline
//! - `agent`: the façade

pub mod agent;
pub mod config;
pub mod consolidator;
pub mod llm;
pub mod planner;
pub mod program;
pub mod reasoner;
pub mod resource;
pub mod task;
pub mod util;

pub use agent::{Agent, Solution, SolveError, SolveOptions};
pub use config::{AgentConfig, Config};
