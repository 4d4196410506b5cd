//! ooda-agent - command-line entry point
//!
//! Solves one problem with the resources configured in the environment:
//!
//! ```text
//! ooda-agent [--nature retrieval|calculation|assessment] [--allow-reject] [--consult] <PROBLEM>...
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ooda_agent::agent::{Agent, SolveOptions};
use ooda_agent::config::{Config, ResourceSources};
use ooda_agent::llm::{LmBackend, OpenRouterClient, RetryConfig};
use ooda_agent::program::{FileProgramBackend, InMemoryProgramBackend, ProgramBackend, ProgramStore};
use ooda_agent::resource::{DatabaseResource, DocumentResource, ResourceRegistry, WebResource};
use ooda_agent::task::TaskNature;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Solve a problem with the resources configured in the environment
#[derive(Parser, Debug)]
#[command(name = "ooda-agent")]
#[command(version)]
struct Cli {
    /// Kind of problem: retrieval, calculation or assessment
    #[arg(long, default_value = "retrieval")]
    nature: TaskNature,

    /// Report an unconfident answer as a request for more information
    #[arg(long)]
    allow_reject: bool,

    /// Ask every resource directly and consolidate, without planning
    #[arg(long)]
    consult: bool,

    /// The problem text
    #[arg(required = true)]
    problem: Vec<String>,
}

fn register_resources(registry: &ResourceRegistry, sources: &ResourceSources, llm: &LmBackend) {
    if let Some(dir) = &sources.docs_path {
        match DocumentResource::load("docs", dir, llm.clone()) {
            Ok(docs) => {
                registry.register(Arc::new(docs));
            }
            Err(e) => warn!("Document resource disabled: {}", e),
        }
    }

    match (&sources.sqlite_path, &sources.sqlite_query) {
        (Some(path), Some(query)) => {
            registry.register(Arc::new(DatabaseResource::new("sqlite", path, query.clone())));
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("SQLITE_PATH and SQLITE_QUERY must both be set; database resource disabled")
        }
        (None, None) => {}
    }

    if sources.web_search {
        match WebResource::from_env("web") {
            Ok(web) => {
                registry.register(Arc::new(web));
            }
            Err(e) => warn!("Web resource disabled: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ooda_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let problem = cli.problem.join(" ");
    let config = Config::from_env()?;
    info!("Loaded configuration: model={}", config.default_model);

    let client = Arc::new(OpenRouterClient::new(config.api_key.clone()));
    let mut llm = LmBackend::new(client, config.default_model.clone())
        .with_concurrency(config.llm_concurrency)
        .with_retry_config(RetryConfig {
            max_retries: config.llm_max_retries,
            ..RetryConfig::default()
        });
    if let Some(path) = &config.knowledge_path {
        let knowledge = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading knowledge from {}", path.display()))?;
        llm = llm.with_knowledge(&knowledge);
    }

    let backend: Arc<dyn ProgramBackend> = match &config.program_store_path {
        Some(path) => Arc::new(FileProgramBackend::open(path.clone()).await?),
        None => Arc::new(InMemoryProgramBackend::new()),
    };
    let store = Arc::new(ProgramStore::new(backend, llm.clone()));

    let registry = Arc::new(ResourceRegistry::new());
    register_resources(&registry, &config.sources, &llm);
    info!("Registered resources: {:?}", registry.names());

    let agent = Agent::new(registry, store, llm, config.agent_config());

    if cli.consult {
        let answer = agent.consult(&problem, config.agent.n_words).await?;
        println!("{}", answer);
        return Ok(());
    }

    let options = SolveOptions {
        nature: cli.nature,
        allow_reject: cli.allow_reject,
        ..SolveOptions::default()
    };
    let solution = agent.solve_with(&problem, options).await?;
    println!("{}", solution.answer);
    println!();
    println!(
        "confidence: {}{}",
        if solution.confident { "confident" } else { "unconfident" },
        if solution.rejected { " (more information requested)" } else { "" }
    );
    if let Some(name) = &solution.stored_program {
        info!("Stored program {} for reuse", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_flags_and_problem_words() {
        let cli = Cli::try_parse_from([
            "ooda-agent",
            "--nature",
            "assessment",
            "--allow-reject",
            "Is",
            "plan X",
            "safe?",
        ])
        .unwrap();
        assert_eq!(cli.nature, TaskNature::Assessment);
        assert!(cli.allow_reject);
        assert!(!cli.consult);
        assert_eq!(cli.problem.join(" "), "Is plan X safe?");
    }

    #[test]
    fn problem_is_required_and_nature_validated() {
        assert!(Cli::try_parse_from(["ooda-agent", "--consult"]).is_err());
        assert!(Cli::try_parse_from(["ooda-agent", "--nature", "guess", "q"]).is_err());

        let cli = Cli::try_parse_from(["ooda-agent", "q"]).unwrap();
        assert_eq!(cli.nature, TaskNature::Retrieval);
    }
}
