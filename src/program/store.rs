//! Program store: duplicate-safe insertion and language-model lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{Program, ProgramBackend, ProgramStoreError};
use crate::llm::LmBackend;
use crate::task::TaskNature;
use crate::util::fill_template;

/// Literal the backend returns when no program applies.
pub const NO_PROGRAM: &str = "NONE";

const PROGRAM_SEARCH_PROMPT: &str = "Consider that you are trying to solve the following question/problem/task:

```
{problem}
```

and that you have access to the following informational resources, summarized by the below name-overview pairs:

```json
{resource_overviews}
```

and to a collection of executable solution programs summarized by the below name-description pairs:

```json
{program_descriptions}
```

Please return the name of the most appropriate program for solving the stated question/problem/task, \
ONLY IF at least one program is deemed applicable/relevant.

Otherwise, if no applicable/relevant programs are found in the collection, please return the word NONE.

Return ONLY the program name or NONE, nothing else.
";

pub struct ProgramStore {
    backend: Arc<dyn ProgramBackend>,
    llm: LmBackend,
    write_lock: Mutex<()>,
}

impl ProgramStore {
    pub fn new(backend: Arc<dyn ProgramBackend>, llm: LmBackend) -> Self {
        Self {
            backend,
            llm,
            write_lock: Mutex::new(()),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    /// Insert `program` under its name.
    ///
    /// # Errors
    /// `ProgramStoreError::DuplicateName` if the name is taken and
    /// `overwrite` is false.
    pub async fn store(&self, program: Program, overwrite: bool) -> Result<(), ProgramStoreError> {
        let _guard = self.write_lock.lock().await;
        if !overwrite && self.backend.get(&program.name).await?.is_some() {
            return Err(ProgramStoreError::DuplicateName(program.name));
        }
        tracing::info!("Storing program {}: {}", program.name, program.description);
        self.backend.put(program).await
    }

    pub async fn get(&self, name: &str) -> Result<Program, ProgramStoreError> {
        self.backend
            .get(name)
            .await?
            .ok_or_else(|| ProgramStoreError::UnknownProgram(name.to_string()))
    }

    pub async fn contains(&self, name: &str) -> Result<bool, ProgramStoreError> {
        Ok(self.backend.get(name).await?.is_some())
    }

    pub async fn descriptions(&self) -> Result<BTreeMap<String, String>, ProgramStoreError> {
        self.backend.list().await
    }

    /// Descriptions of the programs whose root has `nature`.
    pub async fn descriptions_of(
        &self,
        nature: TaskNature,
    ) -> Result<BTreeMap<String, String>, ProgramStoreError> {
        let mut matching = BTreeMap::new();
        for (name, description) in self.backend.list().await? {
            match self.backend.get(&name).await? {
                Some(program) if program.nature() == nature => {
                    matching.insert(name, description);
                }
                _ => {}
            }
        }
        Ok(matching)
    }

    /// Ask the backend which stored program, if any, fits `problem`.
    ///
    /// Any answer other than a known name or exactly `NONE` counts as no
    /// match. With no stored programs the backend is not consulted.
    ///
    /// # Errors
    /// `ProgramStoreError::Backend` if the language model is unavailable.
    pub async fn lookup(
        &self,
        problem: &str,
        resource_overviews: &[(String, String)],
        program_descriptions: &BTreeMap<String, String>,
    ) -> Result<Option<String>, ProgramStoreError> {
        if program_descriptions.is_empty() {
            return Ok(None);
        }

        let prompt = search_prompt(problem, resource_overviews, program_descriptions)?;
        tracing::debug!("Program search prompt:\n{}", prompt);
        let response = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| ProgramStoreError::Backend(e.to_string()))?;

        match validate_token(&response, program_descriptions) {
            Ok(found) => {
                match &found {
                    Some(name) => tracing::info!("Program lookup matched {}", name),
                    None => tracing::debug!("Program lookup found no applicable program"),
                }
                Ok(found)
            }
            Err(e) => {
                tracing::warn!("{}; falling back to fresh decomposition", e);
                Ok(None)
            }
        }
    }
}

fn search_prompt(
    problem: &str,
    resource_overviews: &[(String, String)],
    program_descriptions: &BTreeMap<String, String>,
) -> Result<String, ProgramStoreError> {
    let overviews: BTreeMap<&str, &str> = resource_overviews
        .iter()
        .map(|(name, overview)| (name.as_str(), overview.as_str()))
        .collect();
    let overviews = serde_json::to_string_pretty(&overviews)?;
    let descriptions = serde_json::to_string_pretty(program_descriptions)?;
    Ok(fill_template(
        PROGRAM_SEARCH_PROMPT,
        &[
            ("problem", problem),
            ("resource_overviews", overviews.as_str()),
            ("program_descriptions", descriptions.as_str()),
        ],
    ))
}

/// Accept only a known program name or `NONE`, after trimming whitespace.
fn validate_token(
    response: &str,
    known: &BTreeMap<String, String>,
) -> Result<Option<String>, ProgramStoreError> {
    let token = response.trim();
    if token == NO_PROGRAM {
        Ok(None)
    } else if known.contains_key(token) {
        Ok(Some(token.to_string()))
    } else {
        Err(ProgramStoreError::AmbiguousMatch(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        ChatMessage, ChatOptions, ChatResponse, LlmClient, LlmError, RetryConfig,
    };
    use crate::program::{InMemoryProgramBackend, TaskTemplate};
    use crate::task::TaskNature;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct Canned {
        reply: String,
        prompts: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for Canned {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ChatResponse, LlmError> {
            let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            Ok(ChatResponse {
                content: Some(self.reply.clone()),
                ..ChatResponse::default()
            })
        }
    }

    fn store_replying(reply: &str) -> (ProgramStore, Arc<Canned>) {
        let client = Arc::new(Canned {
            reply: reply.to_string(),
            prompts: StdMutex::new(Vec::new()),
        });
        let llm =
            LmBackend::new(client.clone(), "test").with_retry_config(RetryConfig::immediate(0));
        (
            ProgramStore::new(Arc::new(InMemoryProgramBackend::new()), llm),
            client,
        )
    }

    fn program(name: &str) -> Program {
        Program::new(
            name,
            "retrieval of a company's yearly revenue",
            TaskTemplate {
                ask: "{problem}".to_string(),
                nature: TaskNature::Retrieval,
                resources: vec![],
                subs: vec![],
            },
        )
    }

    fn known(names: &[&str]) -> BTreeMap<String, String> {
        names
            .iter()
            .map(|n| (n.to_string(), format!("{} description", n)))
            .collect()
    }

    #[test]
    fn token_validation() {
        let known = known(&["prog-A"]);
        assert_eq!(validate_token("  prog-A\n", &known).unwrap(), Some("prog-A".to_string()));
        assert_eq!(validate_token("NONE", &known).unwrap(), None);
        assert!(matches!(
            validate_token("none", &known),
            Err(ProgramStoreError::AmbiguousMatch(_))
        ));
        assert!(matches!(
            validate_token("\"prog-A\"", &known),
            Err(ProgramStoreError::AmbiguousMatch(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_names_need_overwrite() {
        let (store, _) = store_replying("NONE");
        store.store(program("prog-A"), false).await.unwrap();
        assert!(matches!(
            store.store(program("prog-A"), false).await,
            Err(ProgramStoreError::DuplicateName(name)) if name == "prog-A"
        ));

        let mut replacement = program("prog-A");
        replacement.description = "replaced".to_string();
        store.store(replacement, true).await.unwrap();
        assert_eq!(store.get("prog-A").await.unwrap().description, "replaced");
    }

    #[tokio::test]
    async fn lookup_returns_known_name() {
        let (store, client) = store_replying("prog-A");
        store.store(program("prog-A"), false).await.unwrap();
        let descriptions = store.descriptions().await.unwrap();
        let overviews = vec![("docs".to_string(), "annual reports".to_string())];

        let found = store
            .lookup("What was ACME's 2023 revenue?", &overviews, &descriptions)
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("prog-A"));

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("What was ACME's 2023 revenue?"));
        assert!(prompts[0].contains("\"docs\": \"annual reports\""));
        assert!(prompts[0].contains("\"prog-A\": \"retrieval of a company's yearly revenue\""));
    }

    #[tokio::test]
    async fn lookup_treats_unknown_token_as_none() {
        let (store, _) = store_replying("Program prog-A looks best");
        store.store(program("prog-A"), false).await.unwrap();
        let descriptions = store.descriptions().await.unwrap();
        let found = store.lookup("q", &[], &descriptions).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn lookup_skips_backend_without_programs() {
        let (store, client) = store_replying("prog-A");
        let found = store.lookup("q", &[], &BTreeMap::new()).await.unwrap();
        assert!(found.is_none());
        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn descriptions_filter_by_nature() {
        let (store, _) = store_replying("NONE");
        store.store(program("prog-A"), false).await.unwrap();
        let mut calc = program("prog-B");
        calc.template.nature = TaskNature::Calculation;
        store.store(calc, false).await.unwrap();

        let retrieval = store.descriptions_of(TaskNature::Retrieval).await.unwrap();
        assert_eq!(retrieval.keys().collect::<Vec<_>>(), vec!["prog-A"]);
        let assessment = store
            .descriptions_of(TaskNature::Assessment)
            .await
            .unwrap();
        assert!(assessment.is_empty());
    }

    #[tokio::test]
    async fn unknown_program_errors() {
        let (store, _) = store_replying("NONE");
        assert!(matches!(
            store.get("ghost").await,
            Err(ProgramStoreError::UnknownProgram(_))
        ));
    }
}
