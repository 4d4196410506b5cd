//! In-memory program backend (non-persistent).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Program, ProgramBackend, ProgramStoreError};

#[derive(Clone, Default)]
pub struct InMemoryProgramBackend {
    programs: Arc<RwLock<HashMap<String, Program>>>,
}

impl InMemoryProgramBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgramBackend for InMemoryProgramBackend {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn get(&self, name: &str) -> Result<Option<Program>, ProgramStoreError> {
        Ok(self.programs.read().await.get(name).cloned())
    }

    async fn put(&self, program: Program) -> Result<(), ProgramStoreError> {
        self.programs
            .write()
            .await
            .insert(program.name.clone(), program);
        Ok(())
    }

    async fn list(&self) -> Result<BTreeMap<String, String>, ProgramStoreError> {
        Ok(self
            .programs
            .read()
            .await
            .values()
            .map(|p| (p.name.clone(), p.description.clone()))
            .collect())
    }
}
