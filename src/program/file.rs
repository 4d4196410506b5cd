//! JSON file-based program backend.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use super::{Program, ProgramBackend, ProgramStoreError};

#[derive(Debug, Serialize, Deserialize, Default)]
struct ProgramSnapshot {
    programs: HashMap<String, Program>,
}

/// Keeps programs in memory and rewrites a JSON snapshot on every `put`.
#[derive(Clone)]
pub struct FileProgramBackend {
    path: PathBuf,
    programs: Arc<RwLock<HashMap<String, Program>>>,
    persist_lock: Arc<Mutex<()>>,
}

impl FileProgramBackend {
    /// Open (or start) the snapshot at `path`.
    ///
    /// A snapshot that does not parse is moved aside to `<path>.corrupt`
    /// before the store starts empty, so the next write never replaces it.
    ///
    /// # Errors
    /// `ProgramStoreError::Io` if the snapshot exists but cannot be read or
    /// moved aside.
    pub async fn open(path: PathBuf) -> Result<Self, ProgramStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let snapshot = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<ProgramSnapshot>(&bytes) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    let aside = Self::corrupt_path(&path);
                    fs::rename(&path, &aside).await?;
                    tracing::warn!(
                        "Failed to parse program store {}: {}; moved it to {}",
                        path.display(),
                        e,
                        aside.display()
                    );
                    ProgramSnapshot::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ProgramSnapshot::default(),
            Err(err) => return Err(err.into()),
        };
        tracing::info!(
            "Opened program store {} with {} programs",
            path.display(),
            snapshot.programs.len()
        );

        Ok(Self {
            path,
            programs: Arc::new(RwLock::new(snapshot.programs)),
            persist_lock: Arc::new(Mutex::new(())),
        })
    }

    fn corrupt_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    async fn persist(&self, programs: HashMap<String, Program>) -> Result<(), ProgramStoreError> {
        let snapshot = ProgramSnapshot { programs };
        let data = serde_json::to_vec_pretty(&snapshot)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ProgramBackend for FileProgramBackend {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn get(&self, name: &str) -> Result<Option<Program>, ProgramStoreError> {
        Ok(self.programs.read().await.get(name).cloned())
    }

    /// The snapshot is written first; memory only changes once it is on disk.
    async fn put(&self, program: Program) -> Result<(), ProgramStoreError> {
        let _guard = self.persist_lock.lock().await;
        let mut next = self.programs.read().await.clone();
        next.insert(program.name.clone(), program.clone());
        self.persist(next).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::TaskTemplate;
    use crate::task::TaskNature;

    fn program(name: &str) -> Program {
        Program::new(
            name,
            format!("{} description", name),
            TaskTemplate {
                ask: "{problem}".to_string(),
                nature: TaskNature::Retrieval,
                resources: vec![],
                subs: vec![],
            },
        )
    }

    #[tokio::test]
    async fn programs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store/programs.json");

        let backend = FileProgramBackend::open(path.clone()).await.unwrap();
        backend.put(program("alpha")).await.unwrap();
        backend.put(program("beta")).await.unwrap();
        drop(backend);

        let reopened = FileProgramBackend::open(path.clone()).await.unwrap();
        let listed = reopened.list().await.unwrap();
        assert_eq!(listed.keys().collect::<Vec<_>>(), vec!["alpha", "beta"]);
        assert_eq!(
            reopened.get("alpha").await.unwrap().unwrap().description,
            "alpha description"
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_kept_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("programs.json");
        std::fs::write(&path, b"{not json").unwrap();

        let backend = FileProgramBackend::open(path.clone()).await.unwrap();
        assert!(backend.list().await.unwrap().is_empty());
        backend.put(program("alpha")).await.unwrap();

        let aside = dir.path().join("programs.json.corrupt");
        assert_eq!(std::fs::read(&aside).unwrap(), b"{not json");
        let reopened = FileProgramBackend::open(path).await.unwrap();
        assert!(reopened.get("alpha").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unreadable_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the snapshot file should be cannot be read as one.
        let path = dir.path().join("programs.json");
        std::fs::create_dir(&path).unwrap();

        assert!(matches!(
            FileProgramBackend::open(path).await,
            Err(ProgramStoreError::Io(_))
        ));
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("programs.json");
        let backend = FileProgramBackend::open(path.clone()).await.unwrap();
        backend.put(program("alpha")).await.unwrap();

        // Occupy the temp path with a directory so the snapshot write fails.
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();
        assert!(backend.put(program("beta")).await.is_err());

        assert!(backend.get("beta").await.unwrap().is_none());
        let listed = backend.list().await.unwrap();
        assert_eq!(listed.keys().collect::<Vec<_>>(), vec!["alpha"]);
    }
}
