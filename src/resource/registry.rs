//! Deduplicating resource registry.
//!
//! # Invariants
//! - first registration of a `unique_name` wins; later ones are no-ops
//! - iteration order is registration order

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::OnceCell;

use super::Resource;
use crate::task::TaskNature;

struct Entry {
    resource: Arc<dyn Resource>,
    overview: Arc<OnceCell<String>>,
}

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    entries: HashMap<String, Entry>,
}

/// Map from unique name to resource, shared by reference with the agent.
#[derive(Default)]
pub struct ResourceRegistry {
    inner: RwLock<Inner>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `resource` unless its name is taken. Returns the registrant
    /// that ends up in the registry (the original one on conflict).
    pub fn register(&self, resource: Arc<dyn Resource>) -> Arc<dyn Resource> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let name = resource.unique_name().to_string();
        if let Some(existing) = inner.entries.get(&name) {
            tracing::debug!("Resource {} already registered, keeping original", name);
            return Arc::clone(&existing.resource);
        }
        tracing::info!("Registered {} resource {}", resource.kind(), name);
        inner.order.push(name.clone());
        inner.entries.insert(
            name,
            Entry {
                resource: Arc::clone(&resource),
                overview: Arc::new(OnceCell::new()),
            },
        );
        resource
    }

    pub fn get(&self, unique_name: &str) -> Option<Arc<dyn Resource>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .entries
            .get(unique_name)
            .map(|e| Arc::clone(&e.resource))
    }

    pub fn contains(&self, unique_name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.contains_key(unique_name)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unique names in registration order.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.order.clone()
    }

    /// All resources in registration order.
    pub fn resources(&self) -> Vec<Arc<dyn Resource>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .filter_map(|name| inner.entries.get(name))
            .map(|e| Arc::clone(&e.resource))
            .collect()
    }

    /// Resources a task should consult, in registration order.
    ///
    /// Known names in `assigned` win; when none of them is registered, every
    /// resource supporting `nature` applies.
    pub fn applicable(&self, nature: TaskNature, assigned: &[String]) -> Vec<Arc<dyn Resource>> {
        let all = self.resources();
        if !assigned.is_empty() {
            let picked: Vec<Arc<dyn Resource>> = all
                .iter()
                .filter(|r| assigned.iter().any(|a| a == r.unique_name()))
                .cloned()
                .collect();
            if !picked.is_empty() {
                return picked;
            }
            tracing::warn!(
                "None of the assigned resources {:?} is registered, using all {} resources",
                assigned,
                nature
            );
        }
        all.into_iter().filter(|r| r.supports(nature)).collect()
    }

    /// Keep only the names that are registered.
    pub fn retain_known(&self, names: Vec<String>) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        names
            .into_iter()
            .filter(|n| {
                let known = inner.entries.contains_key(n);
                if !known {
                    tracing::warn!("Dropping unknown resource {}", n);
                }
                known
            })
            .collect()
    }

    /// Overview of one resource, computed once then cached.
    pub async fn overview(&self, unique_name: &str) -> Option<String> {
        let (resource, cell) = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            let entry = inner.entries.get(unique_name)?;
            (Arc::clone(&entry.resource), Arc::clone(&entry.overview))
        };
        let result = cell
            .get_or_try_init(|| async move { resource.overview().await })
            .await;
        match result {
            Ok(text) => Some(text.clone()),
            Err(e) => {
                tracing::warn!("Overview of {} unavailable: {}", unique_name, e);
                None
            }
        }
    }

    /// `(unique_name, overview)` for every resource, in registration order.
    /// Resources whose overview cannot be produced are listed with a placeholder.
    pub async fn overviews(&self) -> Vec<(String, String)> {
        let names = self.names();
        let texts =
            futures::future::join_all(names.iter().map(|name| self.overview(name))).await;
        names
            .into_iter()
            .zip(texts)
            .map(|(name, text)| {
                (
                    name,
                    text.unwrap_or_else(|| "(overview unavailable)".to_string()),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceError, ResourceKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Named {
        name: String,
        tag: &'static str,
        only: Option<TaskNature>,
        summaries: AtomicUsize,
    }

    fn named(name: &str, tag: &'static str) -> Arc<Named> {
        Arc::new(Named {
            name: name.to_string(),
            tag,
            only: None,
            summaries: AtomicUsize::new(0),
        })
    }

    #[async_trait]
    impl Resource for Named {
        fn unique_name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ResourceKind {
            ResourceKind::Database
        }

        fn supports(&self, nature: TaskNature) -> bool {
            self.only.map_or(true, |only| only == nature)
        }

        async fn answer(&self, _q: &str, _n: usize) -> Result<String, ResourceError> {
            Ok(self.tag.to_string())
        }

        async fn summarize(&self) -> Result<String, ResourceError> {
            self.summaries.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{} overview", self.tag))
        }
    }

    #[tokio::test]
    async fn first_registration_wins() {
        let registry = ResourceRegistry::new();
        let first = registry.register(named("db", "first"));
        let second = registry.register(named("db", "second"));

        assert_eq!(registry.len(), 1);
        assert_eq!(first.answer("q", 10).await.unwrap(), "first");
        assert_eq!(second.answer("q", 10).await.unwrap(), "first");
        for _ in 0..3 {
            let got = registry.get("db").unwrap();
            assert_eq!(got.answer("q", 10).await.unwrap(), "first");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_registration_keeps_one_instance() {
        let registry = Arc::new(ResourceRegistry::new());
        let tags = ["t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7"];
        let handles: Vec<_> = tags
            .into_iter()
            .map(|tag| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.register(named("db", tag)) })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            winners.push(handle.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        let stored = registry.get("db").unwrap();
        assert!(winners.iter().all(|w| Arc::ptr_eq(w, &stored)));
        let answer = stored.answer("q", 10).await.unwrap();
        assert!(tags.contains(&answer.as_str()));
    }

    #[test]
    fn iteration_follows_registration_order() {
        let registry = ResourceRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register(named(name, "x"));
        }
        assert_eq!(registry.names(), vec!["c", "a", "b"]);
    }

    #[test]
    fn applicable_prefers_assigned_then_nature() {
        let registry = ResourceRegistry::new();
        registry.register(named("docs", "d"));
        registry.register(Arc::new(Named {
            name: "sensor".to_string(),
            tag: "s",
            only: Some(TaskNature::Calculation),
            summaries: AtomicUsize::new(0),
        }));

        let assigned = registry.applicable(TaskNature::Retrieval, &["sensor".to_string()]);
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].unique_name(), "sensor");

        let by_nature = registry.applicable(TaskNature::Retrieval, &[]);
        assert_eq!(by_nature.len(), 1);
        assert_eq!(by_nature[0].unique_name(), "docs");

        let fallback = registry.applicable(TaskNature::Calculation, &["gone".to_string()]);
        assert_eq!(fallback.len(), 2);
    }

    #[tokio::test]
    async fn overview_is_computed_once() {
        let registry = ResourceRegistry::new();
        let resource = named("docs", "d");
        registry.register(resource.clone());

        assert_eq!(registry.overview("docs").await.as_deref(), Some("d overview"));
        assert_eq!(
            registry.overviews().await,
            vec![("docs".to_string(), "d overview".to_string())]
        );
        assert_eq!(resource.summaries.load(Ordering::SeqCst), 1);
        assert!(registry.overview("missing").await.is_none());
    }

    #[test]
    fn retain_known_drops_unregistered() {
        let registry = ResourceRegistry::new();
        registry.register(named("web", "w"));
        let kept = registry.retain_known(vec!["web".to_string(), "ghost".to_string()]);
        assert_eq!(kept, vec!["web"]);
    }
}
