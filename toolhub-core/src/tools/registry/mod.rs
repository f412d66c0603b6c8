//! Failure-isolating tool registry
//!
//! The registry turns a tool name into a live handle on first use. A
//! construction error (or panic) never propagates: it is classified, stored as
//! a [`FailureRecord`] and every later resolution of that name short-circuits
//! to `None` until the record is cleared. One broken tool therefore cannot
//! affect any other.

pub mod error;
mod factory;
mod failure;

pub use error::{ToolError, ToolErrorType, ToolExecutionError, classify_error, classify_message};
pub use factory::{ToolConstructor, ToolFactory};
pub use failure::{FailureRecord, HealthReport, ToolHealth, extract_missing_dependency};

use anyhow::anyhow;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ToolDescriptor};
use crate::tools::traits::Tool;

pub struct ToolRegistry {
    catalog: RwLock<Arc<Catalog>>,
    factory: ToolFactory,
    handles: DashMap<String, Arc<dyn Tool>>,
    failures: DashMap<String, FailureRecord>,
    build_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ToolRegistry {
    pub fn new(catalog: Catalog, factory: ToolFactory) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
            factory,
            handles: DashMap::new(),
            failures: DashMap::new(),
            build_locks: DashMap::new(),
        }
    }

    /// Registry over `catalog` with only the builtin tool types
    pub fn with_builtins(catalog: Catalog) -> Self {
        Self::new(catalog, ToolFactory::with_builtins())
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().clone()
    }

    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.catalog.read().get(name).cloned()
    }

    pub fn factory(&self) -> &ToolFactory {
        &self.factory
    }

    /// Swap in a new catalog. Handles and failures of the old one are dropped.
    pub fn replace_catalog(&self, catalog: Catalog) {
        *self.catalog.write() = Arc::new(catalog);
        self.clear();
        info!("registry catalog replaced");
    }

    /// Return the live handle for `name`, constructing it on first use.
    /// Never fails loudly: construction errors become failure records.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if self.failures.contains_key(name) {
            debug!(tool = %name, "resolution short-circuited by failure record");
            return None;
        }
        if let Some(handle) = self.cached_handle(name) {
            return Some(handle);
        }

        let lock = self.build_locks.entry(name.to_string()).or_default().clone();
        let _guard = lock.lock();

        // another caller may have finished while we waited
        if self.failures.contains_key(name) {
            return None;
        }
        if let Some(handle) = self.cached_handle(name) {
            return Some(handle);
        }

        let Some(descriptor) = self.descriptor(name) else {
            debug!(tool = %name, "no descriptor to construct from");
            return None;
        };

        match self.construct(&descriptor) {
            Ok(handle) => {
                debug!(tool = %name, kind = %descriptor.implementation_type, "tool constructed");
                self.handles.insert(name.to_string(), handle.clone());
                Some(handle)
            }
            Err(err) => {
                self.record_failure(FailureRecord::from_error(
                    name,
                    &err,
                    descriptor.implementation_type.clone(),
                ));
                None
            }
        }
    }

    fn cached_handle(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.handles.get(name).map(|entry| entry.value().clone())
    }

    fn construct(&self, descriptor: &ToolDescriptor) -> anyhow::Result<Arc<dyn Tool>> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.factory.construct(descriptor))) {
            Ok(result) => result,
            Err(payload) => Err(anyhow!(
                "tool constructor panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }

    fn record_failure(&self, record: FailureRecord) {
        warn!(
            tool = %record.tool_name,
            kind = %record.error_kind,
            missing = record.missing_dependency.as_deref().unwrap_or("-"),
            error = %record.error_message,
            "tool marked unavailable"
        );
        // first writer wins so concurrent recorders agree on one record
        self.failures
            .entry(record.tool_name.clone())
            .or_insert(record);
    }

    /// Inject a failure for `name`, dropping any live handle
    pub fn mark_unavailable(&self, name: &str, error: anyhow::Error, module: &str) {
        self.handles.remove(name);
        self.record_failure(FailureRecord::from_error(name, &error, module));
    }

    pub fn failure(&self, name: &str) -> Option<FailureRecord> {
        self.failures.get(name).map(|entry| entry.value().clone())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    pub fn loaded_count(&self) -> usize {
        self.handles.len()
    }

    /// Forget the failure for `name` so the next resolution retries construction
    pub fn clear_failure(&self, name: &str) -> bool {
        let cleared = self.failures.remove(name).is_some();
        if cleared {
            info!(tool = %name, "failure record cleared");
        }
        cleared
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Drop both the handle and the failure for `name`
    pub fn refresh(&self, name: &str) {
        self.handles.remove(name);
        self.failures.remove(name);
        debug!(tool = %name, "tool refreshed");
    }

    /// Drop every handle and failure record. Construction locks are kept so
    /// a build still in flight stays serialized against new resolutions.
    pub fn clear(&self) {
        self.handles.clear();
        self.failures.clear();
    }

    pub fn tool_health(&self, name: &str) -> ToolHealth {
        if let Some(record) = self.failure(name) {
            return ToolHealth::Unavailable(record);
        }
        if self.catalog.read().contains(name) {
            ToolHealth::Available
        } else {
            ToolHealth::Unknown
        }
    }

    /// Aggregate availability without constructing anything. Entries never
    /// resolved count as available unless the factory has no constructor for
    /// their type; [`ToolRegistry::warm_up`] gives the fully resolved view.
    pub fn health(&self) -> HealthReport {
        let catalog = self.catalog();
        let failures: std::collections::BTreeMap<String, FailureRecord> = self
            .failures
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let unsupported = catalog.iter().filter(|descriptor| {
            !failures.contains_key(&descriptor.name)
                && !self.handles.contains_key(&descriptor.name)
                && !self.factory.supports(&descriptor.implementation_type)
        });
        let mut unavailable: Vec<String> = failures.keys().cloned().collect();
        unavailable.extend(unsupported.map(|descriptor| descriptor.name.clone()));
        unavailable.sort();
        let unavailable_in_catalog = unavailable
            .iter()
            .filter(|name| catalog.contains(name))
            .count();

        HealthReport {
            total: catalog.len(),
            available: catalog.len().saturating_sub(unavailable_in_catalog),
            unavailable,
            failures,
        }
    }

    /// Resolve every catalog entry and report the outcome
    pub fn warm_up(&self) -> HealthReport {
        for name in self.catalog().names() {
            let _ = self.resolve(&name);
        }
        let report = self.health();
        info!(
            total = report.total,
            available = report.available,
            "registry warmed up"
        );
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::traits::ToolContext;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NamedTool(String);

    #[async_trait]
    impl Tool for NamedTool {
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(args)
        }

        fn name(&self) -> &str {
            &self.0
        }
    }

    fn catalog() -> Catalog {
        Catalog::from_descriptors(vec![
            ToolDescriptor::new("A", "good"),
            ToolDescriptor::new("B", "broken"),
            ToolDescriptor::new("C", "panicky"),
        ])
        .unwrap_or_default()
    }

    fn registry(built: Arc<AtomicUsize>) -> ToolRegistry {
        let factory = ToolFactory::new()
            .with("good", move |d| {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(NamedTool(d.name.clone())) as Arc<dyn Tool>)
            })
            .with("broken", |_| bail!("missing module 'foo'"))
            .with("panicky", |_| panic!("constructor exploded"));
        ToolRegistry::new(catalog(), factory)
    }

    #[test]
    fn resolve_caches_handles() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = registry(built.clone());
        assert!(registry.resolve("A").is_some());
        assert!(registry.resolve("A").is_some());
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(registry.is_loaded("A"));
    }

    #[test]
    fn failures_become_records_and_short_circuit() {
        let registry = registry(Arc::new(AtomicUsize::new(0)));
        assert!(registry.resolve("B").is_none());
        assert!(registry.resolve("B").is_none());

        let record = registry.failure("B").expect("record");
        assert_eq!(record.missing_dependency.as_deref(), Some("foo"));
        assert_eq!(record.originating_module, "broken");

        assert!(registry.resolve("C").is_none());
        let record = registry.failure("C").expect("panic recorded");
        assert!(record.error_message.contains("constructor exploded"));
    }

    #[test]
    fn mark_unavailable_and_clear() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = registry(built.clone());
        assert!(registry.resolve("A").is_some());

        registry.mark_unavailable("A", anyhow::anyhow!("401 unauthorized"), "test");
        assert!(registry.resolve("A").is_none());
        assert!(matches!(registry.tool_health("A"), ToolHealth::Unavailable(r) if r.error_kind == ToolErrorType::AuthError));

        assert!(registry.clear_failure("A"));
        assert!(registry.resolve("A").is_some());
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn health_report_counts() {
        let registry = registry(Arc::new(AtomicUsize::new(0)));
        let report = registry.warm_up();
        assert_eq!(report.total, 3);
        assert_eq!(report.available, 1);
        assert_eq!(report.unavailable, vec!["B", "C"]);
        assert_eq!(registry.tool_health("missing"), ToolHealth::Unknown);
    }

    #[test]
    fn health_without_warm_up_flags_unsupported_types() {
        let descriptors = vec![
            ToolDescriptor::new("A", "good"),
            ToolDescriptor::new("D", "no_such_type"),
        ];
        let catalog = Catalog::from_descriptors(descriptors).unwrap_or_default();
        let factory = ToolFactory::new().with("good", |d| {
            Ok(Arc::new(NamedTool(d.name.clone())) as Arc<dyn Tool>)
        });
        let registry = ToolRegistry::new(catalog, factory);

        let report = registry.health();
        assert_eq!(report.total, 2);
        assert_eq!(report.available, 1);
        assert_eq!(report.unavailable, vec!["D"]);
        assert!(report.failures.is_empty());
        assert_eq!(registry.loaded_count(), 0);

        let warmed = registry.warm_up();
        assert_eq!(warmed.available, 1);
        assert_eq!(warmed.unavailable, vec!["D"]);
        assert!(warmed.failures.contains_key("D"));
    }

    #[test]
    fn clear_during_construction_still_builds_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        let counter = built.clone();
        let factory = ToolFactory::new().with("good", move |d| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = entered_tx.lock().send(());
                let _ = release_rx.lock().recv();
            }
            Ok(Arc::new(NamedTool(d.name.clone())) as Arc<dyn Tool>)
        });
        let registry = Arc::new(ToolRegistry::new(catalog(), factory));

        let first = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.resolve("A").is_some())
        };
        assert!(entered_rx.recv().is_ok());
        registry.clear();

        let second = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.resolve("A").is_some())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(release_tx.send(()).is_ok());

        assert!(first.join().unwrap_or(false));
        assert!(second.join().unwrap_or(false));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_resolution_constructs_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(registry(built.clone()));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.resolve("A").is_some())
            })
            .collect();
        for thread in threads {
            assert!(thread.join().unwrap_or(false));
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
