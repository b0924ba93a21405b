//! In-memory processor catalog.

use std::{
    path::Path,
    sync::{Arc, PoisonError, RwLock},
};

use {
    homegw_protocol::ProcessorSpec,
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    processors::load_processors,
    validate::{Severity, validate_processors},
};

/// Reloadable, read-mostly set of processor definitions.
///
/// Readers take a snapshot (`Arc` clone) and never observe a partially
/// applied reload. The write lock is held only to swap the pointer.
#[derive(Debug, Default)]
pub struct ProcessorCatalog {
    specs: RwLock<Arc<Vec<ProcessorSpec>>>,
}

impl ProcessorCatalog {
    #[must_use]
    pub fn new(specs: Vec<ProcessorSpec>) -> Self {
        Self {
            specs: RwLock::new(Arc::new(specs)),
        }
    }

    /// Load and validate processors from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(load_checked(path)?))
    }

    /// The full catalog as of now, disabled entries included.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<ProcessorSpec>> {
        Arc::clone(&self.specs.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Enabled processors, in definition order.
    #[must_use]
    pub fn enabled(&self) -> Vec<ProcessorSpec> {
        self.snapshot()
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect()
    }

    /// Look up a processor by id, enabled or not.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ProcessorSpec> {
        self.snapshot().iter().find(|p| p.id == id).cloned()
    }

    /// Swap in a new set of processors wholesale.
    pub fn replace(&self, specs: Vec<ProcessorSpec>) {
        let next = Arc::new(specs);
        *self.specs.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Reload from disk. On any load or validation error the current
    /// catalog is left untouched.
    pub fn reload_from(&self, path: &Path) -> Result<usize> {
        let specs = match load_checked(path) {
            Ok(specs) => specs,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "processor reload failed, keeping current catalog");
                return Err(e);
            },
        };
        let count = specs.len();
        let enabled = specs.iter().filter(|p| p.enabled).count();
        self.replace(specs);
        info!(path = %path.display(), processors = count, enabled, "processor catalog reloaded");
        Ok(count)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.snapshot().iter().filter(|p| p.enabled).count()
    }
}

fn load_checked(path: &Path) -> Result<Vec<ProcessorSpec>> {
    let specs = load_processors(path)?;
    let errors: Vec<String> = validate_processors(&specs)
        .into_iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| format!("{}: {}", d.path, d.message))
        .collect();
    if errors.is_empty() {
        Ok(specs)
    } else {
        Err(Error::invalid(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, enabled: bool) -> ProcessorSpec {
        ProcessorSpec {
            id: id.into(),
            name: id.into(),
            group: String::new(),
            description: String::new(),
            keywords: Vec::new(),
            parameters: Vec::new(),
            enabled,
        }
    }

    #[test]
    fn enabled_filters_disabled_entries() {
        let catalog = ProcessorCatalog::new(vec![spec("a", true), spec("b", false)]);
        let ids: Vec<_> = catalog.enabled().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, ["a"]);
        assert_eq!(catalog.enabled_count(), 1);
        assert!(catalog.get("b").is_some());
        assert!(catalog.get("zzz").is_none());
    }

    #[test]
    fn snapshot_is_unaffected_by_replace() {
        let catalog = ProcessorCatalog::new(vec![spec("old", true)]);
        let before = catalog.snapshot();
        catalog.replace(vec![spec("new", true), spec("newer", true)]);
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].id, "old");
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("old").is_none());
    }

    #[test]
    fn failed_reload_keeps_current_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lights.yaml");
        std::fs::write(&path, "processors:\n  - id: light.on\n    name: On\n").unwrap();

        let catalog = ProcessorCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("light.on").unwrap().group, "lights");

        // Duplicate ids fail validation.
        std::fs::write(
            &path,
            "processors:\n  - id: dup\n    name: A\n  - id: dup\n    name: B\n",
        )
        .unwrap();
        assert!(matches!(catalog.reload_from(&path), Err(Error::Invalid(_))));
        assert!(catalog.get("light.on").is_some());

        // Syntax errors too.
        std::fs::write(&path, "processors: [").unwrap();
        assert!(catalog.reload_from(&path).is_err());
        assert_eq!(catalog.len(), 1);

        std::fs::write(
            &path,
            "processors:\n  - id: light.off\n    name: Off\n  - id: light.dim\n    name: Dim\n",
        )
        .unwrap();
        assert_eq!(catalog.reload_from(&path).unwrap(), 2);
        assert!(catalog.get("light.on").is_none());
    }

    #[test]
    fn concurrent_readers_see_whole_catalogs() {
        let catalog = Arc::new(ProcessorCatalog::new(vec![spec("a", true)]));
        let writer = {
            let catalog = Arc::clone(&catalog);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let n = if i % 2 == 0 { 3 } else { 1 };
                    catalog.replace((0..n).map(|j| spec(&format!("p{j}"), true)).collect());
                }
            })
        };
        for _ in 0..200 {
            let len = catalog.snapshot().len();
            assert!(len == 1 || len == 3);
        }
        writer.join().unwrap();
    }
}
