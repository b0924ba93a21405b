//! Filesystem watcher for processor definitions.
//!
//! Watches the processors path and reloads the catalog when a definition file
//! is created, modified or removed.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    notify_debouncer_full::{
        DebounceEventResult, Debouncer, RecommendedCache, new_debouncer,
        notify::{EventKind, RecommendedWatcher, RecursiveMode},
    },
    tracing::{debug, info, warn},
};

use crate::{catalog::ProcessorCatalog, error::Result, processors::is_processor_file};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Keeps a debounced watch on the processors path alive.
///
/// Dropping the watcher stops reloads.
pub struct CatalogWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl CatalogWatcher {
    /// Start watching `path` (a processors file or directory).
    ///
    /// A single file is watched through its parent directory so editors that
    /// replace the file on save still trigger a reload.
    pub fn start(catalog: Arc<ProcessorCatalog>, path: PathBuf) -> Result<Self> {
        let single_file = path.is_file().then(|| path.clone());
        let watch_dir = match &single_file {
            Some(file) => file
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), PathBuf::from),
            None => path.clone(),
        };

        let reload_path = path.clone();
        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let changed = events.iter().any(|event| {
                        matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) && event.paths.iter().any(|p| match &single_file {
                            Some(file) => p.file_name() == file.file_name(),
                            None => is_processor_file(p),
                        })
                    });
                    if changed {
                        debug!(path = %reload_path.display(), "processor files changed");
                        // Errors are logged by the catalog; the old catalog stays live.
                        let _ = catalog.reload_from(&reload_path);
                    }
                },
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "processor watcher error");
                    }
                },
            }
        })?;

        debouncer.watch(&watch_dir, RecursiveMode::NonRecursive)?;
        info!(dir = %watch_dir.display(), "processor watcher: watching directory");

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}
