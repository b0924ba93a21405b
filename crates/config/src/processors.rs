//! Processor definition files.
//!
//! A processors path is either one file or a directory of files, each holding
//! a top-level `processors` list. Processors without an explicit `group` are
//! grouped by their file stem, minus a `-processors`/`_processors` suffix
//! (`lighting-processors.yaml` → `lighting`).

use std::path::Path;

use {
    homegw_protocol::ProcessorSpec,
    serde::Deserialize,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    loader::read_document,
};

const PROCESSOR_EXTENSIONS: &[&str] = &["yaml", "yml", "toml", "json"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProcessorFile {
    processors: Vec<ProcessorSpec>,
}

/// Load every processor under `path`.
///
/// Directory entries are read in file-name order; subdirectories and files
/// with other extensions are skipped. Any unreadable or unparsable file fails
/// the whole load.
pub fn load_processors(path: &Path) -> Result<Vec<ProcessorSpec>> {
    let meta = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
    if !meta.is_dir() {
        return load_processor_file(path);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).map_err(|e| Error::io(path, e))? {
        let entry = entry.map_err(|e| Error::io(path, e))?;
        let file = entry.path();
        if file.is_file() && is_processor_file(&file) {
            files.push(file);
        }
    }
    files.sort();

    let mut all = Vec::new();
    for file in &files {
        all.extend(load_processor_file(file)?);
    }
    if files.is_empty() {
        warn!(path = %path.display(), "processor directory contains no definition files");
    }
    debug!(path = %path.display(), files = files.len(), processors = all.len(), "loaded processors");
    Ok(all)
}

/// True for files the catalog would load (by extension).
#[must_use]
pub fn is_processor_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| PROCESSOR_EXTENSIONS.contains(&ext))
}

fn load_processor_file(path: &Path) -> Result<Vec<ProcessorSpec>> {
    let file: ProcessorFile = read_document(path)?;
    let group = default_group(path);
    Ok(file
        .processors
        .into_iter()
        .map(|mut spec| {
            if spec.group.trim().is_empty() {
                spec.group.clone_from(&group);
            }
            spec
        })
        .collect())
}

fn default_group(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    stem.strip_suffix("-processors")
        .or_else(|| stem.strip_suffix("_processors"))
        .unwrap_or(stem)
        .to_string()
}
