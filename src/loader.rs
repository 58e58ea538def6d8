use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RegistryError;
use crate::syntax::parse_module_source;
use crate::types::ModuleDefinition;

/// Which files of a project tree are candidate module definitions.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub extension: String,
    /// Directory names never descended into (vendored/third-party trees)
    pub exclude: Vec<String>,
    /// Paths never descended into, e.g. a synthesis cache inside the project
    pub skip: Vec<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extension: crate::config::default_extension(),
            exclude: crate::config::default_exclude(),
            skip: Vec::new(),
        }
    }
}

fn project_error(path: &Path, message: impl std::fmt::Display) -> RegistryError {
    RegistryError::Project {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Collect candidate source files below `root`, sorted by path.
pub fn discover_files(root: &Path, options: &ScanOptions) -> Result<Vec<PathBuf>, RegistryError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| project_error(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| project_error(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| project_error(&path, e))?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();

            if file_type.is_dir() {
                if file_name.starts_with('.')
                    || options.exclude.iter().any(|excluded| *excluded == file_name)
                    || options.skip.iter().any(|skipped| *skipped == path)
                {
                    tracing::debug!("Skipping directory {}", path.display());
                    continue;
                }
                pending.push(path);
            } else if path.extension().and_then(|s| s.to_str()) == Some(options.extension.as_str())
            {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Parse one file. Files that are not well-formed module definitions are
/// reported and skipped.
pub fn parse_definition_file(path: &Path) -> Result<Option<ModuleDefinition>, RegistryError> {
    let source = fs::read_to_string(path).map_err(|e| project_error(path, e))?;
    match parse_module_source(&source) {
        Ok(parsed) => Ok(Some(ModuleDefinition {
            name: parsed.name,
            load_dependency_names: parsed.load_dependency_names,
            lazy_dependency_names: parsed.lazy_dependency_names,
            entry_point: parsed.entry_point,
            source,
            path: Some(path.to_path_buf()),
        })),
        Err(e) => {
            tracing::warn!(
                "File {} does not appear to be a dyn module: {e}",
                path.display()
            );
            Ok(None)
        }
    }
}

/// Scan a project tree and return its module definitions.
///
/// Module names must be unique across the project.
pub fn load_definitions(
    root: &Path,
    options: &ScanOptions,
) -> Result<Vec<ModuleDefinition>, RegistryError> {
    let files = discover_files(root, options)?;
    let mut definitions = Vec::new();
    for file in &files {
        if let Some(definition) = parse_definition_file(file)? {
            definitions.push(definition);
        }
    }
    tracing::info!(
        "Found {} module definitions in {} candidate files under {}",
        definitions.len(),
        files.len(),
        root.display()
    );
    check_unique_names(&definitions)?;
    Ok(definitions)
}

/// Collision detection - ensure unique names across all definitions
pub fn check_unique_names(definitions: &[ModuleDefinition]) -> Result<(), RegistryError> {
    let mut seen: HashMap<&str, &ModuleDefinition> = HashMap::new();
    for definition in definitions {
        if let Some(first) = seen.insert(&definition.name, definition) {
            return Err(RegistryError::DuplicateModule {
                name: definition.name.clone(),
                first: first.origin(),
                second: definition.origin(),
            });
        }
    }
    Ok(())
}
