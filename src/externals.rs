//! Resolution of dependency names that refer to external packages.
//!
//! A dependency that is not defined in the project, but is listed in the
//! project's external-package catalog, is satisfied by a synthesized
//! module whose entry point hands out the package itself. The synthesized
//! source is written to a cache directory once and reused by later builds.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use crate::error::RegistryError;
use crate::syntax::parse_module_source;
use crate::types::{EntryPoint, ModuleDefinition};

#[derive(Debug, Clone)]
pub struct ExternalCatalog {
    names: BTreeSet<String>,
    cache_dir: PathBuf,
}

impl ExternalCatalog {
    pub fn new<I, S>(names: I, cache_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// Path of the cached wrapper for `name`.
    pub fn wrapper_path(&self, name: &str) -> PathBuf {
        let stem: String = name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();
        self.cache_dir.join(format!("{stem}.js"))
    }

    /// Produce the module definition for an external package, reusing a
    /// previously cached wrapper when it is still valid.
    pub fn synthesize(&self, name: &str) -> Result<ModuleDefinition, RegistryError> {
        let path = self.wrapper_path(name);
        let io_error = |source| RegistryError::ExternalSynthesis {
            name: name.to_string(),
            source,
        };

        let cached = match fs::read_to_string(&path) {
            Ok(source) if is_wrapper_for(&source, name) => Some(source),
            Ok(_) => {
                tracing::warn!(
                    "Cached wrapper {} does not define '{name}', regenerating",
                    path.display()
                );
                None
            }
            Err(_) => None,
        };

        let source = match cached {
            Some(source) => {
                tracing::debug!("Reusing cached wrapper for external package '{name}'");
                source
            }
            None => {
                let source = wrapper_source(name);
                fs::create_dir_all(&self.cache_dir).map_err(io_error)?;
                fs::write(&path, &source).map_err(io_error)?;
                tracing::debug!(
                    "Synthesized wrapper for external package '{name}' at {}",
                    path.display()
                );
                source
            }
        };

        Ok(ModuleDefinition {
            name: name.to_string(),
            load_dependency_names: Vec::new(),
            lazy_dependency_names: Vec::new(),
            entry_point: EntryPoint::External(name.to_string()),
            source,
            path: None,
        })
    }
}

fn is_wrapper_for(source: &str, name: &str) -> bool {
    matches!(
        parse_module_source(source),
        Ok(parsed) if parsed.name == name
            && parsed.entry_point == EntryPoint::External(name.to_string())
    )
}

/// Source text of the wrapper module for an external package.
pub fn wrapper_source(name: &str) -> String {
    let quoted = quote(name);
    format!(
        "dyn.register({{\n  name: {quoted},\n  onLoad: require({quoted})\n}});\n"
    )
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' | '\'' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            ch => out.push(ch),
        }
    }
    out.push('\'');
    out
}
