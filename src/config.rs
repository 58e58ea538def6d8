//! Project configuration.
//!
//! A project is configured by a `Dyn.toml` at its root:
//!
//! ```toml
//! [project]
//! extension = "js"
//! exclude = ["generated"]   # on top of node_modules, vendor and target
//! cache-dir = "/tmp/dynloader"
//!
//! [externals]
//! ua-parser-js = "0.7"
//! ```
//!
//! Without a `Dyn.toml`, the `dependencies` of a `package.json` are used
//! as the external-package catalog.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "Dyn.toml";
pub const PACKAGE_JSON: &str = "package.json";

pub fn default_extension() -> String {
    "js".to_string()
}

pub fn default_exclude() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        "vendor".to_string(),
        "target".to_string(),
    ]
}

/// Default location of synthesized external-package wrappers.
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("dynloader")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectSection {
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Directory names skipped in addition to [`default_exclude`]
    #[serde(default)]
    pub exclude: Vec<String>,
    pub cache_dir: Option<PathBuf>,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            exclude: Vec::new(),
            cache_dir: None,
        }
    }
}

impl ProjectSection {
    /// Every directory name the scan skips: the vendored-tree defaults
    /// followed by the configured names.
    pub fn exclusions(&self) -> Vec<String> {
        let mut exclusions = default_exclude();
        for name in &self.exclude {
            if !exclusions.contains(name) {
                exclusions.push(name.clone());
            }
        }
        exclusions
    }
}

/// Parsed project configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub project: ProjectSection,
    /// External package name -> version requirement (informational only)
    #[serde(default)]
    pub externals: BTreeMap<String, toml::Value>,
}

#[derive(Deserialize)]
struct PackageJson {
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
}

impl ProjectConfig {
    /// Read the configuration for the project rooted at `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.is_file() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            return Self::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()));
        }

        let package_path = root.join(PACKAGE_JSON);
        if package_path.is_file() {
            let content = fs::read_to_string(&package_path)
                .with_context(|| format!("Failed to read {}", package_path.display()))?;
            let package: PackageJson = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", package_path.display()))?;
            return Ok(Self {
                project: ProjectSection::default(),
                externals: package
                    .dependencies
                    .into_keys()
                    .map(|name| (name, toml::Value::String("*".to_string())))
                    .collect(),
            });
        }

        tracing::debug!(
            "No {CONFIG_FILE} or {PACKAGE_JSON} in {}, using defaults",
            root.display()
        );
        Ok(Self::default())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn external_names(&self) -> impl Iterator<Item = &String> {
        self.externals.keys()
    }
}
