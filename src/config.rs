//! Engine configuration.
//!
//! Deserialized from camelCase JSON (every field optional) or built in code.
//! Derived flags (`dev`, `cache`) are resolved from `env` in
//! [`ViewEngineConfig::compile_defaults`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compiler::{is_dev_env, CompileOptions};
use crate::manifest::DEFAULT_BUNDLES_PATTERN;
use crate::ViewError;

pub const DEFAULT_EXTENSION: &str = ".svelte";
pub const DEFAULT_SCRATCH_DIR: &str = ".svelte-view-engine";
pub const DEFAULT_ENV: &str = "development";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewEngineConfig {
    /// Ordered view roots.
    pub views_dirs: Vec<PathBuf>,
    /// Extension appended to view names that carry none.
    pub extension: String,
    /// Ordered client bundle directories.
    pub bundles_dirs: Vec<PathBuf>,
    pub bundles_pattern: String,
    /// Public URL prefix of bundle assets.
    pub bundles_host: String,
    /// Environment name. `None` reads `NODE_ENV`.
    pub env: Option<String>,
    pub dev: Option<bool>,
    pub cache: Option<bool>,
    pub hydratable: bool,
    /// Emit legacy (`nomodule`) scripts and legacy browser builds.
    pub legacy: bool,
    pub replace: BTreeMap<String, String>,
    pub preprocess: Vec<String>,
    pub dedupe: Vec<String>,
    pub template_path: Option<PathBuf>,
    pub wrapper_template_path: Option<PathBuf>,
    pub scratch_dir: PathBuf,
}

impl Default for ViewEngineConfig {
    fn default() -> Self {
        Self {
            views_dirs: vec![PathBuf::from("views")],
            extension: DEFAULT_EXTENSION.to_string(),
            bundles_dirs: vec![PathBuf::from("public/dist")],
            bundles_pattern: DEFAULT_BUNDLES_PATTERN.to_string(),
            bundles_host: String::new(),
            env: None,
            dev: None,
            cache: None,
            hydratable: true,
            legacy: true,
            replace: BTreeMap::new(),
            preprocess: Vec::new(),
            dedupe: Vec::new(),
            template_path: None,
            wrapper_template_path: None,
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
        }
    }
}

impl ViewEngineConfig {
    pub fn from_json_str(source: &str) -> Result<Self, ViewError> {
        serde_json::from_str(source)
            .map_err(|e| ViewError::Configuration(format!("Invalid view engine config: {}", e)))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ViewError> {
        let source = std::fs::read_to_string(path).map_err(|e| ViewError::io(path, e))?;
        Self::from_json_str(&source)
    }

    /// The environment name: configured, else `NODE_ENV`, else development.
    pub fn env(&self) -> String {
        self.env
            .clone()
            .or_else(|| std::env::var("NODE_ENV").ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| DEFAULT_ENV.to_string())
    }

    pub fn is_dev(&self) -> bool {
        self.dev.unwrap_or_else(|| is_dev_env(&self.env()))
    }

    /// Process-wide compile options with derived flags resolved.
    pub fn compile_defaults(&self) -> CompileOptions {
        let mut opts = CompileOptions::for_env(self.env());
        opts.dev = self.is_dev();
        opts.cache = self.cache.unwrap_or(!opts.dev);
        opts.hydratable = self.hydratable;
        opts.replace = self.replace.clone();
        opts.preprocess = self.preprocess.clone();
        opts.dedupe = self.dedupe.clone();
        opts
    }

    /// Scratch directory of server wrappers.
    pub fn server_scratch_dir(&self) -> PathBuf {
        self.scratch_dir.join("server")
    }

    /// Scratch directory of browser entries.
    pub fn browser_scratch_dir(&self) -> PathBuf {
        self.scratch_dir.join("browser")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
