//! Server compilation and evaluation.
//!
//! This module drives the compile pipeline for one wrapped view:
//! 1. Build a server-target [`ToolchainRequest`] (replacements, Svelte
//!    options, dedupe list, `$app/*` virtual modules)
//! 2. Run the toolchain and require exactly one executable chunk
//! 3. Append an inline source map in dev mode
//! 4. Evaluate the module text into a live [`ViewComponent`]
//! 5. Memoize the result by [`CacheKey`] when caching is enabled
//!
//! Concurrent first requests for the same key may compile twice; the cache
//! write is last-write-wins with equivalent values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::app_modules;
use crate::toolchain::{
    OutputArtifact, OutputFormat, SvelteOptions, Target, Toolchain, ToolchainRequest,
    FRAMEWORK_DEDUPE,
};
use crate::{CompileError, RenderOutput};

// ---------------------------------------------------------------------------
// Render seam
// ---------------------------------------------------------------------------

/// Asset information exposed to views through the `global.assets` context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalAssets {
    pub host: String,
    pub scripts: BTreeMap<String, String>,
    pub styles: BTreeMap<String, String>,
}

/// Props handed to the wrapper component's `render`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext {
    pub global_assets: GlobalAssets,
    pub global_props: Value,
    pub global_store: Value,
    pub props: Value,
}

/// A live, invocable compiled view.
#[async_trait]
pub trait ViewComponent: Send + Sync {
    async fn render(&self, context: &RenderContext) -> anyhow::Result<RenderOutput>;
}

/// Generated module text ready for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    /// The wrapper the module was compiled from.
    pub path: PathBuf,
    pub code: String,
    pub format: OutputFormat,
}

/// Loads generated module text into a callable.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, module: ModuleSource) -> anyhow::Result<Arc<dyn ViewComponent>>;

    /// One-time source map / debugger registration, called before the first
    /// dev-mode evaluation.
    fn install_source_map_support(&self) {}
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Compile settings for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    pub env: String,
    pub dev: bool,
    pub cache: bool,
    pub hydratable: bool,
    pub replace: BTreeMap<String, String>,
    pub preprocess: Vec<String>,
    pub dedupe: Vec<String>,
}

impl CompileOptions {
    /// Options for `env` with the derived defaults: dev for development and
    /// testing, cache when not dev, hydratable.
    pub fn for_env(env: impl Into<String>) -> Self {
        let env = env.into();
        let dev = is_dev_env(&env);
        Self {
            env,
            dev,
            cache: !dev,
            hydratable: true,
            replace: BTreeMap::new(),
            preprocess: Vec::new(),
            dedupe: Vec::new(),
        }
    }

    /// The server-target toolchain request for `entry`.
    pub fn server_request(&self, entry: &Path) -> ToolchainRequest {
        let mut replace = BTreeMap::new();
        replace.insert("process.browser".to_string(), "false".to_string());
        replace.insert("process.env.NODE_ENV".to_string(), format!("'{}'", self.env));
        replace.extend(self.replace.clone());

        ToolchainRequest {
            entry: entry.to_path_buf(),
            target: Target::Server,
            format: OutputFormat::Cjs,
            replace,
            preprocess: self.preprocess.clone(),
            svelte: SvelteOptions::new(Target::Server, self.dev, self.hydratable),
            dedupe: dedupe_list(&self.dedupe),
            virtual_modules: app_modules::virtual_modules(&self.env, false),
            sourcemap: self.dev,
            output_name: None,
            legacy: false,
        }
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::for_env("development")
    }
}

pub fn is_dev_env(env: &str) -> bool {
    env == "development" || env == "testing"
}

/// Framework packages followed by `extra`, without duplicates.
pub fn dedupe_list(extra: &[String]) -> Vec<String> {
    let mut list: Vec<String> = FRAMEWORK_DEDUPE.iter().map(|s| s.to_string()).collect();
    for name in extra {
        if !list.contains(name) {
            list.push(name.clone());
        }
    }
    list
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Identity of a compiled view. Only `hydratable` can vary per request once
/// the engine is installed, so it is the only option in the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub hydratable: bool,
}

/// A compiled, evaluated view. Never mutated after creation.
pub struct CompiledView {
    pub component: Arc<dyn ViewComponent>,
    /// CSS collected by the toolchain.
    pub css: String,
}

impl std::fmt::Debug for CompiledView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledView")
            .field("css", &self.css)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Compiles wrapped views and owns the compiled-artifact cache.
pub struct Compiler {
    toolchain: Arc<dyn Toolchain>,
    evaluator: Arc<dyn Evaluator>,
    cache: DashMap<CacheKey, Arc<CompiledView>>,
    source_maps_installed: AtomicBool,
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Compiler {
    pub fn new(toolchain: Arc<dyn Toolchain>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            toolchain,
            evaluator,
            cache: DashMap::new(),
            source_maps_installed: AtomicBool::new(false),
        }
    }

    /// Drop every compiled view.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of cached compiled views.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Compile the wrapper at `path`, or return the cached artifact.
    pub async fn compile(
        &self,
        path: &Path,
        opts: &CompileOptions,
    ) -> Result<Arc<CompiledView>, CompileError> {
        let key = CacheKey {
            path: path.to_path_buf(),
            hydratable: opts.hydratable,
        };

        if opts.cache {
            if let Some(hit) = self.cache.get(&key) {
                debug!(path = %path.display(), hydratable = opts.hydratable, "compile cache hit");
                return Ok(Arc::clone(hit.value()));
            }
        }

        debug!(path = %path.display(), hydratable = opts.hydratable, dev = opts.dev, "compiling view");

        let request = opts.server_request(path);
        let built = self.toolchain.build(&request).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "toolchain failed");
            CompileError::Toolchain(e)
        })?;

        let (code, map) = single_chunk(built.output)?;

        let code = match (opts.dev, map) {
            (true, Some(map)) => with_inline_source_map(&code, &map),
            (_, _) => code,
        };

        if opts.dev && !self.source_maps_installed.swap(true, Ordering::SeqCst) {
            self.evaluator.install_source_map_support();
        }

        let component = self
            .evaluator
            .evaluate(ModuleSource {
                path: path.to_path_buf(),
                code,
                format: request.format,
            })
            .await
            .map_err(CompileError::Evaluate)?;

        let compiled = Arc::new(CompiledView {
            component,
            css: built.css,
        });

        if opts.cache {
            self.cache.insert(key, Arc::clone(&compiled));
        }

        Ok(compiled)
    }
}

/// Require exactly one executable chunk.
fn single_chunk(output: Vec<OutputArtifact>) -> Result<(String, Option<String>), CompileError> {
    if output.len() != 1 {
        return Err(CompileError::InvalidOutputLength {
            count: output.len(),
        });
    }

    match output.into_iter().next() {
        Some(OutputArtifact::Chunk { code, map, .. }) => Ok((code, map)),
        Some(OutputArtifact::Asset { file_name, .. }) => {
            Err(CompileError::InvalidOutputType { file_name })
        }
        None => Err(CompileError::InvalidOutputLength { count: 0 }),
    }
}

/// Append `map` as a base64 data-URL source map comment.
pub fn with_inline_source_map(code: &str, map: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(map.as_bytes());
    format!(
        "{}\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,{}",
        code, encoded
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
