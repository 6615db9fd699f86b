//! Toolchain collaborator.
//!
//! The toolchain turns a component entry into bundled output: it applies
//! source replacements, compiles Svelte components for the requested
//! target, resolves and inlines dependencies (deduplicating the listed
//! packages) and emits the resulting chunks and assets.
//!
//! [`ProcessToolchain`] drives an external bundler process with a JSON
//! protocol: the [`ToolchainRequest`] is written to stdin and a
//! [`ToolchainOutput`] document is read back from stdout.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Framework packages that must only ever be linked once.
pub const FRAMEWORK_DEDUPE: &[&str] = &[
    "svelte",
    "svelte/animate",
    "svelte/easing",
    "svelte/internal",
    "svelte/motion",
    "svelte/store",
    "svelte/transition",
];

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Which runtime the output is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Server-side render output (`generate: "ssr"`), evaluated in-process.
    Server,
    /// Browser output (`generate: "dom"`), served as hydration bundles.
    Browser,
}

/// Module format of the emitted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Cjs,
    Esm,
    Iife,
}

/// Options forwarded to the Svelte compiler stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvelteOptions {
    pub generate: String,
    pub hydratable: bool,
    pub dev: bool,
    pub preserve_comments: bool,
    pub preserve_whitespace: bool,
    /// CSS is never injected by components; it is collected separately.
    pub css: bool,
}

impl SvelteOptions {
    pub fn new(target: Target, dev: bool, hydratable: bool) -> Self {
        Self {
            generate: match target {
                Target::Server => "ssr".to_string(),
                Target::Browser => "dom".to_string(),
            },
            hydratable,
            dev,
            preserve_comments: dev,
            preserve_whitespace: dev,
            css: false,
        }
    }
}

/// Everything the toolchain needs for one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolchainRequest {
    pub entry: PathBuf,
    pub target: Target,
    pub format: OutputFormat,
    /// Source replacements, applied before compiling.
    pub replace: BTreeMap<String, String>,
    /// Ordered preprocess stages, by name.
    pub preprocess: Vec<String>,
    pub svelte: SvelteOptions,
    /// Packages resolved to a single copy.
    pub dedupe: Vec<String>,
    /// Virtual modules, keyed by import specifier.
    pub virtual_modules: BTreeMap<String, String>,
    pub sourcemap: bool,
    /// Output file name (without extension) for browser builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    /// Transpile for older browsers.
    #[serde(default)]
    pub legacy: bool,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One emitted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputArtifact {
    /// Executable module.
    Chunk {
        #[serde(rename = "fileName")]
        file_name: String,
        code: String,
        /// Source map JSON, when sourcemaps were requested.
        #[serde(default)]
        map: Option<String>,
    },
    /// Non-executable asset.
    Asset {
        #[serde(rename = "fileName")]
        file_name: String,
        source: String,
    },
}

impl OutputArtifact {
    pub fn file_name(&self) -> &str {
        match self {
            Self::Chunk { file_name, .. } | Self::Asset { file_name, .. } => file_name,
        }
    }
}

/// Result of a toolchain build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainOutput {
    pub output: Vec<OutputArtifact>,
    /// CSS extracted from the components while compiling.
    #[serde(default)]
    pub css: String,
}

// ---------------------------------------------------------------------------
// Toolchain trait
// ---------------------------------------------------------------------------

/// The "compile source to chunk" collaborator.
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn build(&self, request: &ToolchainRequest) -> anyhow::Result<ToolchainOutput>;
}

// ---------------------------------------------------------------------------
// ProcessToolchain
// ---------------------------------------------------------------------------

/// Runs an external bundler command per build.
#[derive(Debug, Clone)]
pub struct ProcessToolchain {
    program: PathBuf,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
}

impl ProcessToolchain {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Toolchain for ProcessToolchain {
    async fn build(&self, request: &ToolchainRequest) -> anyhow::Result<ToolchainOutput> {
        let payload = serde_json::to_vec(request).context("failed to encode toolchain request")?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        debug!(program = %self.program.display(), entry = %request.entry.display(), "spawning toolchain");
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn toolchain '{}'", self.program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .context("failed to write toolchain request")?;
            stdin.shutdown().await.context("failed to close toolchain stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait for toolchain")?;

        if !output.status.success() {
            return Err(anyhow!(
                "toolchain exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        serde_json::from_slice(&output.stdout).context("invalid toolchain output JSON")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
