//! Node-backed evaluator.
//!
//! Keeps the compiled CommonJS module text in memory. `evaluate` links it
//! once in a `node` process to validate it; every render spawns `node`
//! with a small bootstrap that links the module again and calls
//! `default.render(context)`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::compiler::{Evaluator, ModuleSource, RenderContext, ViewComponent};
use crate::toolchain::OutputFormat;
use crate::RenderOutput;

/// Shared prelude: reads the JSON invocation from stdin and links the module text.
const PRELUDE: &str = r#"
function loadComponent(code, filename) {
    const Module = require('module');
    const mod = new Module(filename, module);
    mod.filename = filename;
    mod.paths = Module._nodeModulePaths(require('path').dirname(filename));
    mod._compile(code, filename);
    const component = mod.exports.default || mod.exports;
    if (!component || typeof component.render !== 'function') {
        throw new Error('compiled module does not export a render function');
    }
    return component;
}
function withInput(run) {
    const chunks = [];
    process.stdin.on('data', (chunk) => chunks.push(chunk));
    process.stdin.on('end', () => run(JSON.parse(Buffer.concat(chunks).toString('utf8'))));
}
"#;

const LOAD_MAIN: &str = r#"
withInput(({ code, filename }) => {
    loadComponent(code, filename);
    process.stdout.write('{}');
});
"#;

const RENDER_MAIN: &str = r#"
withInput(({ code, filename, context }) => {
    const out = loadComponent(code, filename).render(context);
    const css = out.css && typeof out.css === 'object' ? out.css.code : out.css;
    process.stdout.write(JSON.stringify({ html: out.html || '', head: out.head || '', css: css || '' }));
});
"#;

#[derive(Serialize)]
struct Invocation<'a> {
    code: &'a str,
    filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a RenderContext>,
}

/// Evaluates server modules with an external `node` binary.
///
/// `evaluate` links the module once so syntax errors, unresolved requires
/// and a missing `render` export fail the compile. Each render then runs
/// the module in a fresh `node` process.
#[derive(Debug, Clone)]
pub struct NodeEvaluator {
    node: PathBuf,
    source_map_support: Arc<AtomicBool>,
}

impl NodeEvaluator {
    pub fn new() -> Self {
        Self::with_node("node")
    }

    pub fn with_node(node: impl Into<PathBuf>) -> Self {
        Self {
            node: node.into(),
            source_map_support: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for NodeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Evaluator for NodeEvaluator {
    async fn evaluate(&self, module: ModuleSource) -> anyhow::Result<Arc<dyn ViewComponent>> {
        if module.format != OutputFormat::Cjs {
            bail!("node evaluator only loads CommonJS modules, got {:?}", module.format);
        }

        let component = NodeComponent {
            node: self.node.clone(),
            enable_source_maps: self.source_map_support.load(Ordering::SeqCst),
            module,
        };
        component
            .run(LOAD_MAIN, None)
            .await
            .context("failed to load compiled module")?;
        debug!(module = %component.module.path.display(), "module loaded");

        Ok(Arc::new(component))
    }

    fn install_source_map_support(&self) {
        self.source_map_support.store(true, Ordering::SeqCst);
    }
}

struct NodeComponent {
    node: PathBuf,
    enable_source_maps: bool,
    module: ModuleSource,
}

impl NodeComponent {
    /// Run `main` after the prelude with the module (and `context`) on stdin.
    async fn run(&self, main: &str, context: Option<&RenderContext>) -> anyhow::Result<Vec<u8>> {
        let payload = serde_json::to_vec(&Invocation {
            code: &self.module.code,
            filename: self.module.path.to_string_lossy().into_owned(),
            context,
        })?;

        let mut command = Command::new(&self.node);
        if self.enable_source_maps {
            command.arg("--enable-source-maps");
        }
        command
            .arg("-e")
            .arg(format!("{}{}", PRELUDE, main))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.node.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(anyhow!(
                "node exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl ViewComponent for NodeComponent {
    async fn render(&self, context: &RenderContext) -> anyhow::Result<RenderOutput> {
        debug!(module = %self.module.path.display(), "rendering with node");
        let stdout = self.run(RENDER_MAIN, Some(context)).await?;
        serde_json::from_slice(&stdout).context("invalid render output JSON")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
