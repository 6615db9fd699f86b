//! Render orchestration.
//!
//! One render call runs `LOOKUP → WRAP → COMPILE → RENDER → TEMPLATE → SEND`.
//! Each stage consumes the previous stage's output; a failure in any stage
//! stops the call and is reported through the host's error seam by
//! [`ViewEngine::render_view`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::compiler::{CompileOptions, Compiler, Evaluator, GlobalAssets, RenderContext};
use crate::config::ViewEngineConfig;
use crate::host::{Locals, Scopes, ViewHost};
use crate::manifest::{self, BundleManifest};
use crate::props::{self, GLOBAL_PROPS_KEY, GLOBAL_STORE_KEY};
use crate::template::{HtmlTemplate, TemplateData};
use crate::toolchain::Toolchain;
use crate::wrapper::ViewWrapper;
use crate::{locator, utils, RenderOutput, ViewError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Lookup,
    Wrap,
    Compile,
    Render,
    Template,
    Send,
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lookup => "lookup",
            Self::Wrap => "wrap",
            Self::Compile => "compile",
            Self::Render => "render",
            Self::Template => "template",
            Self::Send => "send",
        };
        f.write_str(name)
    }
}

/// Per-call render inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// View-local props.
    pub props: Value,
    /// Call-supplied global props, always serialized.
    pub global_props: Locals,
    /// Call-supplied global store values, always serialized.
    pub global_store: Locals,
    /// Overrides the process-wide compile cache flag.
    pub cache: Option<bool>,
    /// Overrides the process-wide hydratable flag.
    pub hydratable: Option<bool>,
    /// HTML template source used instead of the installed one.
    pub template: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            props: Value::Object(Map::new()),
            global_props: Locals::new(),
            global_store: Locals::new(),
            cache: None,
            hydratable: None,
            template: None,
        }
    }
}

impl RenderOptions {
    pub fn with_props(mut self, props: Value) -> Self {
        self.props = props;
        self
    }

    pub fn with_global_store(mut self, store: Locals) -> Self {
        self.global_store = store;
        self
    }

    pub fn with_global_props(mut self, props: Locals) -> Self {
        self.global_props = props;
        self
    }
}

fn failed(view: &str, stage: RenderStage, err: ViewError) -> ViewError {
    warn!(view, stage = %stage, code = err.code(), error = %err, "render failed");
    err
}

// ---------------------------------------------------------------------------
// ViewEngine
// ---------------------------------------------------------------------------

/// The installed view engine. Owns the process-wide manifest, wrapper memo
/// and compile cache.
#[derive(Debug)]
pub struct ViewEngine {
    config: ViewEngineConfig,
    roots: Vec<PathBuf>,
    defaults: CompileOptions,
    manifest: BundleManifest,
    assets: GlobalAssets,
    wrapper: ViewWrapper,
    compiler: Compiler,
    template: HtmlTemplate,
}

impl ViewEngine {
    /// Install the engine: build the bundle manifest (a malformed pattern
    /// fails here), reset the wrapper scratch directory and load the HTML
    /// template.
    pub async fn install(
        config: ViewEngineConfig,
        toolchain: Arc<dyn Toolchain>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self, ViewError> {
        let bundle_dirs = manifest::bundle_dirs(&config.bundles_dirs);
        let manifest = BundleManifest::build(&bundle_dirs, &config.bundles_pattern)?;

        let assets = GlobalAssets {
            host: config.bundles_host.clone(),
            scripts: manifest.scripts.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            styles: manifest.styles.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };

        let wrapper = ViewWrapper::new(
            locator::absolute(&config.server_scratch_dir()),
            config.wrapper_template_path.clone(),
        );
        wrapper.reset().await?;

        let template = match &config.template_path {
            Some(path) => HtmlTemplate::from_file(path).await?,
            None => HtmlTemplate::default(),
        };

        let roots = config.views_dirs.iter().map(|d| locator::absolute(d)).collect();
        let defaults = config.compile_defaults();

        info!(
            env = %defaults.env,
            dev = defaults.dev,
            cache = defaults.cache,
            scratch = %wrapper.scratch_dir().display(),
            "view engine installed"
        );

        Ok(Self {
            config,
            roots,
            defaults,
            manifest,
            assets,
            wrapper,
            compiler: Compiler::new(toolchain, evaluator),
            template,
        })
    }

    pub fn config(&self) -> &ViewEngineConfig {
        &self.config
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn wrapper(&self) -> &ViewWrapper {
        &self.wrapper
    }

    /// Absolute view roots, in lookup order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Manifest key of a resolved view.
    pub fn manifest_key(&self, view_path: &Path) -> String {
        locator::manifest_key(view_path, &self.roots)
    }

    /// Forget every wrapper and compiled view.
    pub async fn clear(&self) -> Result<(), ViewError> {
        self.wrapper.reset().await?;
        self.compiler.clear();
        debug!("view engine caches cleared");
        Ok(())
    }

    /// Render `name` to a complete HTML document.
    pub async fn render(
        &self,
        name: &str,
        opts: &RenderOptions,
        scopes: &Scopes<'_>,
    ) -> Result<String, ViewError> {
        // LOOKUP
        let path = locator::lookup(name, &self.roots, &self.config.extension)
            .await
            .ok_or_else(|| ViewError::Lookup {
                name: name.to_string(),
                roots: self.roots.clone(),
            })
            .map_err(|e| failed(name, RenderStage::Lookup, e))?;
        debug!(view = name, path = %path.display(), "view resolved");

        // WRAP
        let wrapped = self
            .wrapper
            .create_wrapped_view(&path)
            .await
            .map_err(|e| failed(name, RenderStage::Wrap, e))?;

        // COMPILE
        let mut compile_opts = self.defaults.clone();
        if let Some(cache) = opts.cache {
            compile_opts.cache = cache;
        }
        if let Some(hydratable) = opts.hydratable {
            compile_opts.hydratable = hydratable;
        }
        let compiled = self
            .compiler
            .compile(&wrapped, &compile_opts)
            .await
            .map_err(|e| failed(name, RenderStage::Compile, ViewError::compile(&wrapped, e)))?;

        // RENDER
        let global_props = props::build_serialized(GLOBAL_PROPS_KEY, scopes, &opts.global_props);
        let global_store = props::build_serialized(GLOBAL_STORE_KEY, scopes, &opts.global_store);
        let context = RenderContext {
            global_assets: self.assets.clone(),
            global_props: Value::Object(global_props),
            global_store: Value::Object(global_store),
            props: opts.props.clone(),
        };
        let output = compiled
            .component
            .render(&context)
            .await
            .map_err(|e| failed(name, RenderStage::Render, ViewError::render(name, e)))?;

        // TEMPLATE
        let key = self.manifest_key(&path);
        let data = self
            .template_data(&key, output, &compiled.css, &context, compile_opts.hydratable)
            .map_err(|e| failed(name, RenderStage::Template, e))?;

        let body = match &opts.template {
            Some(source) => HtmlTemplate::new(source.as_str())
                .map_err(|e| failed(name, RenderStage::Template, e))?
                .render(&data),
            None => self.template.render(&data),
        };

        debug!(view = name, key = %key, bytes = body.len(), "view rendered");
        Ok(body)
    }

    /// Render `name` and hand the result to `host`: the body is sent, or the
    /// error forwarded to the host's error handler.
    pub async fn render_view(&self, name: &str, opts: &RenderOptions, host: &mut dyn ViewHost) {
        let result = self.render(name, opts, &host.scopes()).await;
        match result {
            Ok(body) => {
                debug!(view = name, stage = %RenderStage::Send, "sending response");
                host.send(body);
            }
            Err(err) => host.forward_error(err),
        }
    }

    fn template_data(
        &self,
        key: &str,
        output: RenderOutput,
        collected_css: &str,
        context: &RenderContext,
        hydratable: bool,
    ) -> Result<TemplateData, ViewError> {
        let css = [output.css.as_str(), collected_css]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");

        let mut style = String::new();
        if let Some(href) = self.manifest.view_style(key) {
            style.push_str(&format!(
                "<link rel=\"stylesheet\" href=\"{}\">",
                utils::escape_html_attr(&utils::join_url(&self.config.bundles_host, href))
            ));
        }
        if !css.is_empty() {
            style.push_str(&format!("<style>{}</style>", css));
        }

        // Static renders ship neither state nor bundles.
        if !hydratable {
            return Ok(TemplateData {
                head: output.head,
                style,
                html: output.html,
                hydratable,
                ..Default::default()
            });
        }

        let to_json = |value: &Value| {
            utils::to_script_json(value)
                .map_err(|e| ViewError::Template(format!("Failed to serialize hydration state: {}", e)))
        };
        let global_props = to_json(&context.global_props)?;
        let global_store = to_json(&context.global_store)?;
        let props = to_json(&context.props)?;
        let global_assets = utils::to_script_json(&context.global_assets)
            .map_err(|e| ViewError::Template(format!("Failed to serialize hydration state: {}", e)))?;

        let host = &self.config.bundles_host;
        let script_modern = self
            .manifest
            .modern_script(key)
            .map(|asset| utils::join_url(host, asset))
            .unwrap_or_default();
        let script_legacy = if self.config.legacy {
            self.manifest
                .legacy_script(key)
                .map(|asset| utils::join_url(host, asset))
                .unwrap_or_default()
        } else {
            String::new()
        };

        let state = hydration_state(&global_props, &global_store, &global_assets, &props);
        let script = hydration_script(&state, &script_modern, &script_legacy);

        Ok(TemplateData {
            head: output.head,
            style,
            html: output.html,
            global_props,
            global_store,
            props,
            script,
            script_modern,
            script_legacy,
            hydratable,
        })
    }
}

/// Inline script publishing the serialized render context to the client entry.
fn hydration_state(global_props: &str, global_store: &str, global_assets: &str, props: &str) -> String {
    format!(
        "<script>window._GLOBAL_PROPS_ = {};window._GLOBAL_STORE_ = {};window._GLOBAL_ASSETS_ = {};window._PROPS_ = {};</script>",
        global_props, global_store, global_assets, props
    )
}

/// Hydration state followed by the client bundle tags.
fn hydration_script(state: &str, modern: &str, legacy: &str) -> String {
    let mut script = state.to_string();

    match (modern.is_empty(), legacy.is_empty()) {
        (false, false) => {
            script.push_str(&format!(
                "<script type=\"module\" src=\"{}\"></script><script nomodule src=\"{}\"></script>",
                utils::escape_html_attr(modern),
                utils::escape_html_attr(legacy)
            ));
        }
        (false, true) => {
            script.push_str(&format!(
                "<script defer src=\"{}\"></script>",
                utils::escape_html_attr(modern)
            ));
        }
        (true, false) => {
            script.push_str(&format!(
                "<script defer src=\"{}\"></script>",
                utils::escape_html_attr(legacy)
            ));
        }
        (true, true) => {}
    }

    script
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hydration_script_modern_and_legacy() {
        let script = hydration_script("", "/dist/Page-modern-aaaa1111.js", "/dist/Page-legacy-bbbb2222.js");
        assert!(script.contains("<script type=\"module\" src=\"/dist/Page-modern-aaaa1111.js\"></script>"));
        assert!(script.contains("<script nomodule src=\"/dist/Page-legacy-bbbb2222.js\"></script>"));
    }

    #[test]
    fn test_hydration_script_single_bundle() {
        let state = hydration_state("{}", "{\"count\":0}", "{}", "{}");
        let script = hydration_script(&state, "/Page-deadbeef.js", "");
        assert!(script.contains("window._GLOBAL_STORE_ = {\"count\":0};"));
        assert!(script.ends_with("<script defer src=\"/Page-deadbeef.js\"></script>"));
        assert!(!script.contains("nomodule"));
    }

    #[test]
    fn test_hydration_script_without_bundles_keeps_state() {
        let state = hydration_state("{}", "{}", "{\"host\":\"/dist\"}", "{\"a\":1}");
        let script = hydration_script(&state, "", "");
        assert!(script.contains("window._GLOBAL_ASSETS_ = {\"host\":\"/dist\"};"));
        assert!(script.contains("window._PROPS_ = {\"a\":1};"));
        assert!(!script.contains("src="));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(RenderStage::Compile.to_string(), "compile");
        assert_eq!(RenderStage::Send.to_string(), "send");
    }

    #[test]
    fn test_default_options_have_object_props() {
        assert_eq!(RenderOptions::default().props, Value::Object(Map::new()));
    }
}
