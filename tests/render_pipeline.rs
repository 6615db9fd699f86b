use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use svelte_view_engine::{
    BufferedHost, CodedError, Evaluator, Locals, ModuleSource, OutputArtifact, RenderContext,
    RenderOptions, RenderOutput, Toolchain, ToolchainOutput, ToolchainRequest, ViewComponent,
    ViewEngine, ViewEngineConfig, ViewError, ViewHost,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct MockToolchain {
    chunks: usize,
    calls: AtomicUsize,
}

impl MockToolchain {
    fn new(chunks: usize) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Toolchain for MockToolchain {
    async fn build(&self, request: &ToolchainRequest) -> anyhow::Result<ToolchainOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let output = (0..self.chunks)
            .map(|_| OutputArtifact::Chunk {
                file_name: "view.js".to_string(),
                code: format!("// {}", request.entry.display()),
                map: None,
            })
            .collect();
        Ok(ToolchainOutput {
            output,
            css: String::new(),
        })
    }
}

/// Renders `props.value` and records the context it was given.
#[derive(Default)]
struct PageComponent {
    last_context: Mutex<Option<RenderContext>>,
}

#[async_trait]
impl ViewComponent for PageComponent {
    async fn render(&self, context: &RenderContext) -> anyhow::Result<RenderOutput> {
        *self.last_context.lock().unwrap() = Some(context.clone());

        if context.props.get("explode").is_some() {
            anyhow::bail!("missing required prop");
        }
        if context.props.get("coded").is_some() {
            return Err(CodedError::new("E_PAGE", "page refused").into());
        }

        let value = context.props.get("value").and_then(Value::as_str).unwrap_or("");
        Ok(RenderOutput {
            html: format!("<div class=\"page\">{}</div>", value),
            head: "<title>Page</title>".to_string(),
            css: ".page{margin:0}".to_string(),
        })
    }
}

struct MockEvaluator {
    component: Arc<PageComponent>,
}

#[async_trait]
impl Evaluator for MockEvaluator {
    async fn evaluate(&self, _module: ModuleSource) -> anyhow::Result<Arc<dyn ViewComponent>> {
        Ok(self.component.clone())
    }
}

struct Fixture {
    dir: TempDir,
    toolchain: Arc<MockToolchain>,
    component: Arc<PageComponent>,
    engine: ViewEngine,
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
}

fn base_config(dir: &Path) -> ViewEngineConfig {
    ViewEngineConfig {
        views_dirs: vec![dir.join("views")],
        bundles_dirs: vec![dir.join("public/dist")],
        bundles_host: "/public/dist".to_string(),
        env: Some("production".to_string()),
        scratch_dir: dir.join(".svelte-view-engine"),
        ..Default::default()
    }
}

/// Views `Page` and `blog/Post`, bundle `Page-deadbeef.js`.
async fn fixture_with(chunks: usize, configure: impl FnOnce(&mut ViewEngineConfig)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("views/Page.svelte"), "<div>{value}</div>");
    write(&dir.path().join("views/blog/Post.svelte"), "<article />");
    write(&dir.path().join("public/dist/Page-deadbeef.js"), "");

    let mut config = base_config(dir.path());
    configure(&mut config);

    let toolchain = MockToolchain::new(chunks);
    let component = Arc::new(PageComponent::default());
    let engine = ViewEngine::install(
        config,
        toolchain.clone(),
        Arc::new(MockEvaluator {
            component: component.clone(),
        }),
    )
    .await
    .unwrap();

    Fixture {
        dir,
        toolchain,
        component,
        engine,
    }
}

async fn fixture() -> Fixture {
    fixture_with(1, |_| {}).await
}

fn locals(value: Value) -> Locals {
    value.as_object().cloned().unwrap_or_default()
}

fn page_options() -> RenderOptions {
    RenderOptions::default()
        .with_props(json!({ "value": "X" }))
        .with_global_store(locals(json!({ "count": 0 })))
}

// ===========================================================================
// End-to-end
// ===========================================================================

#[tokio::test]
async fn renders_page_with_hydration_state() {
    let fx = fixture().await;
    let mut host = BufferedHost::new();

    fx.engine.render_view("Page", &page_options(), &mut host).await;
    let body = host.into_result().unwrap();

    assert!(body.contains("<div class=\"page\">X</div>"));
    assert!(body.contains("<title>Page</title>"));
    assert!(body.contains("<script defer src=\"/public/dist/Page-deadbeef.js\"></script>"));
    assert!(body.contains("window._GLOBAL_STORE_ = {\"count\":0};"));
    assert!(body.contains("window._PROPS_ = {\"value\":\"X\"};"));
    assert!(body.contains("window._GLOBAL_ASSETS_ = {\"host\":\"/public/dist\","));
    assert!(body.contains("<style>.page{margin:0}</style>"));
}

#[tokio::test]
async fn render_context_carries_assets_and_serialized_globals() {
    let fx = fixture().await;
    let mut host = BufferedHost::new().with_app_locals(locals(json!({
        "globalProps": { "user": "ada", "secret": "hunter2", "$serialized": ["user"] }
    })));

    fx.engine.render_view("Page", &page_options(), &mut host).await;
    let body = host.into_result().unwrap();

    let context = fx.component.last_context.lock().unwrap().clone().unwrap();
    assert_eq!(context.global_props, json!({ "user": "ada" }));
    assert_eq!(context.global_store, json!({ "count": 0 }));
    assert_eq!(context.global_assets.host, "/public/dist");
    assert_eq!(
        context.global_assets.scripts.get("Page").map(String::as_str),
        Some("Page-deadbeef.js")
    );
    assert!(!body.contains("hunter2"));
}

#[tokio::test]
async fn nested_view_without_bundle_renders_state_only() {
    let fx = fixture().await;
    let mut host = BufferedHost::new();

    fx.engine.render_view("blog/Post", &RenderOptions::default(), &mut host).await;
    let body = host.into_result().unwrap();

    assert!(body.contains("window._PROPS_ = {};"));
    assert!(!body.contains("src="));
}

#[tokio::test]
async fn modern_and_legacy_bundles_and_stylesheet() {
    let fx = fixture_with(1, |_| {}).await;
    let dist = fx.dir.path().join("public/dist");
    write(&dist.join("blog/Post-modern-aaaa1111.js"), "");
    write(&dist.join("blog/Post-legacy-bbbb2222.js"), "");
    write(&dist.join("blog/Post-modern-aaaa1111.css"), "");

    // The manifest is read at install time.
    let config = fx.engine.config().clone();
    let engine = ViewEngine::install(
        config,
        fx.toolchain.clone(),
        Arc::new(MockEvaluator {
            component: fx.component.clone(),
        }),
    )
    .await
    .unwrap();

    let mut host = BufferedHost::new();
    engine.render_view("blog/Post", &RenderOptions::default(), &mut host).await;
    let body = host.into_result().unwrap();

    assert!(body.contains(
        "<script type=\"module\" src=\"/public/dist/blog/Post-modern-aaaa1111.js\"></script>"
    ));
    assert!(body.contains("<script nomodule src=\"/public/dist/blog/Post-legacy-bbbb2222.js\"></script>"));
    assert!(body.contains(
        "<link rel=\"stylesheet\" href=\"/public/dist/blog/Post-modern-aaaa1111.css\">"
    ));
}

#[tokio::test]
async fn legacy_disabled_omits_nomodule_script() {
    let fx = fixture_with(1, |config| config.legacy = false).await;
    write(&fx.dir.path().join("public/dist/Page-legacy-bbbb2222.js"), "");

    let engine = ViewEngine::install(
        fx.engine.config().clone(),
        fx.toolchain.clone(),
        Arc::new(MockEvaluator {
            component: fx.component.clone(),
        }),
    )
    .await
    .unwrap();

    let mut host = BufferedHost::new();
    engine.render_view("Page", &page_options(), &mut host).await;
    let body = host.into_result().unwrap();
    assert!(!body.contains("nomodule"));
}

#[tokio::test]
async fn non_hydratable_render_has_no_scripts() {
    let fx = fixture().await;
    let opts = RenderOptions {
        hydratable: Some(false),
        ..page_options()
    };

    let mut host = BufferedHost::new();
    fx.engine.render_view("Page", &opts, &mut host).await;
    let body = host.into_result().unwrap();

    assert!(body.contains("<div class=\"page\">X</div>"));
    assert!(!body.contains("window._PROPS_"));
    assert!(!body.contains("<script"));
}

#[tokio::test]
async fn non_hydratable_render_leaves_state_placeholders_empty() {
    let fx = fixture().await;
    let opts = RenderOptions {
        hydratable: Some(false),
        template: Some(
            "${html}|${scriptModern}|${scriptLegacy}|${props}|${globalProps}|${globalStore}|${script}|${hydratable}"
                .to_string(),
        ),
        ..RenderOptions::default()
            .with_props(json!({ "value": "X", "secret": "s" }))
            .with_global_store(locals(json!({ "count": 0 })))
    };

    let host = BufferedHost::new();
    let body = fx.engine.render("Page", &opts, &host.scopes()).await.unwrap();

    assert_eq!(body, "<div class=\"page\">X</div>|||||||false");
}

#[tokio::test]
async fn hydratable_render_fills_state_placeholders() {
    let fx = fixture().await;
    let opts = RenderOptions {
        template: Some("${html}|${scriptModern}|${props}|${globalStore}".to_string()),
        ..page_options()
    };

    let host = BufferedHost::new();
    let body = fx.engine.render("Page", &opts, &host.scopes()).await.unwrap();

    assert_eq!(
        body,
        "<div class=\"page\">X</div>|/public/dist/Page-deadbeef.js|{\"value\":\"X\"}|{\"count\":0}"
    );
}

#[tokio::test]
async fn per_call_template_override() {
    let fx = fixture().await;
    let opts = RenderOptions {
        template: Some("<main>${html}</main>".to_string()),
        ..page_options()
    };

    let host = BufferedHost::new();
    let body = fx.engine.render("Page", &opts, &host.scopes()).await;
    assert_eq!(body.unwrap(), "<main><div class=\"page\">X</div></main>");
}

#[tokio::test]
async fn template_file_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("layout.html");
    write(&template, "<body data-hydrate=\"${hydratable}\">${html}</body>");

    let fx = fixture_with(1, |config| config.template_path = Some(template.clone())).await;
    let mut host = BufferedHost::new();
    fx.engine.render_view("Page", &page_options(), &mut host).await;

    assert_eq!(
        host.into_result().unwrap(),
        "<body data-hydrate=\"true\"><div class=\"page\">X</div></body>"
    );
}

// ===========================================================================
// Caching
// ===========================================================================

#[tokio::test]
async fn repeated_renders_compile_once() {
    let fx = fixture().await;

    for _ in 0..3 {
        let mut host = BufferedHost::new();
        fx.engine.render_view("Page", &page_options(), &mut host).await;
        assert!(host.into_result().is_ok());
    }

    assert_eq!(fx.toolchain.calls(), 1);
    assert_eq!(fx.engine.wrapper().len(), 1);
}

#[tokio::test]
async fn per_call_cache_override_recompiles() {
    let fx = fixture().await;
    let opts = RenderOptions {
        cache: Some(false),
        ..page_options()
    };

    for _ in 0..2 {
        let mut host = BufferedHost::new();
        fx.engine.render_view("Page", &opts, &mut host).await;
        assert!(host.into_result().is_ok());
    }

    assert_eq!(fx.toolchain.calls(), 2);
    assert!(fx.engine.compiler().is_empty());
}

#[tokio::test]
async fn clear_resets_wrappers_and_compiled_views() {
    let fx = fixture().await;
    let mut host = BufferedHost::new();
    fx.engine.render_view("Page", &page_options(), &mut host).await;

    fx.engine.clear().await.unwrap();
    assert!(fx.engine.wrapper().is_empty());
    assert!(fx.engine.compiler().is_empty());

    let mut host = BufferedHost::new();
    fx.engine.render_view("Page", &page_options(), &mut host).await;
    assert_eq!(fx.toolchain.calls(), 2);
}

// ===========================================================================
// Errors
// ===========================================================================

#[tokio::test]
async fn lookup_failure_is_forwarded() {
    let fx = fixture().await;
    let mut host = BufferedHost::new();

    fx.engine.render_view("Missing", &page_options(), &mut host).await;

    assert!(host.body.is_none());
    let err = host.into_result().unwrap_err();
    assert_eq!(err.code(), "SVELTE_VIEW_LOOKUP");
    assert!(matches!(err, ViewError::Lookup { ref name, .. } if name == "Missing"));
    assert_eq!(fx.toolchain.calls(), 0);
}

#[tokio::test]
async fn compile_failure_keeps_output_code() {
    let fx = fixture_with(2, |_| {}).await;
    let mut host = BufferedHost::new();

    fx.engine.render_view("Page", &page_options(), &mut host).await;

    let err = host.into_result().unwrap_err();
    assert_eq!(err.code(), "SVELTE_VIEW_COMPILE_OUTPUT_INVALID_LENGTH");
    assert!(fx.engine.compiler().is_empty());
}

#[tokio::test]
async fn render_failure_gets_default_code() {
    let fx = fixture().await;
    let opts = RenderOptions::default().with_props(json!({ "explode": true }));
    let mut host = BufferedHost::new();

    fx.engine.render_view("Page", &opts, &mut host).await;

    let err = host.into_result().unwrap_err();
    assert_eq!(err.code(), "SVELTE_VIEW_RENDER");
    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), "missing required prop");
}

#[tokio::test]
async fn render_failure_keeps_component_code() {
    let fx = fixture().await;
    let opts = RenderOptions::default().with_props(json!({ "coded": true }));
    let mut host = BufferedHost::new();

    fx.engine.render_view("Page", &opts, &mut host).await;

    assert_eq!(host.into_result().unwrap_err().code(), "E_PAGE");
}

#[tokio::test]
async fn malformed_bundle_pattern_fails_install() {
    let dir = tempfile::tempdir().unwrap();
    let config = ViewEngineConfig {
        bundles_pattern: "name-[hash]".to_string(),
        ..base_config(dir.path())
    };

    let result = ViewEngine::install(
        config,
        MockToolchain::new(1),
        Arc::new(MockEvaluator {
            component: Arc::new(PageComponent::default()),
        }),
    )
    .await;

    assert!(matches!(result, Err(ViewError::Configuration(_))));
}
