//! Browser entry synthesis.
//!
//! Produces the inputs of the client build that the bundle manifest later
//! reads: for each view under a views directory, a hydration entry script
//! at `<scratch>/<key>.js` and one toolchain request per client variant.
//! Output names follow the manifest's suffix convention, `<key>-modern` and
//! `<key>-legacy`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::compiler::{dedupe_list, CompileOptions};
use crate::config::DEFAULT_EXTENSION;
use crate::manifest::{LEGACY_SUFFIX, MODERN_SUFFIX};
use crate::toolchain::{OutputFormat, SvelteOptions, Target, ToolchainRequest};
use crate::wrapper::ViewWrapper;
use crate::{app_modules, locator, utils, ViewError};

/// One planned client build.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserBuild {
    /// Manifest key of the view.
    pub key: String,
    /// The generated entry script.
    pub input: PathBuf,
    /// Bundle name without hash or extension.
    pub output_name: String,
    pub legacy: bool,
    pub request: ToolchainRequest,
}

/// Writes browser entries and plans their builds.
#[derive(Debug)]
pub struct BrowserEntries {
    scratch_dir: PathBuf,
    extension: String,
    options: CompileOptions,
    legacy: bool,
    wrapper: ViewWrapper,
}

impl BrowserEntries {
    pub fn new(scratch_dir: impl Into<PathBuf>, options: CompileOptions, legacy: bool) -> Self {
        let scratch_dir: PathBuf = scratch_dir.into();
        let scratch_dir = locator::absolute(&scratch_dir);
        let wrapper = ViewWrapper::new(scratch_dir.join("wrappers"), None);
        Self {
            scratch_dir,
            extension: DEFAULT_EXTENSION.to_string(),
            options,
            legacy,
            wrapper,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Use a custom wrapper skeleton for the hydrated component.
    pub fn with_wrapper_template(mut self, template_path: PathBuf) -> Self {
        self.wrapper = ViewWrapper::new(self.scratch_dir.join("wrappers"), Some(template_path));
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Write an entry for every view under `views_dir` and return the build plan.
    ///
    /// The scratch directory is recreated first.
    pub async fn create(&self, views_dir: &Path) -> Result<Vec<BrowserBuild>, ViewError> {
        let views_dir = locator::absolute(views_dir);
        match tokio::fs::remove_dir_all(&self.scratch_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ViewError::io(&self.scratch_dir, e)),
        }
        self.wrapper.reset().await?;

        let mut builds = Vec::new();
        for view in self.views(&views_dir)? {
            let key = locator::manifest_key(&view, std::slice::from_ref(&views_dir));
            let wrapped = self.wrapper.create_wrapped_view(&view).await?;

            let input = self.scratch_dir.join(format!("{}.js", key));
            if let Some(parent) = input.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ViewError::io(parent, e))?;
            }
            tokio::fs::write(&input, entry_source(&wrapped))
                .await
                .map_err(|e| ViewError::io(&input, e))?;
            debug!(key = %key, entry = %input.display(), "browser entry written");

            builds.push(self.plan(&key, &input, false));
            if self.legacy {
                builds.push(self.plan(&key, &input, true));
            }
        }

        info!(views = %views_dir.display(), builds = builds.len(), "browser entries created");
        Ok(builds)
    }

    fn views(&self, views_dir: &Path) -> Result<Vec<PathBuf>, ViewError> {
        if !views_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut views = Vec::new();
        for entry in WalkDir::new(views_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| views_dir.to_path_buf());
                ViewError::io(path, e.into())
            })?;
            if entry.file_type().is_file()
                && entry.file_name().to_string_lossy().ends_with(&self.extension)
            {
                views.push(entry.into_path());
            }
        }
        Ok(views)
    }

    fn plan(&self, key: &str, input: &Path, legacy: bool) -> BrowserBuild {
        let suffix = if legacy { LEGACY_SUFFIX } else { MODERN_SUFFIX };
        let output_name = format!("{}{}", key, suffix);
        BrowserBuild {
            key: key.to_string(),
            input: input.to_path_buf(),
            output_name: output_name.clone(),
            legacy,
            request: browser_request(&self.options, input, output_name, legacy),
        }
    }
}

/// The browser-target toolchain request for `entry`.
pub fn browser_request(
    opts: &CompileOptions,
    entry: &Path,
    output_name: String,
    legacy: bool,
) -> ToolchainRequest {
    let mut replace = BTreeMap::new();
    replace.insert("process.browser".to_string(), "true".to_string());
    replace.insert("process.env.NODE_ENV".to_string(), format!("'{}'", opts.env));
    replace.extend(opts.replace.clone());

    ToolchainRequest {
        entry: entry.to_path_buf(),
        target: Target::Browser,
        format: OutputFormat::Iife,
        replace,
        preprocess: opts.preprocess.clone(),
        svelte: SvelteOptions::new(Target::Browser, opts.dev, true),
        dedupe: dedupe_list(&opts.dedupe),
        virtual_modules: app_modules::virtual_modules(&opts.env, true),
        sourcemap: opts.dev,
        output_name: Some(output_name),
        legacy,
    }
}

fn entry_source(wrapped: &Path) -> String {
    let specifier = utils::escape_js_string(&wrapped.to_string_lossy().replace('\\', "/"));
    format!(
        r#"import View from "{}";

const target = document.querySelector('.view-target') || document.body;

new View({{
    target,
    hydrate: true,
    props: {{
        globalProps: window._GLOBAL_PROPS_ || {{}},
        globalStore: window._GLOBAL_STORE_ || {{}},
        globalAssets: window._GLOBAL_ASSETS_ || {{}},
        props: window._PROPS_ || {{}},
    }},
}});
"#,
        specifier
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
