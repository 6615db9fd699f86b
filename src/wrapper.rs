//! Wrapped-view synthesis.
//!
//! Every view is rendered through a generated wrapper component that sets
//! the global context (props, store, assets) and then renders the view. The
//! wrapper is produced from a [`WrapperTemplate`] with exactly one import
//! slot; only the import binding differs between views.
//!
//! Wrappers are written to a scratch directory under random names and
//! memoized by source path, so each view is wrapped at most once until the
//! next [`ViewWrapper::reset`].

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app_modules::{
    CONTEXT_GLOBAL_ALLY, CONTEXT_GLOBAL_ASSETS, CONTEXT_GLOBAL_PROPS, CONTEXT_GLOBAL_STORE,
};
use crate::{utils, ViewError};

/// The marker a wrapper template must contain exactly once.
pub const IMPORT_SLOT: &str = "/* @view-import */";

// ---------------------------------------------------------------------------
// WrapperTemplate
// ---------------------------------------------------------------------------

/// A wrapper component skeleton split around its import slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperTemplate {
    prelude: String,
    epilogue: String,
}

impl WrapperTemplate {
    /// Parse a skeleton. The import slot must appear exactly once.
    pub fn parse(source: &str) -> Result<Self, ViewError> {
        let mut parts = source.split(IMPORT_SLOT);
        let prelude = parts.next().unwrap_or_default();
        let epilogue = parts.next().ok_or_else(|| {
            ViewError::Configuration(format!("Wrapper template has no {} slot", IMPORT_SLOT))
        })?;
        if parts.next().is_some() {
            return Err(ViewError::Configuration(format!(
                "Wrapper template has more than one {} slot",
                IMPORT_SLOT
            )));
        }

        Ok(Self {
            prelude: prelude.to_string(),
            epilogue: epilogue.to_string(),
        })
    }

    /// Fill the slot with the import bindings of `source_path`.
    ///
    /// Binds the default export as `component` and the module namespace as
    /// `ComponentStatic` (for module-level exports such as `preload`).
    pub fn render(&self, source_path: &Path) -> String {
        let specifier = utils::escape_js_string(&source_path.to_string_lossy().replace('\\', "/"));
        format!(
            "{}import component from \"{spec}\";\n    import * as ComponentStatic from \"{spec}\";{}",
            self.prelude,
            self.epilogue,
            spec = specifier
        )
    }
}

impl Default for WrapperTemplate {
    fn default() -> Self {
        let source = format!(
            r#"<script>
    import {{ setContext }} from 'svelte';
    {slot}

    export let globalProps = {{}};
    export let globalStore = {{}};
    export let globalAssets = {{}};
    export let props = {{}};

    setContext('{props_key}', globalProps);
    setContext('{store_key}', globalStore);
    setContext('{assets_key}', globalAssets);
    setContext('{ally_key}', {{}});
</script>

<svelte:component this={{component}} {{...props}} />
"#,
            slot = IMPORT_SLOT,
            props_key = CONTEXT_GLOBAL_PROPS,
            store_key = CONTEXT_GLOBAL_STORE,
            assets_key = CONTEXT_GLOBAL_ASSETS,
            ally_key = CONTEXT_GLOBAL_ALLY,
        );
        // The built-in skeleton holds exactly one slot.
        let (prelude, epilogue) = source.split_once(IMPORT_SLOT).unwrap_or((source.as_str(), ""));
        Self {
            prelude: prelude.to_string(),
            epilogue: epilogue.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ViewWrapper
// ---------------------------------------------------------------------------

/// Creates and memoizes wrapper files, one per view source.
#[derive(Debug)]
pub struct ViewWrapper {
    scratch_dir: PathBuf,
    template_path: Option<PathBuf>,
    template: OnceCell<WrapperTemplate>,
    wrapped: DashMap<PathBuf, PathBuf>,
}

impl ViewWrapper {
    /// A wrapper writing into `scratch_dir`, using the built-in skeleton or
    /// the one at `template_path` (loaded on first use).
    pub fn new(scratch_dir: impl Into<PathBuf>, template_path: Option<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            template_path,
            template: OnceCell::new(),
            wrapped: DashMap::new(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Wipe and recreate the scratch directory and forget every wrapper.
    pub async fn reset(&self) -> Result<(), ViewError> {
        self.wrapped.clear();
        match tokio::fs::remove_dir_all(&self.scratch_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ViewError::io(&self.scratch_dir, e)),
        }
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| ViewError::io(&self.scratch_dir, e))
    }

    /// Number of memoized wrappers.
    pub fn len(&self) -> usize {
        self.wrapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrapped.is_empty()
    }

    async fn template(&self) -> Result<&WrapperTemplate, ViewError> {
        self.template
            .get_or_try_init(|| async {
                match &self.template_path {
                    Some(path) => {
                        let source = tokio::fs::read_to_string(path)
                            .await
                            .map_err(|e| ViewError::io(path, e))?;
                        WrapperTemplate::parse(&source)
                    }
                    None => Ok(WrapperTemplate::default()),
                }
            })
            .await
    }

    /// Return the wrapper file for `source_path`, creating it on first request.
    pub async fn create_wrapped_view(&self, source_path: &Path) -> Result<PathBuf, ViewError> {
        if let Some(existing) = self.wrapped.get(source_path) {
            return Ok(existing.value().clone());
        }

        let content = self.template().await?.render(source_path);
        let wrapped_path = self
            .scratch_dir
            .join(format!("{}.svelte", Uuid::new_v4().simple()));

        tokio::fs::write(&wrapped_path, content)
            .await
            .map_err(|e| ViewError::io(&wrapped_path, e))?;

        debug!(source = %source_path.display(), wrapper = %wrapped_path.display(), "wrapped view created");

        // A concurrent first request may have won the race; keep its file.
        let entry = self
            .wrapped
            .entry(source_path.to_path_buf())
            .or_insert_with(|| wrapped_path.clone());
        let winner = entry.value().clone();
        drop(entry);

        if winner != wrapped_path {
            if let Err(e) = tokio::fs::remove_file(&wrapped_path).await {
                warn!(wrapper = %wrapped_path.display(), error = %e, "failed to remove duplicate wrapper");
            }
        }

        Ok(winner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
