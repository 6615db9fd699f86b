//! # Svelte View Engine
//!
//! Server-side rendering integration for Svelte components. Given a logical
//! view name and per-request data, the engine:
//!
//! 1. Locates the view source under the configured view roots
//! 2. Synthesizes a wrapper component that injects global context
//! 3. Compiles the wrapper through the external toolchain and evaluates it
//! 4. Renders it and assembles an HTML document with hydration state and
//!    the client bundle scripts picked from the bundle manifest
//!
//! The toolchain, the evaluator and the hosting framework are collaborators
//! behind traits ([`Toolchain`], [`Evaluator`], [`ViewHost`]).

pub mod app_modules;
pub mod browser;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod evaluator;
pub mod host;
pub mod locator;
pub mod manifest;
pub mod props;
pub mod template;
pub mod toolchain;
pub mod utils;
pub mod wrapper;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use browser::{BrowserBuild, BrowserEntries};
pub use compiler::{
    CacheKey, CompileOptions, CompiledView, Compiler, Evaluator, ModuleSource, RenderContext,
    ViewComponent,
};
pub use config::ViewEngineConfig;
pub use engine::{RenderOptions, RenderStage, ViewEngine};
pub use evaluator::NodeEvaluator;
pub use host::{BufferedHost, Locals, Scopes, ViewHost};
pub use locator::lookup;
pub use manifest::{get_filename_regex, BundleManifest};
pub use template::{HtmlTemplate, TemplateData};
pub use toolchain::{
    OutputArtifact, ProcessToolchain, Target, Toolchain, ToolchainOutput, ToolchainRequest,
};
pub use wrapper::{ViewWrapper, WrapperTemplate};

// ---------------------------------------------------------------------------
// Render Output
// ---------------------------------------------------------------------------

/// What a compiled view produces for one render call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOutput {
    pub html: String,
    #[serde(default)]
    pub head: String,
    #[serde(default)]
    pub css: String,
}

// ---------------------------------------------------------------------------
// Error Codes
// ---------------------------------------------------------------------------

pub const ERROR_LOOKUP: &str = "SVELTE_VIEW_LOOKUP";
pub const ERROR_COMPILE: &str = "SVELTE_VIEW_COMPILE";
pub const ERROR_COMPILE_OUTPUT_INVALID_LENGTH: &str = "SVELTE_VIEW_COMPILE_OUTPUT_INVALID_LENGTH";
pub const ERROR_COMPILE_OUTPUT_INVALID_TYPE: &str = "SVELTE_VIEW_COMPILE_OUTPUT_INVALID_TYPE";
pub const ERROR_RENDER: &str = "SVELTE_VIEW_RENDER";
pub const ERROR_CONFIGURATION: &str = "SVELTE_VIEW_CONFIGURATION";
pub const ERROR_IO: &str = "SVELTE_VIEW_IO";
pub const ERROR_TEMPLATE: &str = "SVELTE_VIEW_TEMPLATE";

// ---------------------------------------------------------------------------
// CodedError
// ---------------------------------------------------------------------------

/// A collaborator error carrying its own error code.
///
/// Toolchains, evaluators and components may return this (inside an
/// `anyhow::Error`) to override the stage's default code.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CodedError {
    pub code: String,
    pub message: String,
}

impl CodedError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The code a collaborator attached to `err`, if any.
pub fn collaborator_code(err: &anyhow::Error) -> Option<&str> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
        .map(|coded| coded.code.as_str())
}

// ---------------------------------------------------------------------------
// CompileError
// ---------------------------------------------------------------------------

/// Errors raised by the compiler/evaluator. A failed compile is never cached.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Toolchain failed: {0}")]
    Toolchain(#[source] anyhow::Error),

    #[error("Invalid compile output. Generated {count} chunks or assets, expected exactly one")]
    InvalidOutputLength { count: usize },

    #[error("Invalid compile output. Generated an asset instead of a chunk: {file_name}")]
    InvalidOutputType { file_name: String },

    #[error("Failed to evaluate compiled module: {0}")]
    Evaluate(#[source] anyhow::Error),
}

impl CompileError {
    /// The code of this failure, when it has one of its own.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Toolchain(err) | Self::Evaluate(err) => collaborator_code(err),
            Self::InvalidOutputLength { .. } => Some(ERROR_COMPILE_OUTPUT_INVALID_LENGTH),
            Self::InvalidOutputType { .. } => Some(ERROR_COMPILE_OUTPUT_INVALID_TYPE),
        }
    }
}

// ---------------------------------------------------------------------------
// ViewError
// ---------------------------------------------------------------------------

/// Errors surfaced by the engine. Per-request variants are forwarded to the
/// host's error seam; `Configuration` aborts installation.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("Failed to lookup view \"{name}\" in views directories {roots:?}")]
    Lookup { name: String, roots: Vec<PathBuf> },

    #[error("Failed to compile view {}: {source}", path.display())]
    Compile {
        code: String,
        path: PathBuf,
        #[source]
        source: CompileError,
    },

    #[error("Failed to render view \"{view}\": {source}")]
    Render {
        code: String,
        view: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    Template(String),
}

impl ViewError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn compile(path: impl Into<PathBuf>, source: CompileError) -> Self {
        let code = source.code().unwrap_or(ERROR_COMPILE).to_string();
        Self::Compile {
            code,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn render(view: impl Into<String>, source: anyhow::Error) -> Self {
        let code = collaborator_code(&source).unwrap_or(ERROR_RENDER).to_string();
        Self::Render {
            code,
            view: view.into(),
            source,
        }
    }

    /// Stable error code for the hosting framework's error handler.
    pub fn code(&self) -> &str {
        match self {
            Self::Lookup { .. } => ERROR_LOOKUP,
            Self::Compile { code, .. } | Self::Render { code, .. } => code.as_str(),
            Self::Configuration(_) => ERROR_CONFIGURATION,
            Self::Io { .. } => ERROR_IO,
            Self::Template(_) => ERROR_TEMPLATE,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
