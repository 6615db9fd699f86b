//! HTML document template.
//!
//! A plain string template with `${name}` placeholders. Known placeholders:
//! `head`, `style`, `html`, `globalProps`, `globalStore`, `props`, `script`,
//! `scriptModern`, `scriptLegacy`, `hydratable`. Unknown placeholders render
//! as empty strings.

use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::ViewError;

pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    ${head}
    ${style}
</head>
<body>
    <div class="view-target">${html}</div>
    ${script}
</body>
</html>
"#;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").expect("valid placeholder regex"))
}

/// Values substituted into the template. JSON fields are already escaped
/// for embedding in a `<script>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateData {
    pub head: String,
    pub style: String,
    pub html: String,
    pub global_props: String,
    pub global_store: String,
    pub props: String,
    pub script: String,
    pub script_modern: String,
    pub script_legacy: String,
    pub hydratable: bool,
}

impl TemplateData {
    fn get(&self, name: &str) -> Option<String> {
        let value = match name {
            "head" => &self.head,
            "style" => &self.style,
            "html" => &self.html,
            "globalProps" => &self.global_props,
            "globalStore" => &self.global_store,
            "props" => &self.props,
            "script" => &self.script,
            "scriptModern" => &self.script_modern,
            "scriptLegacy" => &self.script_legacy,
            "hydratable" => return Some(self.hydratable.to_string()),
            _ => return None,
        };
        Some(value.clone())
    }
}

/// A parsed HTML template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlTemplate {
    source: String,
}

impl HtmlTemplate {
    /// A template from its source. The source must contain `${html}`.
    pub fn new(source: impl Into<String>) -> Result<Self, ViewError> {
        let source = source.into();
        let has_html = placeholder_regex()
            .captures_iter(&source)
            .any(|caps| &caps[1] == "html");
        if !has_html {
            return Err(ViewError::Template(
                "template has no ${html} placeholder".to_string(),
            ));
        }
        Ok(Self { source })
    }

    pub async fn from_file(path: &Path) -> Result<Self, ViewError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ViewError::io(path, e))?;
        Self::new(source)
    }

    pub fn render(&self, data: &TemplateData) -> String {
        placeholder_regex()
            .replace_all(&self.source, |caps: &Captures<'_>| {
                data.get(&caps[1]).unwrap_or_default()
            })
            .into_owned()
    }
}

impl Default for HtmlTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
        }
    }
}
