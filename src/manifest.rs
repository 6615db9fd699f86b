//! Bundle manifest.
//!
//! Scans the pre-built client bundle directories once at install time and
//! maps logical view keys to asset paths. Filenames are matched against a
//! pattern such as `[name]-[hash][extname]`:
//!
//! - `[name]` → greedy name capture
//! - `[hash]` → 8 lowercase alphanumeric characters
//! - `[extname]` → `.js` or `.css`, must terminate the pattern
//!
//! The directory part of a file's path relative to its bundle directory is
//! kept in the key, so `dist/blog/Post-1a2b3c4d.js` is keyed `blog/Post`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{utils, ViewError};

pub const DEFAULT_BUNDLES_PATTERN: &str = "[name]-[hash][extname]";

const NAME_PLACEHOLDER: &str = "[name]";
const HASH_PLACEHOLDER: &str = "[hash]";
const EXTNAME_PLACEHOLDER: &str = "[extname]";

/// Suffix of the modern client build of a view.
pub const MODERN_SUFFIX: &str = "-modern";
/// Suffix of the legacy client build of a view.
pub const LEGACY_SUFFIX: &str = "-legacy";

// ---------------------------------------------------------------------------
// Pattern
// ---------------------------------------------------------------------------

/// Compile a bundle filename pattern into an anchored regular expression.
///
/// Fails with a configuration error when the pattern lacks `[name]` or does
/// not end with `[extname]`.
pub fn get_filename_regex(pattern: &str) -> Result<Regex, ViewError> {
    if !pattern.contains(NAME_PLACEHOLDER) {
        return Err(ViewError::Configuration(format!(
            "Bundles pattern '{}' must contain {}",
            pattern, NAME_PLACEHOLDER
        )));
    }
    if !pattern.ends_with(EXTNAME_PLACEHOLDER) {
        return Err(ViewError::Configuration(format!(
            "Bundles pattern '{}' must end with {}",
            pattern, EXTNAME_PLACEHOLDER
        )));
    }

    let mut source = String::from("^");
    let mut rest = pattern;
    while !rest.is_empty() {
        let next = [NAME_PLACEHOLDER, HASH_PLACEHOLDER, EXTNAME_PLACEHOLDER]
            .iter()
            .filter_map(|placeholder| rest.find(placeholder).map(|at| (at, *placeholder)))
            .min_by_key(|(at, _)| *at);

        match next {
            Some((at, placeholder)) => {
                source.push_str(&regex::escape(&rest[..at]));
                source.push_str(match placeholder {
                    NAME_PLACEHOLDER => "(?P<name>.+)",
                    HASH_PLACEHOLDER => "(?P<hash>[a-z0-9]{8})",
                    _ => r"(?P<extname>\.js|\.css)",
                });
                rest = &rest[at + placeholder.len()..];
            }
            None => {
                source.push_str(&regex::escape(rest));
                rest = "";
            }
        }
    }
    source.push('$');

    Regex::new(&source).map_err(|e| {
        ViewError::Configuration(format!("Bundles pattern '{}' is invalid: {}", pattern, e))
    })
}

// ---------------------------------------------------------------------------
// BundleManifest
// ---------------------------------------------------------------------------

/// Lookup from logical view key to bundle asset path (relative to its bundle dir).
#[derive(Debug, Clone, Default)]
pub struct BundleManifest {
    pub scripts: HashMap<String, String>,
    pub styles: HashMap<String, String>,
    /// Files that did not match the pattern, keyed by their relative path.
    pub rest: HashMap<String, String>,
}

impl BundleManifest {
    /// Build the manifest from `bundle_dirs` (earlier directories win on key collisions).
    ///
    /// Missing directories contribute nothing.
    pub fn build<P: AsRef<Path>>(bundle_dirs: &[P], pattern: &str) -> Result<Self, ViewError> {
        let regex = get_filename_regex(pattern)?;
        let mut manifest = Self::default();

        for dir in bundle_dirs {
            manifest.scan(dir.as_ref(), &regex)?;
        }

        info!(
            scripts = manifest.scripts.len(),
            styles = manifest.styles.len(),
            rest = manifest.rest.len(),
            "bundle manifest built"
        );

        Ok(manifest)
    }

    fn scan(&mut self, dir: &Path, regex: &Regex) -> Result<(), ViewError> {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "bundle directory missing, skipped");
            return Ok(());
        }

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                ViewError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            let relative = utils::to_slash(relative);
            let basename = entry.file_name().to_string_lossy();
            let dirname = match relative.rfind('/') {
                Some(at) => &relative[..=at],
                None => "",
            };

            match regex.captures(&basename) {
                Some(caps) => {
                    let name = caps.name("name").map_or("", |m| m.as_str());
                    let key = format!("{}{}", dirname, name);
                    let target = match caps.name("extname").map(|m| m.as_str()) {
                        Some(".css") => &mut self.styles,
                        _ => &mut self.scripts,
                    };
                    target.entry(key).or_insert_with(|| relative.clone());
                }
                None => {
                    self.rest.entry(relative.clone()).or_insert(relative);
                }
            }
        }

        Ok(())
    }

    pub fn script(&self, key: &str) -> Option<&str> {
        self.scripts.get(key).map(String::as_str)
    }

    pub fn style(&self, key: &str) -> Option<&str> {
        self.styles.get(key).map(String::as_str)
    }

    /// Script of the modern client build, falling back to the unsuffixed bundle.
    pub fn modern_script(&self, key: &str) -> Option<&str> {
        self.script(&format!("{}{}", key, MODERN_SUFFIX))
            .or_else(|| self.script(key))
    }

    pub fn legacy_script(&self, key: &str) -> Option<&str> {
        self.script(&format!("{}{}", key, LEGACY_SUFFIX))
    }

    /// Stylesheet of a view, falling back to the modern build's stylesheet.
    pub fn view_style(&self, key: &str) -> Option<&str> {
        self.style(key)
            .or_else(|| self.style(&format!("{}{}", key, MODERN_SUFFIX)))
    }
}

/// Absolute bundle directories, in lookup order.
pub fn bundle_dirs(dirs: &[PathBuf]) -> Vec<PathBuf> {
    dirs.iter().map(|d| crate::locator::absolute(d)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
