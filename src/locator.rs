//! View lookup.
//!
//! Resolves a logical view name against an ordered list of view roots:
//! first root with a match wins, and within a root `<root>/<name>` is tried
//! before `<root>/<name-without-ext>/index<ext>`.

use std::path::{Path, PathBuf};

use crate::utils;

/// Lookup the view source for `name`.
///
/// `name` keeps its own extension when it has one, otherwise
/// `default_extension` (e.g. `.svelte`) is appended. Returns `None` when no
/// root yields a regular file; filesystem errors count as a miss.
pub async fn lookup<P: AsRef<Path>>(
    name: &str,
    roots: &[P],
    default_extension: &str,
) -> Option<PathBuf> {
    let has_extension = Path::new(name).extension().is_some();
    let extension = if has_extension {
        Path::new(name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    } else {
        default_extension.to_string()
    };
    let view_name = if has_extension {
        name.to_string()
    } else {
        format!("{}{}", name, default_extension)
    };

    for root in roots {
        let filename = absolute(&root.as_ref().join(&view_name));
        if let Some(found) = resolve(&filename, &extension).await {
            return Some(found);
        }
    }

    None
}

/// Resolve `filename` as a file, then as `<filename-without-ext>/index<ext>`.
async fn resolve(filename: &Path, extension: &str) -> Option<PathBuf> {
    if is_file(filename).await {
        return Some(filename.to_path_buf());
    }

    let dirname = filename.parent()?;
    let basename = filename.file_name()?.to_string_lossy();
    let stem = basename.strip_suffix(extension).unwrap_or(&basename);
    let index = dirname.join(stem).join(format!("index{}", extension));

    if is_file(&index).await {
        return Some(index);
    }

    None
}

async fn is_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}

/// Make `path` absolute against the current directory without touching the filesystem.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Derive the manifest key of a resolved view: its path relative to the
/// first root containing it, with `/` separators and the extension stripped.
///
/// Falls back to the file stem when the view lives outside every root.
pub fn manifest_key<P: AsRef<Path>>(view_path: &Path, roots: &[P]) -> String {
    for root in roots {
        let root = absolute(root.as_ref());
        if let Ok(relative) = view_path.strip_prefix(&root) {
            let key = utils::to_slash(relative);
            return utils::strip_extension(&key).to_string();
        }
    }

    view_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "<h1>view</h1>").unwrap();
    }

    #[tokio::test]
    async fn test_lookup_appends_default_extension() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Page.svelte"));

        let found = lookup("Page", &[dir.path()], ".svelte").await;
        assert_eq!(found, Some(dir.path().join("Page.svelte")));
    }

    #[tokio::test]
    async fn test_lookup_keeps_explicit_extension() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Page.html"));

        let found = lookup("Page.html", &[dir.path()], ".svelte").await;
        assert_eq!(found, Some(dir.path().join("Page.html")));
    }

    #[tokio::test]
    async fn test_lookup_index_fallback() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Page").join("index.svelte"));

        let found = lookup("Page", &[dir.path()], ".svelte").await;
        assert_eq!(found, Some(dir.path().join("Page").join("index.svelte")));
    }

    #[tokio::test]
    async fn test_lookup_directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Page.svelte")).unwrap();

        assert_eq!(lookup("Page", &[dir.path()], ".svelte").await, None);
    }

    #[tokio::test]
    async fn test_lookup_miss_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(lookup("Missing", &[dir.path()], ".svelte").await, None);
    }

    #[test]
    fn test_manifest_key_is_root_relative() {
        let root = PathBuf::from("/srv/app/views");
        let view = root.join("blog").join("Post.svelte");
        assert_eq!(manifest_key(&view, &[&root]), "blog/Post");
    }

    #[test]
    fn test_manifest_key_uses_first_containing_root() {
        let outer = PathBuf::from("/srv/app");
        let inner = PathBuf::from("/srv/app/views");
        let view = inner.join("Page.svelte");
        assert_eq!(manifest_key(&view, &[&inner, &outer]), "Page");
        assert_eq!(manifest_key(&view, &[&outer, &inner]), "views/Page");
    }

    #[test]
    fn test_manifest_key_outside_roots() {
        let view = PathBuf::from("/elsewhere/Widget.svelte");
        assert_eq!(manifest_key(&view, &[PathBuf::from("/srv/views")]), "Widget");
    }
}
