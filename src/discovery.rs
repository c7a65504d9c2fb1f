//! Page and layout discovery.
//!
//! Walks the page tree, picks out page modules (leaf templates with a
//! default export) and resolves, for each page, the chain of layout modules
//! wrapping it from the root directory down to the page's own directory.
//!
//! # Conventions
//!
//! - Modules are `.tsx` / `.jsx` files.
//! - A file whose stem is `__layout` is a layout, never a page.
//! - A page's identity is its path relative to the pages root, without
//!   extension, with `/` separators (`settings/Profile`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::constants::{LAYOUT_STEM, MODULE_EXTENSIONS};

/// Matches a default export in a module's source text.
static DEFAULT_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*export\s+default\b|export\s*\{[^}]*\bas\s+default\b")
        .unwrap_or_else(|e| panic!("default export pattern is invalid: {e}"))
});

/// Discovery failures.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A directory or file could not be read. Logged; siblings continue.
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Walking upward from the page never reached the root directory.
    #[error("layout chain for page '{page}' never reaches root {}", root.display())]
    UnrootedLayoutChain {
        /// Page identity.
        page: String,
        /// Root the walk was expected to reach.
        root: PathBuf,
    },
}

/// A discovered page module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageComponent {
    /// Stable identity derived from the path (`settings/Profile`).
    pub identity: String,
    /// Absolute module path.
    pub module_path: PathBuf,
    /// Directory containing the module.
    pub directory: PathBuf,
}

impl PageComponent {
    /// Builds a page from a module path below `pages_root`.
    ///
    /// Returns `None` if the path is not under the root or has no stem.
    pub fn from_path(pages_root: &Path, module_path: &Path) -> Option<Self> {
        let relative = module_path.strip_prefix(pages_root).ok()?;
        let identity = identity_for(relative)?;
        let directory = module_path.parent()?.to_path_buf();
        Some(Self {
            identity,
            module_path: module_path.to_path_buf(),
            directory,
        })
    }
}

/// Ordered layout module paths, root-first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutChain(Vec<PathBuf>);

impl LayoutChain {
    /// Wraps an already ordered (root-first) list of layout paths.
    pub fn new(layouts: Vec<PathBuf>) -> Self {
        Self(layouts)
    }

    /// Layout paths, outermost first.
    pub fn layouts(&self) -> &[PathBuf] {
        &self.0
    }

    /// Number of layouts in the chain.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the page has no layouts.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the chain.
    pub fn into_inner(self) -> Vec<PathBuf> {
        self.0
    }
}

/// Outcome of a page scan: the pages found and the directories skipped.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Pages sorted by identity.
    pub pages: Vec<PageComponent>,
    /// Non-fatal problems encountered during the scan.
    pub errors: Vec<DiscoveryError>,
}

/// Recursively scans `pages_root` for page modules.
///
/// Unreadable directories are reported in [`Discovery::errors`] and the scan
/// continues with their siblings. Layout files are never pages, and a file
/// is only a page when its source declares a default export.
pub fn discover_pages(pages_root: &Path) -> Discovery {
    let matcher = module_matcher();
    let mut discovery = Discovery::default();
    walk(pages_root, pages_root, &matcher, &mut discovery);
    discovery.pages.sort();
    log::debug!(
        "[discovery] {} page(s) under {} ({} error(s))",
        discovery.pages.len(),
        pages_root.display(),
        discovery.errors.len()
    );
    discovery
}

fn walk(pages_root: &Path, dir: &Path, matcher: &GlobSet, discovery: &mut Discovery) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) => {
            log::warn!("[discovery] Skipping unreadable directory {}: {source}", dir.display());
            discovery.errors.push(DiscoveryError::Unreadable {
                path: dir.to_path_buf(),
                source,
            });
            return;
        }
    };

    let mut paths: Vec<(PathBuf, fs::FileType)> = Vec::new();
    for entry in entries {
        match entry.and_then(|entry| Ok((entry.path(), entry.file_type()?))) {
            Ok(item) => paths.push(item),
            Err(source) => {
                log::warn!("[discovery] Failed to read entry in {}: {source}", dir.display());
                discovery.errors.push(DiscoveryError::Unreadable {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        }
    }
    paths.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, file_type) in paths {
        if file_type.is_dir() {
            walk(pages_root, &path, matcher, discovery);
            continue;
        }

        // Linked directories are never descended.
        if file_type.is_symlink() {
            match fs::metadata(&path) {
                Ok(target) if target.is_dir() => {
                    log::debug!("[discovery] Not following linked directory {}", path.display());
                    continue;
                }
                Ok(_) => {}
                Err(source) => {
                    log::warn!("[discovery] Skipping broken link {}: {source}", path.display());
                    discovery.errors.push(DiscoveryError::Unreadable { path, source });
                    continue;
                }
            }
        }

        let relative = path.strip_prefix(pages_root).unwrap_or(&path);
        if !matcher.is_match(relative) || is_layout(&path) {
            continue;
        }

        match fs::read_to_string(&path) {
            Ok(source) if has_default_export(&source) => {
                if let Some(page) = PageComponent::from_path(pages_root, &path) {
                    discovery.pages.push(page);
                }
            }
            Ok(_) => {
                log::debug!("[discovery] No default export in {}, skipping", path.display());
            }
            Err(source) => {
                log::warn!("[discovery] Cannot read module {}: {source}", path.display());
                discovery.errors.push(DiscoveryError::Unreadable { path, source });
            }
        }
    }
}

/// Resolves the layout chain of `page`, root-first.
///
/// Walks from the page's directory upward, collecting at most one layout per
/// directory, and stops at `root` (inclusive). Fails when the walk runs out
/// of ancestors without meeting `root`.
pub fn resolve_layout_chain(page: &PageComponent, root: &Path) -> Result<LayoutChain, DiscoveryError> {
    let mut chain: Vec<PathBuf> = Vec::new();

    for dir in page.directory.ancestors() {
        if let Some(layout) = find_layout(dir) {
            chain.push(layout);
        }
        if dir == root {
            chain.reverse();
            return Ok(LayoutChain::new(chain));
        }
    }

    Err(DiscoveryError::UnrootedLayoutChain {
        page: page.identity.clone(),
        root: root.to_path_buf(),
    })
}

/// Returns the layout module in `dir`, if any.
fn find_layout(dir: &Path) -> Option<PathBuf> {
    MODULE_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{LAYOUT_STEM}.{ext}")))
        .find(|candidate| candidate.is_file())
}

/// Whether the path names a layout module.
pub fn is_layout(path: &Path) -> bool {
    path.file_stem().and_then(|s| s.to_str()) == Some(LAYOUT_STEM)
}

/// Static check for a default-exported component.
pub fn has_default_export(source: &str) -> bool {
    DEFAULT_EXPORT.is_match(source)
}

/// Identity of a module from its path relative to the pages root.
pub fn identity_for(relative: &Path) -> Option<String> {
    let without_ext = relative.with_extension("");
    let parts: Vec<&str> = without_ext
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Key of a module in the generated registry and the hydration envelope:
/// its path relative to the pages root, extension included, `/`-separated.
///
/// Paths outside the root fall back to their full display form.
pub fn module_key(pages_root: &Path, module_path: &Path) -> String {
    match module_path.strip_prefix(pages_root) {
        Ok(relative) => relative
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => module_path.display().to_string(),
    }
}

fn module_matcher() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for ext in MODULE_EXTENSIONS {
        match Glob::new(&format!("**/*.{ext}")) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => log::warn!("[discovery] Invalid module pattern for .{ext}: {e}"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        log::warn!("[discovery] Failed to build module matcher: {e}");
        GlobSet::empty()
    })
}
