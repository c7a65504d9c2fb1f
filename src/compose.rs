//! Component tree composition.
//!
//! The same fold produces the tree the server renders and the data the
//! client hydrator uses to rebuild it, so both ends always agree: root
//! layout outermost, page innermost.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::discovery::{module_key, PageComponent};

/// A node of the composed render tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RenderNode {
    /// A layout wrapping exactly one child.
    Layout {
        /// Layout module path.
        module: PathBuf,
        /// The wrapped subtree.
        child: Box<RenderNode>,
    },
    /// The page itself; always the innermost node.
    Page {
        /// Page identity.
        identity: String,
        /// Page module path.
        module: PathBuf,
    },
}

impl RenderNode {
    /// Number of layouts wrapping the page.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self;
        while let Self::Layout { child, .. } = node {
            depth += 1;
            node = child.as_ref();
        }
        depth
    }

    /// The innermost node, which is always the page.
    pub fn innermost(&self) -> &RenderNode {
        let mut node = self;
        while let Self::Layout { child, .. } = node {
            node = child.as_ref();
        }
        node
    }

    /// Layout module paths from the outside in.
    pub fn layout_paths(&self) -> Vec<&Path> {
        let mut paths = Vec::new();
        let mut node = self;
        while let Self::Layout { module, child } = node {
            paths.push(module.as_path());
            node = child.as_ref();
        }
        paths
    }

    /// The page module path.
    pub fn page_path(&self) -> &Path {
        match self.innermost() {
            Self::Page { module, .. } | Self::Layout { module, .. } => module,
        }
    }
}

/// Composes `page` inside `layouts` (root-first).
///
/// Folds right-to-left: the last (innermost) layout wraps the page, and each
/// earlier layout wraps the accumulated tree.
pub fn compose(page: &PageComponent, layouts: &[PathBuf]) -> RenderNode {
    let leaf = RenderNode::Page {
        identity: page.identity.clone(),
        module: page.module_path.clone(),
    };
    layouts.iter().rev().fold(leaf, |child, layout| RenderNode::Layout {
        module: layout.clone(),
        child: Box::new(child),
    })
}

/// Data the client needs to rebuild the server's tree without touching the
/// filesystem. Keys refer to entries of the generated registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationEnvelope {
    /// Registry key of the page module.
    pub page_path: String,
    /// Registry keys of the layout modules, root-first.
    pub layout_paths: Vec<String>,
}

impl HydrationEnvelope {
    /// Derives the envelope from a composed tree.
    pub fn from_tree(tree: &RenderNode, pages_root: &Path) -> Self {
        Self {
            page_path: module_key(pages_root, tree.page_path()),
            layout_paths: tree
                .layout_paths()
                .into_iter()
                .map(|path| module_key(pages_root, path))
                .collect(),
        }
    }
}
