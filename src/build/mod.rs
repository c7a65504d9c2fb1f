//! Build orchestration.
//!
//! Turns every discovered page into client assets plus a manifest entry.
//!
//! # Pipeline (per page)
//!
//! ```text
//! resolve layout chain ─► compose ─► generate entry.tsx ─► Bundler
//!                                                            │
//!              manifest.json ◄── publish artifacts ◄── classify outputs
//! ```
//!
//! Pages build concurrently, bounded by `Config::build_concurrency`, each in
//! its own temporary directory under `.schorle/tmp/`. A page's failure is
//! recorded and the batch continues; only a bundler that cannot be started
//! at all aborts the batch. The aggregate report, the client registry and
//! the render worker are written after every page has finished.

pub mod bundler;
pub mod codegen;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::compose::compose;
use crate::config::Config;
use crate::constants::HYDRATION_ENTRY_FILE;
use crate::discovery::{discover_pages, resolve_layout_chain, DiscoveryError, PageComponent};
use crate::manifest::{write_atomic, ManifestEntry, ManifestError, ManifestStore};

pub use bundler::{BundleError, BundleOutput, BundleRequest, Bundler, CommandBundler};

/// Failure of a single page. Other pages are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum PageBuildError {
    /// The page's layout chain does not reach the pages root.
    #[error(transparent)]
    Unrooted(#[from] DiscoveryError),

    /// The bundler rejected the page.
    #[error("bundling page '{identity}' failed: {diagnostics}")]
    Bundle {
        /// Page identity.
        identity: String,
        /// Bundler diagnostics.
        diagnostics: String,
    },

    /// The bundler succeeded but produced no script.
    #[error("bundler produced no script for page '{identity}'")]
    NoScript {
        /// Page identity.
        identity: String,
    },

    /// Preparing inputs or publishing outputs failed.
    #[error("build I/O for page '{identity}' at {}: {source}", path.display())]
    Io {
        /// Page identity.
        identity: String,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest could not be written.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Failure that aborts the whole batch.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The bundler could not be started.
    #[error("bundler could not be invoked while building page '{page}': {source}")]
    BundlerInvocation {
        /// Page whose invocation failed first.
        page: String,
        /// Invocation error.
        #[source]
        source: BundleError,
    },

    /// A build task panicked or was cancelled.
    #[error("build task failed: {0}")]
    Task(String),

    /// Writing batch-level output failed.
    #[error("build I/O at {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one page's build.
#[derive(Debug)]
pub struct PageBuildResult {
    /// The page.
    pub page: PageComponent,
    /// Layout chain used, when it could be resolved.
    pub layouts: Vec<PathBuf>,
    /// Manifest entry on success, diagnostic on failure.
    pub outcome: Result<ManifestEntry, PageBuildError>,
}

impl PageBuildResult {
    /// Whether the page built.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Aggregate result of a batch.
#[derive(Debug, Default)]
pub struct BuildResult {
    /// Per-page outcomes, sorted by identity.
    pub pages: Vec<PageBuildResult>,
    /// Problems found while scanning for pages.
    pub discovery_errors: Vec<DiscoveryError>,
}

impl BuildResult {
    /// Number of pages that built.
    pub fn succeeded(&self) -> usize {
        self.pages.iter().filter(|p| p.is_success()).count()
    }

    /// Pages that failed.
    pub fn failures(&self) -> impl Iterator<Item = &PageBuildResult> {
        self.pages.iter().filter(|p| !p.is_success())
    }

    /// Whether every page built and the scan was clean.
    pub fn is_clean(&self) -> bool {
        self.discovery_errors.is_empty() && self.pages.iter().all(PageBuildResult::is_success)
    }
}

/// Status of one page in the aggregate report.
#[derive(Debug, Serialize)]
struct PageReport {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `.schorle/build-report.json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildReport {
    pages: BTreeMap<String, PageReport>,
    discovery_errors: Vec<String>,
    finished_at: DateTime<Utc>,
}

struct BuildContext {
    config: Config,
    bundler: Arc<dyn Bundler>,
    store: ManifestStore,
    pages_root: PathBuf,
}

/// Builds pages with a bundler, writing manifests under the output root.
pub struct BuildOrchestrator {
    ctx: Arc<BuildContext>,
}

impl std::fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("pages_root", &self.ctx.pages_root)
            .field("dist_dir", &self.ctx.store.dist_dir())
            .finish_non_exhaustive()
    }
}

impl BuildOrchestrator {
    /// Orchestrator for the project described by `config`.
    pub fn new(config: Config, bundler: Arc<dyn Bundler>) -> Self {
        let store = ManifestStore::new(config.dist_dir());
        let pages_root = config.pages_dir();
        Self {
            ctx: Arc::new(BuildContext {
                config,
                bundler,
                store,
                pages_root,
            }),
        }
    }

    /// Manifest store this orchestrator writes.
    pub fn store(&self) -> &ManifestStore {
        &self.ctx.store
    }

    /// Discovers every page under `app/pages/`, builds them all, then writes
    /// the registry, the render worker and the aggregate report.
    pub async fn build_all(&self) -> Result<BuildResult, BuildError> {
        let discovery = discover_pages(&self.ctx.pages_root);
        let mut result = self.build(discovery.pages).await?;
        result.discovery_errors = discovery.errors;

        self.write_generated(&result)?;
        self.write_report(&result)?;

        log::info!(
            "[build] {} of {} page(s) built",
            result.succeeded(),
            result.pages.len()
        );
        Ok(result)
    }

    /// Builds the given pages concurrently and joins on the whole batch.
    ///
    /// The temporary directory is removed once the batch is over, whether it
    /// succeeded or not; failure to remove it is only logged.
    pub async fn build(&self, pages: Vec<PageComponent>) -> Result<BuildResult, BuildError> {
        let tmp_dir = self.ctx.config.tmp_dir();
        scopeguard::defer! {
            if let Err(e) = fs::remove_dir_all(&tmp_dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("[build] Failed to remove scratch directory {}: {e}", tmp_dir.display());
                }
            }
        }

        let slots = Arc::new(Semaphore::new(self.ctx.config.build_concurrency.max(1)));
        let mut tasks: JoinSet<Result<PageBuildResult, BuildError>> = JoinSet::new();

        for (slot, page) in pages.into_iter().enumerate() {
            let ctx = Arc::clone(&self.ctx);
            let slots = Arc::clone(&slots);
            tasks.spawn(async move {
                let _permit = slots
                    .acquire_owned()
                    .await
                    .map_err(|e| BuildError::Task(e.to_string()))?;
                build_page(&ctx, slot, page).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| BuildError::Task(e.to_string())).and_then(|r| r);
            match outcome {
                Ok(page_result) => results.push(page_result),
                Err(fatal) => {
                    log::error!("[build] Aborting batch: {fatal}");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(fatal);
                }
            }
        }

        results.sort_by(|a, b| a.page.identity.cmp(&b.page.identity));
        Ok(BuildResult {
            pages: results,
            discovery_errors: Vec::new(),
        })
    }

    fn write_generated(&self, result: &BuildResult) -> Result<(), BuildError> {
        let built: Vec<(PageComponent, Vec<PathBuf>)> = result
            .pages
            .iter()
            .filter(|p| p.is_success())
            .map(|p| (p.page.clone(), p.layouts.clone()))
            .collect();

        let registry = codegen::registry_module(&self.ctx.pages_root, &built);
        write_file(&self.ctx.config.registry_path(), registry.as_bytes())?;

        let worker = codegen::render_worker_module();
        write_file(&self.ctx.config.render_worker_path(), worker.as_bytes())?;
        Ok(())
    }

    fn write_report(&self, result: &BuildResult) -> Result<(), BuildError> {
        let pages = result
            .pages
            .iter()
            .map(|p| {
                let report = match &p.outcome {
                    Ok(_) => PageReport { ok: true, error: None },
                    Err(e) => PageReport {
                        ok: false,
                        error: Some(e.to_string()),
                    },
                };
                (p.page.identity.clone(), report)
            })
            .collect();

        let report = BuildReport {
            pages,
            discovery_errors: result.discovery_errors.iter().map(ToString::to_string).collect(),
            finished_at: Utc::now(),
        };

        let path = self.ctx.config.build_report_path();
        let bytes = serde_json::to_vec_pretty(&report).map_err(|e| BuildError::Io {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;
        write_file(&path, &bytes)
    }
}

/// Builds one page. Only a bundler that cannot be started escapes as `Err`;
/// every other failure is captured in the returned result.
async fn build_page(
    ctx: &BuildContext,
    slot: usize,
    page: PageComponent,
) -> Result<PageBuildResult, BuildError> {
    let identity = page.identity.clone();

    let layouts = match resolve_layout_chain(&page, &ctx.pages_root) {
        Ok(chain) => chain.into_inner(),
        Err(e) => return Ok(fail(ctx, page, Vec::new(), e.into())),
    };

    let tree = compose(&page, &layouts);
    // One flat directory per page so nested identities never share a path.
    let work_dir = ctx
        .config
        .tmp_dir()
        .join(format!("{slot:04}-{}", identity.replace('/', "_")));
    let entrypoint = work_dir.join(HYDRATION_ENTRY_FILE);
    let outdir = work_dir.join("out");

    if let Err(e) = prepare_work_dir(&outdir, &entrypoint, &ctx.config, &tree) {
        return Ok(fail(ctx, page, layouts, e.into_page_error(&identity)));
    }

    let request = BundleRequest {
        identity: identity.clone(),
        entrypoint,
        outdir: outdir.clone(),
    };

    let output = match ctx.bundler.bundle(&request).await {
        Ok(output) => output,
        Err(source @ BundleError::Invocation { .. }) => {
            return Err(BuildError::BundlerInvocation {
                page: identity,
                source,
            })
        }
        Err(BundleError::Failed { diagnostics, .. }) => {
            let err = PageBuildError::Bundle {
                identity: identity.clone(),
                diagnostics,
            };
            return Ok(fail(ctx, page, layouts, err));
        }
    };

    let Some(entry) = bundler::classify(&output.artifacts, &outdir) else {
        let err = PageBuildError::NoScript {
            identity: identity.clone(),
        };
        return Ok(fail(ctx, page, layouts, err));
    };

    if let Err(e) = publish(ctx, &identity, &output, &outdir, &entry) {
        return Ok(fail(ctx, page, layouts, e));
    }

    log::info!("[build] Built page '{identity}' -> {}", entry.js);
    Ok(PageBuildResult {
        page,
        layouts,
        outcome: Ok(entry),
    })
}

/// I/O error tagged with the path it concerns.
struct PathError {
    path: PathBuf,
    source: std::io::Error,
}

impl PathError {
    fn at(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self {
            path: path.to_path_buf(),
            source,
        }
    }

    fn into_page_error(self, identity: &str) -> PageBuildError {
        PageBuildError::Io {
            identity: identity.to_string(),
            path: self.path,
            source: self.source,
        }
    }
}

fn prepare_work_dir(
    outdir: &Path,
    entrypoint: &Path,
    config: &Config,
    tree: &crate::compose::RenderNode,
) -> Result<(), PathError> {
    if outdir.exists() {
        fs::remove_dir_all(outdir).map_err(PathError::at(outdir))?;
    }
    fs::create_dir_all(outdir).map_err(PathError::at(outdir))?;
    let source = codegen::hydration_entry(tree, &config.hydrator_module);
    fs::write(entrypoint, source).map_err(PathError::at(entrypoint))?;
    Ok(())
}

/// Copies artifacts into the page's output directory, swaps the manifest in
/// atomically, then drops artifacts the new manifest no longer covers.
fn publish(
    ctx: &BuildContext,
    identity: &str,
    output: &BundleOutput,
    outdir: &Path,
    entry: &ManifestEntry,
) -> Result<(), PageBuildError> {
    let page_dir = ctx.store.page_dir(identity);
    let mut published = Vec::with_capacity(output.artifacts.len());

    for artifact in &output.artifacts {
        let Ok(relative) = artifact.strip_prefix(outdir) else {
            log::warn!(
                "[build] Ignoring artifact outside output directory: {}",
                artifact.display()
            );
            continue;
        };
        let dest = page_dir.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(PathError::at(parent))
                .map_err(|e| e.into_page_error(identity))?;
        }
        fs::copy(artifact, &dest)
            .map_err(PathError::at(&dest))
            .map_err(|e| e.into_page_error(identity))?;
        published.push(dest);
    }

    ctx.store.write(identity, entry)?;
    remove_stale(&page_dir, &published, &ctx.store.manifest_path(identity));
    Ok(())
}

/// Removes files directly inside `page_dir` that the new build did not
/// produce. Subdirectories are left alone: they may hold the output of a
/// nested page (`settings/Profile` under `settings`) being built
/// concurrently.
fn remove_stale(page_dir: &Path, keep: &[PathBuf], manifest: &Path) {
    let Ok(entries) = fs::read_dir(page_dir) else {
        return;
    };
    for path in entries.filter_map(Result::ok).map(|e| e.path()) {
        if path.is_dir() || path == manifest || keep.contains(&path) {
            continue;
        }
        if let Err(e) = fs::remove_file(&path) {
            log::warn!("[build] Failed to remove stale artifact {}: {e}", path.display());
        }
    }
}

fn fail(
    ctx: &BuildContext,
    page: PageComponent,
    layouts: Vec<PathBuf>,
    error: PageBuildError,
) -> PageBuildResult {
    log::error!("[build] Page '{}' failed: {error}", page.identity);
    if let Err(e) = ctx.store.remove(&page.identity) {
        log::warn!("[build] Could not remove stale manifest for '{}': {e}", page.identity);
    }
    PageBuildResult {
        page,
        layouts,
        outcome: Err(error),
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), BuildError> {
    write_atomic(path, bytes).map_err(|source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    })
}
