//! Bundler seam.
//!
//! The bundler is an external tool that compiles a generated hydration
//! entrypoint into browser assets. The orchestrator only cares about two
//! outcomes: the tool could not be run at all (fatal for the batch), or it
//! ran and rejected this one page (isolated to that page).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::manifest::ManifestEntry;

/// One bundler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRequest {
    /// Page identity, for diagnostics.
    pub identity: String,
    /// Generated hydration entrypoint.
    pub entrypoint: PathBuf,
    /// Empty directory the bundler writes into.
    pub outdir: PathBuf,
}

/// Artifacts a successful invocation declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleOutput {
    /// Output files, absolute, inside the request's `outdir`.
    pub artifacts: Vec<PathBuf>,
}

/// Bundler failures.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// The tool itself could not be started.
    #[error("cannot invoke bundler '{program}': {source}")]
    Invocation {
        /// Executable that failed to start.
        program: String,
        /// Spawn error.
        #[source]
        source: io::Error,
    },

    /// The tool ran and failed for this page.
    #[error("bundler failed for page '{identity}': {diagnostics}")]
    Failed {
        /// Page identity.
        identity: String,
        /// Tool output explaining the failure.
        diagnostics: String,
    },
}

impl BundleError {
    /// Whether the failure affects every page, not just the requested one.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invocation { .. })
    }
}

/// Compiles hydration entrypoints into client assets.
#[async_trait]
pub trait Bundler: Send + Sync {
    /// Bundles one entrypoint into `request.outdir`.
    ///
    /// # Errors
    ///
    /// Returns `BundleError::Invocation` when the tool cannot run and
    /// `BundleError::Failed` when it rejects the entrypoint.
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, BundleError>;
}

/// Runs an external bundler executable (`bun build` by default).
#[derive(Debug, Clone)]
pub struct CommandBundler {
    program: String,
}

impl CommandBundler {
    /// Bundler using the given executable.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, request: &BundleRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("build")
            .arg(&request.entrypoint)
            .arg("--outdir")
            .arg(&request.outdir)
            .arg("--target")
            .arg("browser")
            .arg("--minify")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Bundler for CommandBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, BundleError> {
        log::debug!(
            "[build] {} build {} --outdir {}",
            self.program,
            request.entrypoint.display(),
            request.outdir.display()
        );

        let output = self
            .command(request)
            .output()
            .await
            .map_err(|source| BundleError::Invocation {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let mut diagnostics = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if diagnostics.is_empty() {
                diagnostics = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            if diagnostics.is_empty() {
                diagnostics = format!("exited with {}", output.status);
            }
            return Err(BundleError::Failed {
                identity: request.identity.clone(),
                diagnostics,
            });
        }

        let artifacts = list_files(&request.outdir).map_err(|e| BundleError::Failed {
            identity: request.identity.clone(),
            diagnostics: format!("cannot list outputs in {}: {e}", request.outdir.display()),
        })?;
        Ok(BundleOutput { artifacts })
    }
}

/// Files under `dir`, recursively, sorted.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Picks the script and stylesheet out of the declared artifacts, as paths
/// relative to `outdir`.
///
/// Returns `None` when no script was produced. Source maps and other files
/// are ignored.
pub fn classify(artifacts: &[PathBuf], outdir: &Path) -> Option<ManifestEntry> {
    let relative = |path: &PathBuf| -> Option<String> {
        let rel = path.strip_prefix(outdir).ok()?;
        let parts: Vec<&str> = rel.iter().filter_map(|p| p.to_str()).collect();
        Some(parts.join("/"))
    };
    let with_extension = |exts: &[&str]| {
        artifacts
            .iter()
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| exts.contains(&e))
            })
            .find_map(relative)
    };

    let js = with_extension(&["js", "mjs"])?;
    let css = with_extension(&["css"]);
    Some(ManifestEntry { js, css })
}
