//! Render engine seam.
//!
//! The engine turns a composed tree plus props into a stream of markup
//! chunks. The default implementation runs the generated render worker in
//! the JavaScript runtime and streams its stdout; tests substitute their own.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;

use crate::compose::RenderNode;
use crate::config::Config;

/// Markup chunks produced by an engine.
pub type ChunkStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Input for one render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    /// Composed layout/page tree.
    pub tree: RenderNode,
    /// Props passed to the page, if the request carried a handle.
    pub props: Option<Value>,
    /// URL of the page's client script.
    pub bootstrap_script: String,
}

/// Produces streamed markup for a composed tree.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Starts rendering. Chunks arrive in document order.
    async fn render(&self, request: &RenderRequest) -> io::Result<ChunkStream>;
}

/// Runs `<runtime> run <render worker>` once per render.
#[derive(Debug, Clone)]
pub struct ProcessRenderEngine {
    runtime: String,
    worker: PathBuf,
    cwd: PathBuf,
}

impl ProcessRenderEngine {
    /// Engine running `worker` with `runtime` from `cwd`.
    pub fn new(runtime: impl Into<String>, worker: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            worker: worker.into(),
            cwd: cwd.into(),
        }
    }

    /// Engine for the worker generated by the last build.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.runtime.clone(),
            config.render_worker_path(),
            config.project_root.clone(),
        )
    }
}

#[async_trait]
impl RenderEngine for ProcessRenderEngine {
    async fn render(&self, request: &RenderRequest) -> io::Result<ChunkStream> {
        let input = serde_json::to_vec(request).map_err(io::Error::other)?;

        let mut child = Command::new(&self.runtime)
            .arg("run")
            .arg(&self.worker)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        log::debug!(
            "[render] Spawned {} run {} (pid {:?})",
            self.runtime,
            self.worker.display(),
            child.id()
        );

        // The worker reads its whole request before writing anything.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await?;
            stdin.shutdown().await?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("render worker stdout was not captured"))?;

        Ok(Box::pin(WorkerOutput {
            child: Some(child),
            inner: ReaderStream::new(stdout),
            exit: None,
            finished: false,
        }))
    }
}

type ExitFuture = Pin<Box<dyn Future<Output = io::Result<ExitStatus>> + Send>>;

/// Stdout of a running worker. Dropping it kills the worker.
///
/// Once stdout closes, the stream waits for the worker to exit and yields a
/// final error if the exit status was not success.
struct WorkerOutput {
    child: Option<Child>,
    inner: ReaderStream<ChildStdout>,
    exit: Option<ExitFuture>,
    finished: bool,
}

impl Stream for WorkerOutput {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }

            if let Some(exit) = self.exit.as_mut() {
                let status = ready!(exit.as_mut().poll(cx));
                self.exit = None;
                self.finished = true;
                return match status {
                    Ok(status) if status.success() => Poll::Ready(None),
                    Ok(status) => Poll::Ready(Some(Err(io::Error::other(format!(
                        "render worker exited with {status}"
                    ))))),
                    Err(e) => Poll::Ready(Some(Err(e))),
                };
            }

            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(chunk) => return Poll::Ready(Some(chunk)),
                None => match self.child.take() {
                    // The wait future owns the child, so dropping the stream
                    // still kills a worker that closed stdout early.
                    Some(mut child) => {
                        self.exit = Some(Box::pin(async move { child.wait().await }));
                    }
                    None => self.finished = true,
                },
            }
        }
    }
}
