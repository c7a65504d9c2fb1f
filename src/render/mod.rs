//! Server-side rendering.
//!
//! ```text
//!   page identity + request headers
//!          │
//!          ├── ManifestStore::load ──► missing → UnbuiltPage (not found)
//!          ├── layout chain ─► compose ─► RenderNode ─┐
//!          ├── x-schorle-props-id? ─► PropsStoreClient│
//!          │                                          ▼
//!          │                                   RenderEngine (chunks)
//!          │                                          │
//!          └── HydrationEnvelope ───────────► HeadInjector ─► sink
//! ```
//!
//! Props are fetched only when the request carries a handle. Any props
//! failure fails the render; there is no silent fallback to empty props.
//! A sink write error means the client went away: rendering stops and the
//! engine is dropped, which terminates it.

pub mod engine;
pub mod inject;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::compose::{compose, HydrationEnvelope};
use crate::config::{Config, ConfigError};
use crate::constants::{MODULE_EXTENSIONS, PROPS_HANDLE_HEADER};
use crate::discovery::{resolve_layout_chain, DiscoveryError, PageComponent};
use crate::manifest::{ManifestError, ManifestStore};
use crate::props::{PropsError, PropsStoreClient};

pub use engine::{ChunkStream, ProcessRenderEngine, RenderEngine, RenderRequest};
pub use inject::HeadInjector;

/// Render failures. Each names the page being rendered.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// No manifest exists for the page; it was never built or its last
    /// build failed.
    #[error("page '{page}' has not been built")]
    UnbuiltPage {
        /// Page identity.
        page: String,
    },

    /// A manifest exists but the page module is gone.
    #[error("page '{page}' has a manifest but no module under {}", pages_root.display())]
    MissingModule {
        /// Page identity.
        page: String,
        /// Directory searched.
        pages_root: PathBuf,
    },

    /// The layout chain could not be resolved.
    #[error(transparent)]
    Layout(#[from] DiscoveryError),

    /// The manifest exists but could not be read.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Props were requested and could not be fetched.
    #[error("props for page '{page}' unavailable: {source}")]
    Props {
        /// Page identity.
        page: String,
        /// Props store error, including the handle.
        #[source]
        source: PropsError,
    },

    /// The hydration envelope could not be serialized.
    #[error("cannot serialize hydration data for page '{page}': {source}")]
    Envelope {
        /// Page identity.
        page: String,
        /// Serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// The render engine failed to start or failed mid-stream.
    #[error("render engine failed for page '{page}': {source}")]
    Engine {
        /// Page identity.
        page: String,
        /// Engine error.
        #[source]
        source: io::Error,
    },

    /// The client stopped accepting output.
    #[error("client went away while rendering page '{page}': {source}")]
    ClientGone {
        /// Page identity.
        page: String,
        /// Sink error.
        #[source]
        source: io::Error,
    },
}

impl RenderError {
    /// Whether the failure should be reported to the caller as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnbuiltPage { .. } | Self::MissingModule { .. })
    }
}

/// Request metadata relevant to rendering. Header names are
/// case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    headers: HashMap<String, String>,
}

impl RequestContext {
    /// Context with no headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header, replacing any earlier value.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Opaque props handle, when the backend attached one.
    pub fn props_handle(&self) -> Option<&str> {
        self.header(PROPS_HANDLE_HEADER)
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }
}

/// What a completed render produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSummary {
    /// Bytes written to the sink.
    pub bytes_written: usize,
    /// Whether the head payload was inserted. False only when the markup
    /// had no `</head>`.
    pub injected: bool,
    /// Whether props were fetched.
    pub with_props: bool,
}

/// Renders built pages.
pub struct SsrRenderer {
    store: ManifestStore,
    pages_root: PathBuf,
    asset_prefix: String,
    props: PropsStoreClient,
    engine: Arc<dyn RenderEngine>,
}

impl std::fmt::Debug for SsrRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrRenderer")
            .field("pages_root", &self.pages_root)
            .field("props", self.props.transport())
            .finish_non_exhaustive()
    }
}

impl SsrRenderer {
    /// Renderer for a built project.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingTransport` when no props store is
    /// configured; rendering never starts without one.
    pub fn new(config: &Config, engine: Arc<dyn RenderEngine>) -> Result<Self, ConfigError> {
        let props = config
            .props_store
            .clone()
            .ok_or(ConfigError::MissingTransport)?;
        Ok(Self {
            store: ManifestStore::new(config.dist_dir()),
            pages_root: config.pages_dir(),
            asset_prefix: config.asset_prefix.trim_end_matches('/').to_string(),
            props: PropsStoreClient::new(props),
            engine,
        })
    }

    /// Renders `identity` into `sink`, streaming as the engine produces.
    pub async fn render<W>(
        &self,
        identity: &str,
        ctx: &RequestContext,
        sink: &mut W,
    ) -> Result<RenderSummary, RenderError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let started = Instant::now();

        // Identities come from callers; never let one escape the output root.
        if identity
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(RenderError::UnbuiltPage {
                page: identity.to_string(),
            });
        }

        let manifest = self
            .store
            .load(identity)?
            .ok_or_else(|| RenderError::UnbuiltPage {
                page: identity.to_string(),
            })?;

        let page = self.locate(identity)?;
        log::info!("[render] Rendering '{identity}'");
        let chain = resolve_layout_chain(&page, &self.pages_root)?;
        let tree = compose(&page, chain.layouts());

        let props = match ctx.props_handle() {
            Some(handle) => Some(self.props.fetch(handle).await.map_err(|source| {
                log::error!("[render] Props for page '{identity}' failed: {source}");
                RenderError::Props {
                    page: identity.to_string(),
                    source,
                }
            })?),
            None => None,
        };
        let with_props = props.is_some();

        let envelope = HydrationEnvelope::from_tree(&tree, &self.pages_root);
        let stylesheet = manifest.css.as_deref().map(|css| self.asset_url(identity, css));
        let payload = inject::head_payload(&envelope, stylesheet.as_deref()).map_err(|source| {
            RenderError::Envelope {
                page: identity.to_string(),
                source,
            }
        })?;

        let request = RenderRequest {
            tree,
            props,
            bootstrap_script: self.asset_url(identity, &manifest.js),
        };
        let engine_error = |source: io::Error| RenderError::Engine {
            page: identity.to_string(),
            source,
        };
        let mut chunks = self.engine.render(&request).await.map_err(engine_error)?;

        let mut injector = HeadInjector::new(payload);
        let mut bytes_written = 0;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(engine_error)?;
            let out = injector.push(&chunk);
            bytes_written += self.emit(identity, sink, &out).await?;
        }

        let injected = injector.injected();
        let tail = injector.finish();
        bytes_written += self.emit(identity, sink, &tail).await?;
        sink.flush()
            .await
            .map_err(|source| self.client_gone(identity, source))?;

        if !injected {
            log::warn!("[render] Page '{identity}' produced no </head>; hydration data not injected");
        }
        log::info!(
            "[render] {identity}: {bytes_written} byte(s) in {:?}",
            started.elapsed()
        );

        Ok(RenderSummary {
            bytes_written,
            injected,
            with_props,
        })
    }

    /// Finds the page module for an identity.
    fn locate(&self, identity: &str) -> Result<PageComponent, RenderError> {
        let missing = || RenderError::MissingModule {
            page: identity.to_string(),
            pages_root: self.pages_root.clone(),
        };
        MODULE_EXTENSIONS
            .iter()
            .map(|ext| self.pages_root.join(format!("{identity}.{ext}")))
            .find(|path| path.is_file())
            .and_then(|path| PageComponent::from_path(&self.pages_root, &path))
            .ok_or_else(missing)
    }

    fn asset_url(&self, identity: &str, file: &str) -> String {
        format!("{}/{identity}/{file}", self.asset_prefix)
    }

    async fn emit<W>(&self, identity: &str, sink: &mut W, bytes: &[u8]) -> Result<usize, RenderError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if bytes.is_empty() {
            return Ok(0);
        }
        sink.write_all(bytes)
            .await
            .map_err(|source| self.client_gone(identity, source))?;
        Ok(bytes.len())
    }

    fn client_gone(&self, identity: &str, source: io::Error) -> RenderError {
        log::info!("[render] Client aborted while rendering '{identity}': {source}");
        RenderError::ClientGone {
            page: identity.to_string(),
            source,
        }
    }
}
