//! Schorle bridge - builds and server-renders file-routed UI pages.
//!
//! The crate sits between a backend that computes page data and a
//! JavaScript UI runtime that renders components. It owns the parts with
//! real ordering and failure-mode concerns:
//!
//! - **Discovery** - finds pages and their layout chains under `app/pages/`
//! - **Build** - bundles each page concurrently and records a manifest
//! - **Compose** - folds layouts around a page into one render tree
//! - **Render** - streams server markup with hydration data injected
//! - **Props** - fetches request-scoped props from the backend's store
//!
//! # Layout on disk
//!
//! ```text
//! <project>/
//! ├── app/pages/             page and __layout modules
//! └── .schorle/
//!     ├── dist/<page>/       built assets + manifest.json
//!     ├── tmp/               per-build scratch, removed after each batch
//!     ├── registry.ts        client module registry
//!     ├── render.tsx         server render worker
//!     └── build-report.json  last batch outcome
//! ```

pub mod build;
pub mod compose;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod manifest;
pub mod props;
pub mod render;

pub use build::{BuildError, BuildOrchestrator, BuildResult, Bundler, CommandBundler};
pub use compose::{compose, HydrationEnvelope, RenderNode};
pub use config::{Config, ConfigError, PropsStoreConfig, PropsTransport};
pub use discovery::{discover_pages, resolve_layout_chain, LayoutChain, PageComponent};
pub use manifest::{ManifestEntry, ManifestStore};
pub use props::{PropsError, PropsStoreClient};
pub use render::{ProcessRenderEngine, RenderEngine, RenderError, RequestContext, SsrRenderer};
