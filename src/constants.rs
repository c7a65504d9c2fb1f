//! Project-wide constants for the build & render bridge.
//!
//! Centralizes directory names, file names, environment variable names and
//! default timeouts so the build and render sides agree on one layout.
//!
//! # Categories
//!
//! - **Layout**: project directory and file naming conventions
//! - **Environment**: variable names read by [`crate::config::Config`]
//! - **Timeouts**: props store and render defaults
//! - **Markup**: identifiers shared with the client hydrator

use std::time::Duration;

// ============================================================================
// Layout
// ============================================================================

/// Application source directory, relative to the project root.
pub const APP_DIR: &str = "app";

/// Page tree directory, relative to the application directory.
pub const PAGES_DIR: &str = "pages";

/// Scratch root for everything the build generates.
pub const SCRATCH_DIR: &str = ".schorle";

/// Build output root, relative to the scratch root.
pub const DIST_DIR: &str = "dist";

/// Per-page temporary build directories, relative to the scratch root.
///
/// Removed once a build batch completes.
pub const TMP_DIR: &str = "tmp";

/// Manifest file written into each page's output directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Generated client registry module.
pub const REGISTRY_FILE: &str = "registry.ts";

/// Generated server render worker module.
pub const RENDER_WORKER_FILE: &str = "render.tsx";

/// Aggregate build status, written after the whole batch has joined.
pub const BUILD_REPORT_FILE: &str = "build-report.json";

/// Generated hydration entrypoint name inside a page's temporary directory.
pub const HYDRATION_ENTRY_FILE: &str = "entry.tsx";

/// File stem marking a layout module.
pub const LAYOUT_STEM: &str = "__layout";

/// Source extensions recognized as page or layout modules.
pub const MODULE_EXTENSIONS: &[&str] = &["tsx", "jsx"];

// ============================================================================
// Environment
// ============================================================================

/// Unix-domain socket path of the props store.
pub const ENV_PROPS_SOCKET: &str = "SCHORLE_PROPS_SOCKET";

/// TCP host of the props store.
pub const ENV_PROPS_HOST: &str = "SCHORLE_PROPS_HOST";

/// TCP port of the props store.
pub const ENV_PROPS_PORT: &str = "SCHORLE_PROPS_PORT";

/// Props store timeout in milliseconds.
pub const ENV_PROPS_TIMEOUT_MS: &str = "SCHORLE_PROPS_TIMEOUT_MS";

/// Bundler executable.
pub const ENV_BUNDLER: &str = "SCHORLE_BUNDLER";

/// Server render runtime executable.
pub const ENV_RUNTIME: &str = "SCHORLE_RUNTIME";

/// Maximum concurrent bundler invocations.
pub const ENV_BUILD_CONCURRENCY: &str = "SCHORLE_BUILD_CONCURRENCY";

/// Public URL prefix of built assets.
pub const ENV_ASSET_PREFIX: &str = "SCHORLE_ASSET_PREFIX";

/// Import specifier of the client hydrator.
pub const ENV_HYDRATOR_MODULE: &str = "SCHORLE_HYDRATOR_MODULE";

// ============================================================================
// Timeouts
// ============================================================================

/// Default props store round-trip timeout.
///
/// A hung backend must fail the request within this bound rather than
/// hang the renderer.
pub const DEFAULT_PROPS_TIMEOUT: Duration = Duration::from_millis(1500);

// ============================================================================
// Defaults
// ============================================================================

/// Default bundler and render runtime executable.
pub const DEFAULT_RUNTIME: &str = "bun";

/// Default public URL prefix of built assets.
pub const DEFAULT_ASSET_PREFIX: &str = "/.schorle/dist";

/// Default import specifier of the client hydrator.
pub const DEFAULT_HYDRATOR_MODULE: &str = "schorle/hydrate";

// ============================================================================
// Markup
// ============================================================================

/// Inbound request header carrying the props handle.
pub const PROPS_HANDLE_HEADER: &str = "x-schorle-props-id";

/// DOM id of the serialized hydration envelope.
pub const HYDRATION_SCRIPT_ID: &str = "__SCHORLE_HYDRATION__";

/// Local storage key the theme script reads.
pub const THEME_STORAGE_KEY: &str = "theme";

/// Closing head tag the render transform injects before.
pub const HEAD_CLOSE: &[u8] = b"</head>";
