//! SSR renderer against a fake render engine.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use schorle_bridge::constants::{HYDRATION_SCRIPT_ID, PROPS_HANDLE_HEADER};
use schorle_bridge::props::{codec, PropsError};
use schorle_bridge::render::{ChunkStream, RenderEngine, RenderRequest};
use schorle_bridge::{
    Config, ManifestEntry, ManifestStore, PropsStoreConfig, PropsTransport, RenderError,
    RenderNode, RequestContext, SsrRenderer,
};
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

/// Replays fixed chunks and records what it was asked to render.
struct FakeEngine {
    chunks: Vec<Result<&'static str, &'static str>>,
    requests: Mutex<Vec<RenderRequest>>,
    pulled: Arc<AtomicUsize>,
}

impl FakeEngine {
    fn new(chunks: Vec<Result<&'static str, &'static str>>) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            requests: Mutex::new(Vec::new()),
            pulled: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn render(&self, request: &RenderRequest) -> io::Result<ChunkStream> {
        self.requests.lock().unwrap().push(request.clone());
        let items: Vec<io::Result<Bytes>> = self
            .chunks
            .iter()
            .map(|chunk| match chunk {
                Ok(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
                Err(message) => Err(io::Error::other(message.to_string())),
            })
            .collect();
        let pulled = Arc::clone(&self.pulled);
        Ok(Box::pin(stream::iter(items).inspect(move |_| {
            pulled.fetch_add(1, Ordering::SeqCst);
        })))
    }
}

/// Sink whose client has disconnected.
struct ClosedSink;

impl AsyncWrite for ClosedSink {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

const DOCUMENT: &[Result<&str, &str>] = &[
    Ok("<!DOCTYPE html><html><head><title>Profile</title></hea"),
    Ok("d><body><p>3 users</p></body></html>"),
];

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Project with `settings/Profile` built (manifest present) and `Index`
/// discovered but never built.
fn project() -> (TempDir, Config, PathBuf) {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "app/pages/__layout.tsx",
        "export default function Root({ children }) { return children; }\n",
    );
    write(
        tmp.path(),
        "app/pages/Index.tsx",
        "export default function Index() { return null; }\n",
    );
    write(
        tmp.path(),
        "app/pages/settings/Profile.tsx",
        "export default function Profile() { return null; }\n",
    );

    let socket = tmp.path().join("props.sock");
    let mut config = Config::new(tmp.path());
    config.props_store = Some(PropsStoreConfig {
        transport: PropsTransport::Unix(socket.clone()),
        timeout: Duration::from_millis(1500),
    });

    ManifestStore::new(config.dist_dir())
        .write(
            "settings/Profile",
            &ManifestEntry {
                js: "entry.js".to_string(),
                css: Some("entry.css".to_string()),
            },
        )
        .unwrap();

    (tmp, config, socket)
}

#[tokio::test]
async fn test_injects_hydration_data_across_chunk_split() {
    let (_tmp, config, _socket) = project();
    let engine = FakeEngine::new(DOCUMENT.to_vec());
    let renderer = SsrRenderer::new(&config, engine.clone()).unwrap();

    let mut out = Vec::new();
    let summary = renderer
        .render("settings/Profile", &RequestContext::new(), &mut out)
        .await
        .unwrap();
    let html = String::from_utf8(out).unwrap();

    assert!(summary.injected);
    assert_eq!(summary.bytes_written, html.len());
    assert!(html.starts_with("<!DOCTYPE html><html><head><title>Profile</title><script"));
    assert!(html.ends_with("</script></head><body><p>3 users</p></body></html>"));
    assert_eq!(html.matches("</head>").count(), 1);

    let script = html.find(HYDRATION_SCRIPT_ID).unwrap();
    let preload = html
        .find(r#"<link rel="preload" href="/.schorle/dist/settings/Profile/entry.css" as="style">"#)
        .unwrap();
    let stylesheet = html
        .find(r#"<link rel="stylesheet" href="/.schorle/dist/settings/Profile/entry.css">"#)
        .unwrap();
    let theme = html.find("localStorage.getItem(\"theme\")").unwrap();
    let head_close = html.find("</head>").unwrap();
    assert!(script < preload && preload < stylesheet && stylesheet < theme && theme < head_close);

    assert!(html.contains(r#"{"pagePath":"settings/Profile.tsx","layoutPaths":["__layout.tsx"]}"#));
}

#[tokio::test]
async fn test_engine_receives_composed_tree_and_bootstrap() {
    let (_tmp, config, _socket) = project();
    let engine = FakeEngine::new(DOCUMENT.to_vec());
    let renderer = SsrRenderer::new(&config, engine.clone()).unwrap();

    renderer
        .render("settings/Profile", &RequestContext::new(), &mut Vec::new())
        .await
        .unwrap();

    let requests = engine.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.bootstrap_script, "/.schorle/dist/settings/Profile/entry.js");
    assert_eq!(
        request.tree,
        RenderNode::Layout {
            module: config.pages_dir().join("__layout.tsx"),
            child: Box::new(RenderNode::Page {
                identity: "settings/Profile".to_string(),
                module: config.pages_dir().join("settings/Profile.tsx"),
            }),
        }
    );
}

#[tokio::test]
async fn test_unbuilt_page_is_not_found() {
    let (_tmp, config, _socket) = project();
    let engine = FakeEngine::new(DOCUMENT.to_vec());
    let renderer = SsrRenderer::new(&config, engine.clone()).unwrap();

    let mut out = Vec::new();
    let err = renderer
        .render("Index", &RequestContext::new(), &mut out)
        .await
        .unwrap_err();

    assert!(err.is_not_found(), "got {err:?}");
    assert!(err.to_string().contains("Index"));
    assert!(out.is_empty());
    assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn test_path_like_identity_is_not_found() {
    let (_tmp, config, _socket) = project();
    let renderer = SsrRenderer::new(&config, FakeEngine::new(DOCUMENT.to_vec())).unwrap();

    let err = renderer
        .render("../settings/Profile", &RequestContext::new(), &mut Vec::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_no_handle_means_no_props_fetch() {
    // Nothing listens on the socket; a fetch would fail.
    let (_tmp, config, _socket) = project();
    let engine = FakeEngine::new(DOCUMENT.to_vec());
    let renderer = SsrRenderer::new(&config, engine.clone()).unwrap();

    let summary = renderer
        .render("settings/Profile", &RequestContext::new(), &mut Vec::new())
        .await
        .unwrap();

    assert!(!summary.with_props);
    assert_eq!(engine.requests()[0].props, None);
}

#[tokio::test]
async fn test_props_are_fetched_for_handle() {
    let (_tmp, config, socket) = project();
    let listener = UnixListener::bind(&socket).unwrap();
    let store = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let mut stream = reader.into_inner();
        let mut reply = codec::encode(&json!({ "totalUsers": 3 })).unwrap();
        reply.extend_from_slice(b"\n ");
        stream.write_all(&reply).await.unwrap();
        stream.shutdown().await.unwrap();
        line
    });

    let engine = FakeEngine::new(DOCUMENT.to_vec());
    let renderer = SsrRenderer::new(&config, engine.clone()).unwrap();
    let ctx = RequestContext::new().with_header(PROPS_HANDLE_HEADER, "abc123");

    let summary = renderer
        .render("settings/Profile", &ctx, &mut Vec::new())
        .await
        .unwrap();

    assert!(summary.with_props);
    assert_eq!(store.await.unwrap(), "GET /abc123\n");
    assert_eq!(engine.requests()[0].props, Some(json!({ "totalUsers": 3 })));
}

#[tokio::test]
async fn test_props_failure_fails_render() {
    let (_tmp, config, _socket) = project();
    let engine = FakeEngine::new(DOCUMENT.to_vec());
    let renderer = SsrRenderer::new(&config, engine.clone()).unwrap();
    let ctx = RequestContext::new().with_header(PROPS_HANDLE_HEADER, "abc123");

    let mut out = Vec::new();
    let err = renderer
        .render("settings/Profile", &ctx, &mut out)
        .await
        .unwrap_err();

    match err {
        RenderError::Props { page, source } => {
            assert_eq!(page, "settings/Profile");
            assert_eq!(source.handle(), "abc123");
            assert!(matches!(source, PropsError::Unavailable { .. }));
        }
        other => panic!("expected props error, got {other:?}"),
    }
    assert!(out.is_empty());
    assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn test_client_abort_stops_pulling_chunks() {
    let (_tmp, config, _socket) = project();
    let mut chunks = vec![Ok("<html><head></head><body>")];
    chunks.extend(std::iter::repeat(Ok("<p>row</p>")).take(100));
    chunks.push(Ok("</body></html>"));
    let engine = FakeEngine::new(chunks);
    let renderer = SsrRenderer::new(&config, engine.clone()).unwrap();

    let err = renderer
        .render("settings/Profile", &RequestContext::new(), &mut ClosedSink)
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::ClientGone { .. }), "got {err:?}");
    assert!(engine.pulled.load(Ordering::SeqCst) < 102);
}

#[tokio::test]
async fn test_engine_failure_mid_stream() {
    let (_tmp, config, _socket) = project();
    let engine = FakeEngine::new(vec![Ok("<html><head></head><body>"), Err("worker crashed")]);
    let renderer = SsrRenderer::new(&config, engine).unwrap();

    let err = renderer
        .render("settings/Profile", &RequestContext::new(), &mut Vec::new())
        .await
        .unwrap_err();

    match err {
        RenderError::Engine { page, source } => {
            assert_eq!(page, "settings/Profile");
            assert!(source.to_string().contains("worker crashed"));
        }
        other => panic!("expected engine error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_markup_without_head_passes_through() {
    let (_tmp, config, _socket) = project();
    let engine = FakeEngine::new(vec![Ok("<div>fragment</div>")]);
    let renderer = SsrRenderer::new(&config, engine).unwrap();

    let mut out = Vec::new();
    let summary = renderer
        .render("settings/Profile", &RequestContext::new(), &mut out)
        .await
        .unwrap();

    assert!(!summary.injected);
    assert_eq!(out, b"<div>fragment</div>".to_vec());
}
