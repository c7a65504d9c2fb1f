//! Build orchestration against fake bundlers.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schorle_bridge::build::{
    BuildError, BuildOrchestrator, BundleError, BundleOutput, BundleRequest, Bundler,
    PageBuildError,
};
use schorle_bridge::{Config, ManifestEntry};
use tempfile::TempDir;

/// Writes a script (and optionally a stylesheet) derived from the entrypoint.
#[derive(Default)]
struct FakeBundler {
    fail: HashSet<String>,
    without_css: bool,
    without_js: bool,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeBundler {
    fn failing(pages: &[&str]) -> Self {
        Self {
            fail: pages.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Bundler for FakeBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, BundleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.contains(&request.identity) {
            return Err(BundleError::Failed {
                identity: request.identity.clone(),
                diagnostics: "Could not resolve \"./missing\"".to_string(),
            });
        }

        let source = fs::read_to_string(&request.entrypoint).unwrap();
        let mut artifacts = Vec::new();
        if !self.without_js {
            let js = request.outdir.join("entry.js");
            fs::write(&js, format!("/* bundled */\n{source}")).unwrap();
            artifacts.push(js);
        }
        if !self.without_css {
            let css = request.outdir.join("entry.css");
            fs::write(&css, "body{margin:0}").unwrap();
            artifacts.push(css);
        }
        Ok(BundleOutput { artifacts })
    }
}

/// Bundler whose executable cannot be started.
struct MissingBundler;

#[async_trait]
impl Bundler for MissingBundler {
    async fn bundle(&self, _request: &BundleRequest) -> Result<BundleOutput, BundleError> {
        Err(BundleError::Invocation {
            program: "bun".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// `app/pages/{__layout,Index,settings/Profile}.tsx`
fn project() -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let pages = "app/pages";
    write(
        tmp.path(),
        &format!("{pages}/__layout.tsx"),
        "export default function Root({ children }) { return <html><head></head><body>{children}</body></html>; }\n",
    );
    write(
        tmp.path(),
        &format!("{pages}/Index.tsx"),
        "export default function Index() { return <h1>Home</h1>; }\n",
    );
    write(
        tmp.path(),
        &format!("{pages}/settings/Profile.tsx"),
        "export default function Profile({ totalUsers }) { return <p>{totalUsers}</p>; }\n",
    );
    let mut config = Config::new(tmp.path());
    config.build_concurrency = 2;
    (tmp, config)
}

#[tokio::test]
async fn test_build_all_writes_manifests_registry_and_report() {
    let (_tmp, config) = project();
    let orchestrator = BuildOrchestrator::new(config.clone(), Arc::new(FakeBundler::default()));

    let result = orchestrator.build_all().await.unwrap();

    assert!(result.is_clean());
    let built: Vec<&str> = result.pages.iter().map(|p| p.page.identity.as_str()).collect();
    assert_eq!(built, vec!["Index", "settings/Profile"]);

    let store = orchestrator.store();
    assert_eq!(
        store.load("settings/Profile").unwrap(),
        Some(ManifestEntry {
            js: "entry.js".to_string(),
            css: Some("entry.css".to_string()),
        })
    );
    assert!(store.page_dir("settings/Profile").join("entry.js").is_file());
    assert!(store.page_dir("Index").join("entry.css").is_file());

    let registry = fs::read_to_string(config.registry_path()).unwrap();
    assert!(registry.contains("\"settings/Profile\": \"settings/Profile.tsx\""));
    assert!(registry.contains("\"__layout.tsx\": () => import("));
    assert!(config.render_worker_path().is_file());

    let report: serde_json::Value =
        serde_json::from_slice(&fs::read(config.build_report_path()).unwrap()).unwrap();
    assert_eq!(report["pages"]["Index"]["ok"], true);
    assert_eq!(report["pages"]["settings/Profile"]["ok"], true);
    assert!(report["finishedAt"].is_string());

    assert!(!config.tmp_dir().exists());
}

#[tokio::test]
async fn test_entrypoint_imports_root_layout() {
    let (_tmp, config) = project();
    let orchestrator = BuildOrchestrator::new(config.clone(), Arc::new(FakeBundler::default()));
    orchestrator.build_all().await.unwrap();

    let script =
        fs::read_to_string(orchestrator.store().page_dir("settings/Profile").join("entry.js"))
            .unwrap();
    let layout = config.pages_dir().join("__layout.tsx");
    assert!(script.contains(&format!("import Layout0 from \"{}\"", layout.display())));
    assert!(!script.contains("Layout1"));
}

#[tokio::test]
async fn test_page_failure_is_isolated() {
    let (_tmp, config) = project();
    let orchestrator =
        BuildOrchestrator::new(config.clone(), Arc::new(FakeBundler::failing(&["Index"])));

    let result = orchestrator.build_all().await.unwrap();

    assert_eq!(result.succeeded(), 1);
    assert!(!result.is_clean());
    let failed: Vec<_> = result.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].page.identity, "Index");
    match &failed[0].outcome {
        Err(PageBuildError::Bundle { identity, diagnostics }) => {
            assert_eq!(identity, "Index");
            assert!(diagnostics.contains("missing"));
        }
        other => panic!("expected bundle failure, got {other:?}"),
    }

    assert!(orchestrator.store().load("Index").unwrap().is_none());
    assert!(orchestrator.store().load("settings/Profile").unwrap().is_some());

    let report: serde_json::Value =
        serde_json::from_slice(&fs::read(config.build_report_path()).unwrap()).unwrap();
    assert_eq!(report["pages"]["Index"]["ok"], false);
    assert!(report["pages"]["Index"]["error"]
        .as_str()
        .unwrap()
        .contains("Index"));

    let registry = fs::read_to_string(config.registry_path()).unwrap();
    assert!(!registry.contains("\"Index\": \"Index.tsx\""));
}

#[tokio::test]
async fn test_failed_rebuild_removes_stale_manifest() {
    let (_tmp, config) = project();

    BuildOrchestrator::new(config.clone(), Arc::new(FakeBundler::default()))
        .build_all()
        .await
        .unwrap();

    let orchestrator =
        BuildOrchestrator::new(config, Arc::new(FakeBundler::failing(&["settings/Profile"])));
    assert!(orchestrator.store().load("settings/Profile").unwrap().is_some());

    orchestrator.build_all().await.unwrap();
    assert!(orchestrator.store().load("settings/Profile").unwrap().is_none());
    assert!(orchestrator.store().load("Index").unwrap().is_some());
}

#[tokio::test]
async fn test_missing_bundler_aborts_batch() {
    let (_tmp, config) = project();
    let orchestrator = BuildOrchestrator::new(config.clone(), Arc::new(MissingBundler));

    let err = orchestrator.build_all().await.unwrap_err();

    assert!(matches!(err, BuildError::BundlerInvocation { .. }), "got {err:?}");
    assert!(!config.tmp_dir().exists());
    assert!(!config.build_report_path().exists());
}

#[tokio::test]
async fn test_rebuild_is_byte_identical() {
    let (_tmp, config) = project();
    let orchestrator = BuildOrchestrator::new(config.clone(), Arc::new(FakeBundler::default()));

    orchestrator.build_all().await.unwrap();
    let manifest = fs::read(orchestrator.store().manifest_path("settings/Profile")).unwrap();
    let script = fs::read(orchestrator.store().page_dir("Index").join("entry.js")).unwrap();
    let registry = fs::read(config.registry_path()).unwrap();

    orchestrator.build_all().await.unwrap();
    assert_eq!(fs::read(orchestrator.store().manifest_path("settings/Profile")).unwrap(), manifest);
    assert_eq!(fs::read(orchestrator.store().page_dir("Index").join("entry.js")).unwrap(), script);
    assert_eq!(fs::read(config.registry_path()).unwrap(), registry);
}

#[tokio::test]
async fn test_dropped_stylesheet_is_removed_on_rebuild() {
    let (_tmp, config) = project();

    BuildOrchestrator::new(config.clone(), Arc::new(FakeBundler::default()))
        .build_all()
        .await
        .unwrap();

    let orchestrator = BuildOrchestrator::new(
        config,
        Arc::new(FakeBundler {
            without_css: true,
            ..FakeBundler::default()
        }),
    );
    orchestrator.build_all().await.unwrap();

    let store = orchestrator.store();
    assert_eq!(store.load("settings").unwrap(), None);
    let entry = store.load("settings/Profile").unwrap().unwrap();
    assert_eq!(entry.css, None);
    assert!(!store.page_dir("settings/Profile").join("entry.css").exists());
    assert!(store.page_dir("settings/Profile").join("entry.js").exists());
}

#[tokio::test]
async fn test_no_script_output_fails_page() {
    let (_tmp, config) = project();
    let orchestrator = BuildOrchestrator::new(
        config,
        Arc::new(FakeBundler {
            without_js: true,
            ..FakeBundler::default()
        }),
    );

    let result = orchestrator.build_all().await.unwrap();
    assert_eq!(result.succeeded(), 0);
    for failure in result.failures() {
        assert!(matches!(failure.outcome, Err(PageBuildError::NoScript { .. })));
    }
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let (tmp, mut config) = project();
    for n in 0..6 {
        write(
            tmp.path(),
            &format!("app/pages/blog/Post{n}.tsx"),
            "export default function Post() { return <article />; }\n",
        );
    }
    config.build_concurrency = 2;

    let bundler = Arc::new(FakeBundler {
        delay: Duration::from_millis(20),
        ..FakeBundler::default()
    });
    let orchestrator = BuildOrchestrator::new(config, bundler.clone());
    let result = orchestrator.build_all().await.unwrap();

    assert_eq!(result.pages.len(), 8);
    assert!(result.is_clean());
    assert_eq!(bundler.calls.load(Ordering::SeqCst), 8);
    assert!(bundler.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_modules_without_default_export_are_not_pages() {
    let (tmp, config) = project();
    write(
        tmp.path(),
        "app/pages/helpers.tsx",
        "export function format(n: number) { return n.toFixed(2); }\n",
    );

    let orchestrator = BuildOrchestrator::new(config, Arc::new(FakeBundler::default()));
    let result = orchestrator.build_all().await.unwrap();

    assert!(result.pages.iter().all(|p| p.page.identity != "helpers"));
    assert!(result.pages.iter().all(|p| p.page.identity != "__layout"));
}
