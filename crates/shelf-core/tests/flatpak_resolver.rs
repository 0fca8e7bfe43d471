mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use shelf_core::adapters::{FlatpakResolver, FlatpakSource, HttpFlatpakSource};
use shelf_core::cache::PackageCache;
use shelf_core::execution::{ProcessOutput, SourceFuture};
use shelf_core::models::{CoreError, CoreErrorKind, PackageSource};
use support::ScriptedExecutor;

const SEARCH_FIXTURE: &str = include_str!("fixtures/flathub/search_gimp.json");
const APPSTREAM_FIXTURE: &str = include_str!("fixtures/flathub/appstream_gimp.json");

/// Catalog double: canned bodies, real `flatpak` invocations through a
/// scripted executor.
struct FakeCatalog {
    search_body: Result<String, CoreErrorKind>,
    appstream_body: Result<String, CoreErrorKind>,
    requests: AtomicUsize,
    tools: HttpFlatpakSource,
}

impl FakeCatalog {
    fn new(search_body: Result<&str, CoreErrorKind>, executor: Arc<ScriptedExecutor>) -> Self {
        Self {
            search_body: search_body.map(str::to_string),
            appstream_body: Ok(APPSTREAM_FIXTURE.to_string()),
            requests: AtomicUsize::new(0),
            tools: HttpFlatpakSource::new(executor),
        }
    }

    fn respond(&self, body: &Result<String, CoreErrorKind>) -> Result<String, CoreError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        body.clone()
            .map_err(|kind| CoreError::new(kind, "catalog unavailable").origin(PackageSource::Flatpak))
    }
}

impl FlatpakSource for FakeCatalog {
    fn search<'a>(&'a self, _query: &'a str) -> SourceFuture<'a, String> {
        let result = self.respond(&self.search_body);
        Box::pin(async move { result })
    }

    fn appstream<'a>(&'a self, _app_id: &'a str) -> SourceFuture<'a, String> {
        let result = self.respond(&self.appstream_body);
        Box::pin(async move { result })
    }

    fn installed_apps(&self) -> SourceFuture<'_, String> {
        self.tools.installed_apps()
    }

    fn install<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a, ProcessOutput> {
        self.tools.install(app_id)
    }

    fn uninstall<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a, ProcessOutput> {
        self.tools.uninstall(app_id)
    }
}

fn installed_executor() -> Arc<ScriptedExecutor> {
    Arc::new(
        ScriptedExecutor::new()
            .exact("flatpak list --app --columns=application", "org.gimp.GIMP\n")
            .exact("flatpak install -y flathub org.gimp.GIMP", "")
            .exact_failure("flatpak uninstall -y org.gimp.GIMP", 1, "error: org.gimp.GIMP not installed\n"),
    )
}

#[tokio::test]
async fn search_maps_hits_and_caches_them() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PackageCache::open(dir.path().join("packages-cache.json")));
    let executor = installed_executor();
    let catalog = Arc::new(FakeCatalog::new(Ok(SEARCH_FIXTURE), executor.clone()));
    let resolver = FlatpakResolver::new(catalog.clone(), cache.clone());

    let records = resolver.search("GIMP").await;

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, "flatpak:org.gimp.GIMP");
    assert_eq!(records[0].source, PackageSource::Flatpak);
    assert!(records[0].installed);
    assert!(!records[1].installed);
    assert_eq!(executor.calls_matching("flatpak list"), 1);
    assert!(cache.has("flatpak:gimp"));

    let again = resolver.search("gimp").await;
    assert_eq!(again, records);
    assert_eq!(catalog.requests.load(Ordering::SeqCst), 1);
    assert_eq!(executor.calls_matching("flatpak list"), 1);
}

#[tokio::test]
async fn network_failure_yields_empty_and_caches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PackageCache::open(dir.path().join("packages-cache.json")));
    let catalog = Arc::new(FakeCatalog::new(
        Err(CoreErrorKind::NetworkFailure),
        installed_executor(),
    ));
    let resolver = FlatpakResolver::new(catalog, cache.clone());

    assert!(resolver.search("gimp").await.is_empty());
    assert!(!cache.has("flatpak:gimp"));
}

#[tokio::test]
async fn blank_queries_skip_the_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PackageCache::open(dir.path().join("packages-cache.json")));
    let executor = installed_executor();
    let catalog = Arc::new(FakeCatalog::new(Ok(SEARCH_FIXTURE), executor.clone()));
    let resolver = FlatpakResolver::new(catalog.clone(), cache.clone());

    assert!(resolver.search("").await.is_empty());
    assert!(resolver.search("  ").await.is_empty());
    assert!(resolver.refresh("\t").await.is_empty());

    assert_eq!(catalog.requests.load(Ordering::SeqCst), 0);
    assert_eq!(executor.calls_matching("flatpak list"), 0);
    assert_eq!(cache.stats().entry_count, 0);
}

#[tokio::test]
async fn unparsable_body_yields_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PackageCache::open(dir.path().join("packages-cache.json")));
    let catalog = Arc::new(FakeCatalog::new(Ok("<!doctype html>"), installed_executor()));
    let resolver = FlatpakResolver::new(catalog, cache.clone());

    assert!(resolver.search("gimp").await.is_empty());
    assert_eq!(cache.stats().entry_count, 0);
}

#[tokio::test]
async fn missing_flatpak_binary_means_nothing_installed() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PackageCache::open(dir.path().join("packages-cache.json")));
    let catalog = Arc::new(FakeCatalog::new(
        Ok(SEARCH_FIXTURE),
        Arc::new(ScriptedExecutor::new()),
    ));
    let resolver = FlatpakResolver::new(catalog, cache);

    let records = resolver.search("gimp").await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| !record.installed));
}

#[tokio::test]
async fn details_use_the_appstream_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PackageCache::open(dir.path().join("packages-cache.json")));
    let catalog = Arc::new(FakeCatalog::new(Ok(SEARCH_FIXTURE), installed_executor()));
    let resolver = FlatpakResolver::new(catalog, cache.clone())
        .media_url("https://mirror.example.org/media/");

    let record = resolver.details("org.gimp.GIMP").await.unwrap();
    assert_eq!(record.version, "2.10.38");
    assert_eq!(record.icon, "https://mirror.example.org/media/org.gimp.GIMP.png");
    assert!(record.installed);
    assert_eq!(cache.stats().entry_count, 0);

    assert!(resolver.details("../../etc").await.is_none());
}

#[tokio::test]
async fn install_and_remove_use_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PackageCache::open(dir.path().join("packages-cache.json")));
    let executor = installed_executor();
    let catalog = Arc::new(FakeCatalog::new(Ok(SEARCH_FIXTURE), executor.clone()));
    let resolver = FlatpakResolver::new(catalog, cache);

    assert!(resolver.install("org.gimp.GIMP").await);
    assert!(!resolver.remove("org.gimp.GIMP").await);
    assert!(!resolver.install("--user").await);
    assert_eq!(
        executor.calls(),
        vec![
            "flatpak install -y flathub org.gimp.GIMP".to_string(),
            "flatpak uninstall -y org.gimp.GIMP".to_string(),
        ]
    );
}

#[tokio::test]
async fn refresh_overwrites_and_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PackageCache::open(dir.path().join("packages-cache.json")));
    let catalog = Arc::new(FakeCatalog::new(Ok(SEARCH_FIXTURE), installed_executor()));
    let resolver = FlatpakResolver::new(catalog.clone(), cache.clone());

    resolver.search("gimp").await;
    let mut subscription = cache.subscribe("flatpak:gimp");
    resolver.refresh("gimp").await;

    let update = subscription.recv().await.unwrap();
    assert_eq!(update.data.len(), 2);
    assert_eq!(catalog.requests.load(Ordering::SeqCst), 2);
}
