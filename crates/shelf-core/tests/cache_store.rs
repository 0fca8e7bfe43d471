use std::sync::{Arc, Mutex};
use std::time::Duration;

use shelf_core::cache::{PackageCache, cache_key};
use shelf_core::models::{PackageRecord, PackageSource};

fn record(name: &str) -> PackageRecord {
    PackageRecord {
        id: PackageRecord::record_id(PackageSource::Debian, name),
        name: name.to_string(),
        summary: format!("{name} summary"),
        description: format!("{name} description"),
        icon: "package-x-generic".to_string(),
        version: "1.0".to_string(),
        size: 2048,
        category: None,
        developer: "Unknown".to_string(),
        license: "Unknown".to_string(),
        homepage: String::new(),
        screenshots: Vec::new(),
        source: PackageSource::Debian,
        installed: false,
        rating: 0.0,
    }
}

#[tokio::test]
async fn set_then_get_returns_the_same_records() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PackageCache::open(dir.path().join("packages-cache.json"));
    let key = cache_key(PackageSource::Debian, "Vim");

    cache.set(&key, vec![record("vim")], "Vim");

    assert!(cache.has(&key));
    assert_eq!(cache.get(&key).unwrap(), vec![record("vim")]);
    assert_eq!(cache.get("debian:emacs"), None);
    assert!(!cache.has("debian:emacs"));
}

#[tokio::test]
async fn returned_records_are_independent_copies() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PackageCache::open(dir.path().join("packages-cache.json"));

    cache.set("debian:vim", vec![record("vim")], "vim");
    let mut copy = cache.get("debian:vim").unwrap();
    copy[0].name = "mutated".to_string();

    assert_eq!(cache.get("debian:vim").unwrap()[0].name, "vim");
}

#[tokio::test]
async fn only_overwrites_notify_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PackageCache::open(dir.path().join("packages-cache.json"));
    let mut subscription = cache.subscribe("debian:vim");

    cache.set("debian:vim", vec![record("vim")], "vim");
    assert!(subscription.try_recv().is_none());

    cache.set("debian:vim", vec![record("vim"), record("vim-tiny")], "vim");
    cache.set("debian:vim", vec![record("neovim")], "vim");

    let first = subscription.recv().await.unwrap();
    assert_eq!(first.key, "debian:vim");
    assert_eq!(first.data.len(), 2);
    let second = subscription.recv().await.unwrap();
    assert_eq!(second.data[0].name, "neovim");
    assert!(subscription.try_recv().is_none());
}

#[tokio::test]
async fn identical_overwrites_still_notify() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PackageCache::open(dir.path().join("packages-cache.json"));
    cache.set("debian:vim", vec![record("vim")], "vim");
    let mut subscription = cache.subscribe("debian:vim");

    cache.set("debian:vim", vec![record("vim")], "vim");
    cache.set("debian:vim", vec![record("vim")], "vim");

    for _ in 0..2 {
        let update = subscription.recv().await.unwrap();
        assert_eq!(*update.data, vec![record("vim")]);
    }
    assert!(subscription.try_recv().is_none());
}

#[tokio::test]
async fn subscribers_only_see_their_own_key() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PackageCache::open(dir.path().join("packages-cache.json"));
    cache.set("debian:vim", vec![record("vim")], "vim");
    cache.set("debian:emacs", vec![record("emacs")], "emacs");

    let mut vim_watcher = cache.subscribe("debian:vim");
    cache.set("debian:emacs", vec![record("emacs-nox")], "emacs");

    assert!(vim_watcher.try_recv().is_none());
}

#[tokio::test]
async fn every_subscriber_of_a_key_is_notified() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PackageCache::open(dir.path().join("packages-cache.json"));
    cache.set("flatpak:gimp", vec![record("gimp")], "gimp");

    let mut first = cache.subscribe("flatpak:gimp");
    let mut second = cache.subscribe("flatpak:gimp");
    assert_ne!(first.id(), second.id());
    assert_eq!(cache.subscriber_count("flatpak:gimp"), 2);

    cache.set("flatpak:gimp", vec![record("gimp"), record("gimp-data")], "gimp");

    assert_eq!(first.recv().await.unwrap().data.len(), 2);
    assert_eq!(second.recv().await.unwrap().data.len(), 2);
}

#[tokio::test]
async fn unsubscribing_the_last_observer_drops_the_key() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PackageCache::open(dir.path().join("packages-cache.json"));
    cache.set("debian:vim", vec![record("vim")], "vim");

    let mut subscription = cache.subscribe("debian:vim");
    assert!(cache.unsubscribe("debian:vim", subscription.id()));
    assert!(!cache.unsubscribe("debian:vim", subscription.id()));
    assert_eq!(cache.subscriber_count("debian:vim"), 0);

    cache.set("debian:vim", vec![record("vim")], "vim");
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn callback_subscribers_run_on_their_own_task() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PackageCache::open(dir.path().join("packages-cache.json"));
    cache.set("debian:vim", vec![record("vim")], "vim");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    cache.subscribe_with("debian:vim", move |update| {
        sink.lock().unwrap().push(update.data.len());
        let _ = done_tx.send(());
    });

    cache.set("debian:vim", vec![record("vim"), record("gvim")], "vim");
    tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn clear_removes_everything_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packages-cache.json");
    let cache = PackageCache::open(&path);
    cache.set("debian:vim", vec![record("vim"), record("vim-tiny")], "vim");
    cache.set("flatpak:gimp", vec![record("gimp")], "gimp");

    let stats = cache.stats();
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.total_record_count, 3);

    cache.clear();
    cache.flush().await;

    assert!(!cache.has("debian:vim"));
    assert_eq!(cache.stats().entry_count, 0);
    let reopened = PackageCache::open(&path);
    assert_eq!(reopened.stats().entry_count, 0);
}

#[tokio::test]
async fn persisted_document_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/shelf/packages-cache.json");
    {
        let cache = PackageCache::open(&path);
        for index in 0..20 {
            cache.set("debian:vim", vec![record(&format!("vim{index}"))], "vim");
        }
        cache.flush().await;
    }

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["debian:vim"]["query"], "vim");
    assert!(raw["debian:vim"]["timestamp"].as_u64().unwrap() > 0);
    assert_eq!(raw["debian:vim"]["data"][0]["id"], "deb:vim19");
    assert_eq!(raw["debian:vim"]["data"][0]["source"], "debian");

    let reopened = PackageCache::open(&path);
    assert_eq!(reopened.get("debian:vim").unwrap()[0].name, "vim19");
}

#[tokio::test]
async fn corrupt_document_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packages-cache.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let cache = PackageCache::open(&path);
    assert_eq!(cache.stats().entry_count, 0);

    cache.set("debian:vim", vec![record("vim")], "vim");
    cache.flush().await;
    assert!(PackageCache::open(&path).has("debian:vim"));
}

#[tokio::test]
async fn entries_never_expire_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packages-cache.json");
    std::fs::write(
        &path,
        r#"{"debian:vim":{"data":[],"timestamp":1,"query":"vim"}}"#,
    )
    .unwrap();

    let cache = PackageCache::open(&path);
    assert!(cache.has("debian:vim"));
    assert_eq!(cache.clear_expired(), 0);
    assert_eq!(cache.get("debian:vim"), Some(Vec::new()));
}

#[tokio::test]
async fn bounded_age_sweeps_old_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packages-cache.json");
    std::fs::write(
        &path,
        r#"{"debian:vim":{"data":[],"timestamp":1,"query":"vim"},"debian:emacs":{"data":[],"timestamp":1,"query":"emacs"}}"#,
    )
    .unwrap();

    let cache = PackageCache::open(&path).with_max_age(Some(Duration::from_secs(60)));
    cache.set("flatpak:gimp", vec![record("gimp")], "gimp");

    assert!(!cache.has("debian:vim"));
    assert_eq!(cache.clear_expired(), 1);
    assert!(cache.has("flatpak:gimp"));
}

#[test]
fn writes_synchronously_outside_a_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packages-cache.json");

    let cache = PackageCache::open(&path);
    cache.set("debian:vim", vec![record("vim")], "vim");

    assert!(PackageCache::open(&path).has("debian:vim"));
}


#[tokio::test]
async fn dropping_without_flush_keeps_the_latest_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packages-cache.json");

    let cache = PackageCache::open(&path);
    cache.set("debian:vim", vec![record("vim")], "vim");
    cache.set("flatpak:gimp", vec![record("gimp")], "gimp");
    drop(cache);

    let reopened = PackageCache::open(&path);
    assert!(reopened.has("debian:vim"));
    assert!(reopened.has("flatpak:gimp"));

    reopened.clear();
    drop(reopened);
    assert_eq!(PackageCache::open(&path).stats().entry_count, 0);
}

#[test]
fn keeps_saving_after_its_first_runtime_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packages-cache.json");
    let cache = PackageCache::open(&path);

    let first = tokio::runtime::Runtime::new().unwrap();
    first.block_on(async {
        cache.set("debian:vim", vec![record("vim")], "vim");
        cache.flush().await;
    });
    drop(first);

    let second = tokio::runtime::Runtime::new().unwrap();
    second.block_on(async {
        cache.set("flatpak:gimp", vec![record("gimp")], "gimp");
        tokio::time::timeout(Duration::from_secs(5), cache.flush())
            .await
            .unwrap();
    });

    let reopened = PackageCache::open(&path);
    assert!(reopened.has("debian:vim"));
    assert!(reopened.has("flatpak:gimp"));
}
