use std::sync::Arc;

use crate::adapters::{
    DebianResolver, FlatpakResolver, HttpFlatpakSource, ProcessDebianSource,
};
use crate::cache::PackageCache;
use crate::config::ShelfConfig;
use crate::execution::{ProcessExecutor, TokioProcessExecutor};
use crate::icons::{IconIndex, ProcessAppStreamCorpus};
use crate::models::{CacheStats, PackageRecord, PackageSource};

/// Single entry point for consumers: routes by [`PackageSource`] and exposes
/// the shared cache and icon index.
pub struct PackageService {
    debian: Arc<DebianResolver>,
    flatpak: Arc<FlatpakResolver>,
    cache: Arc<PackageCache>,
    icons: Arc<IconIndex>,
}

impl PackageService {
    /// Inside a tokio runtime the icon index starts loading in the
    /// background right away; elsewhere it loads on the first
    /// [`wait_for_icon_index`](Self::wait_for_icon_index).
    pub fn new(
        debian: Arc<DebianResolver>,
        flatpak: Arc<FlatpakResolver>,
        cache: Arc<PackageCache>,
        icons: Arc<IconIndex>,
    ) -> Self {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let icons = icons.clone();
            handle.spawn(async move { icons.initialize().await });
        }
        Self {
            debian,
            flatpak,
            cache,
            icons,
        }
    }

    /// Wires every component against the real system tools and Flathub.
    pub fn from_config(config: &ShelfConfig) -> Self {
        Self::with_executor(config, Arc::new(TokioProcessExecutor))
    }

    pub fn with_executor(config: &ShelfConfig, executor: Arc<dyn ProcessExecutor>) -> Self {
        let cache = Arc::new(PackageCache::open(config.cache_file()));

        let corpus = ProcessAppStreamCorpus::new(executor.clone(), config.appstream_yaml_glob.clone());
        let icons = Arc::new(IconIndex::new(
            config.icon_index_file(),
            Arc::new(corpus),
            config.appstream_icon_dirs.clone(),
        ));

        let debian_source = ProcessDebianSource::new(executor.clone())
            .command_timeout(config.command_timeout)
            .mutation_timeout(config.mutation_timeout);
        let debian = DebianResolver::new(Arc::new(debian_source), cache.clone(), icons.clone())
            .result_limit(config.result_limit);

        let flatpak_source = HttpFlatpakSource::new(executor)
            .catalog_url(config.catalog_url.clone())
            .http_timeout(config.http_timeout)
            .command_timeout(config.command_timeout)
            .mutation_timeout(config.mutation_timeout);
        let flatpak = FlatpakResolver::new(Arc::new(flatpak_source), cache.clone())
            .media_url(config.media_url.clone())
            .result_limit(config.result_limit);

        Self::new(Arc::new(debian), Arc::new(flatpak), cache, icons)
    }

    /// Loads or builds the icon index on the current runtime unless that has
    /// already happened. Debian results resolved before it is ready fall back
    /// to section icons.
    pub fn start_icon_index(&self) -> tokio::task::JoinHandle<()> {
        let icons = self.icons.clone();
        tokio::spawn(async move { icons.initialize().await })
    }

    pub async fn search(&self, source: PackageSource, query: &str) -> Vec<PackageRecord> {
        match source {
            PackageSource::Debian => self.search_debian(query).await,
            PackageSource::Flatpak => self.search_flatpak(query).await,
        }
    }

    /// Re-resolves `query` and overwrites its cache entry, notifying the
    /// key's subscribers.
    pub async fn refresh(&self, source: PackageSource, query: &str) -> Vec<PackageRecord> {
        match source {
            PackageSource::Debian => self.debian.refresh(query).await,
            PackageSource::Flatpak => self.flatpak.refresh(query).await,
        }
    }

    pub async fn search_debian(&self, query: &str) -> Vec<PackageRecord> {
        self.debian.search(query).await
    }

    pub async fn search_debian_uncached(&self, query: &str) -> Vec<PackageRecord> {
        self.debian.search_uncached(query).await
    }

    pub async fn search_flatpak(&self, query: &str) -> Vec<PackageRecord> {
        self.flatpak.search(query).await
    }

    pub async fn details(&self, source: PackageSource, name: &str) -> Option<PackageRecord> {
        match source {
            PackageSource::Debian => self.debian.details(name).await,
            PackageSource::Flatpak => self.flatpak.details(name).await,
        }
    }

    pub async fn flatpak_details(&self, app_id: &str) -> Option<PackageRecord> {
        self.flatpak.details(app_id).await
    }

    pub async fn install(&self, source: PackageSource, name: &str) -> bool {
        match source {
            PackageSource::Debian => self.debian.install(name).await,
            PackageSource::Flatpak => self.flatpak.install(name).await,
        }
    }

    pub async fn remove(&self, source: PackageSource, name: &str) -> bool {
        match source {
            PackageSource::Debian => self.debian.remove(name).await,
            PackageSource::Flatpak => self.flatpak.remove(name).await,
        }
    }

    pub async fn available_sections(&self) -> Vec<String> {
        self.debian.available_sections().await
    }

    pub async fn available_categories(&self) -> Vec<String> {
        self.debian.available_categories().await
    }

    pub async fn packages_by_section(&self, section: &str, limit: usize) -> Vec<PackageRecord> {
        self.debian.packages_by_section(section, limit).await
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn is_icon_index_ready(&self) -> bool {
        self.icons.is_ready()
    }

    /// Resolves once the icon index is ready, initializing it first when
    /// nothing has started it yet.
    pub async fn wait_for_icon_index(&self) {
        self.icons.initialize().await;
    }

    pub fn cache(&self) -> &Arc<PackageCache> {
        &self.cache
    }

    pub fn icons(&self) -> &Arc<IconIndex> {
        &self.icons
    }
}
