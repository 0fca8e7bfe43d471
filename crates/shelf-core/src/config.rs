use std::path::PathBuf;
use std::time::Duration;

const APP_DIR_NAME: &str = "shelf";
const CACHE_FILE_NAME: &str = "packages-cache.json";
const ICON_INDEX_FILE_NAME: &str = "appstream-icons.json";

pub const DEFAULT_CATALOG_URL: &str = "https://flathub.org";
pub const DEFAULT_MEDIA_URL: &str = "https://dl.flathub.org/media";
pub const DEFAULT_APPSTREAM_YAML_GLOB: &str = "/var/lib/app-info/yaml/*.yml.gz";

const DEFAULT_APPSTREAM_ICON_DIRS: &[&str] = &[
    "/var/lib/app-info/icons/debian-trixie-main/64x64",
    "/var/lib/app-info/icons/debian-trixie-contrib/64x64",
    "/var/lib/app-info/icons/debian-trixie-non-free/64x64",
    "/var/lib/app-info/icons/debian-trixie-main/128x128",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShelfConfig {
    pub cache_dir: PathBuf,
    pub catalog_url: String,
    pub media_url: String,
    pub command_timeout: Duration,
    pub mutation_timeout: Duration,
    pub http_timeout: Duration,
    pub result_limit: usize,
    pub section_limit: usize,
    pub appstream_yaml_glob: String,
    pub appstream_icon_dirs: Vec<PathBuf>,
}

impl Default for ShelfConfig {
    fn default() -> Self {
        let cache_root = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            cache_dir: cache_root.join(APP_DIR_NAME),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            media_url: DEFAULT_MEDIA_URL.to_string(),
            command_timeout: Duration::from_secs(60),
            mutation_timeout: Duration::from_secs(30 * 60),
            http_timeout: Duration::from_secs(30),
            result_limit: 50,
            section_limit: 20,
            appstream_yaml_glob: DEFAULT_APPSTREAM_YAML_GLOB.to_string(),
            appstream_icon_dirs: DEFAULT_APPSTREAM_ICON_DIRS
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

impl ShelfConfig {
    /// Defaults with `SHELF_CACHE_DIR` and `SHELF_CATALOG_URL` applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = env_value("SHELF_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_value("SHELF_CATALOG_URL") {
            config.catalog_url = url;
        }
        config
    }

    pub fn cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn catalog_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn result_limit(mut self, limit: usize) -> Self {
        self.result_limit = limit;
        self
    }

    pub fn appstream_yaml_glob(mut self, glob: impl Into<String>) -> Self {
        self.appstream_yaml_glob = glob.into();
        self
    }

    pub fn appstream_icon_dirs(mut self, dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.appstream_icon_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE_NAME)
    }

    pub fn icon_index_file(&self) -> PathBuf {
        self.cache_dir.join(ICON_INDEX_FILE_NAME)
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
