use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Deserialize;

use crate::adapters::{AdapterResult, log_mutation_error, mutation_succeeded};
use crate::cache::{PackageCache, cache_key};
use crate::config::DEFAULT_MEDIA_URL;
use crate::execution::{CommandSpec, ProcessOutput, ProcessSpawnRequest, SourceFuture};
use crate::models::{CoreError, CoreErrorKind, PackageAction, PackageRecord, PackageSource};

const FLATHUB_REMOTE: &str = "flathub";

/// Raw access to the Flathub catalog and the local `flatpak` tool.
pub trait FlatpakSource: Send + Sync {
    /// Body of the catalog search endpoint for `query`.
    fn search<'a>(&'a self, query: &'a str) -> SourceFuture<'a, String>;

    /// Body of the catalog appstream endpoint for `app_id`.
    fn appstream<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a, String>;

    /// One installed application id per line.
    fn installed_apps(&self) -> SourceFuture<'_, String>;

    fn install<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a, ProcessOutput>;

    fn uninstall<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a, ProcessOutput>;
}

pub fn flatpak_list_installed_request() -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        PackageSource::Flatpak,
        PackageAction::InstalledState,
        CommandSpec::new("flatpak").args(["list", "--app", "--columns=application"]),
    )
}

pub fn flatpak_install_request(app_id: &str) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        PackageSource::Flatpak,
        PackageAction::Install,
        CommandSpec::new("flatpak")
            .args(["install", "-y", FLATHUB_REMOTE])
            .arg(app_id),
    )
}

pub fn flatpak_uninstall_request(app_id: &str) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        PackageSource::Flatpak,
        PackageAction::Remove,
        CommandSpec::new("flatpak")
            .args(["uninstall", "-y"])
            .arg(app_id),
    )
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

/// Flatpak application ids are reverse-DNS names.
pub(crate) fn is_valid_app_id(app_id: &str) -> bool {
    !app_id.is_empty()
        && !app_id.starts_with(['-', '.'])
        && app_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
}

/// Maps a freedesktop main category to the store taxonomy.
pub fn flatpak_category(category: &str) -> &'static str {
    match category {
        "AudioVideo" => "Multimedia",
        "Development" => "Development",
        "Education" => "Education",
        "Game" => "Games",
        "Graphics" => "Graphics",
        "Network" => "Internet",
        "Office" => "Office",
        "Science" => "Education",
        "Settings" => "System",
        "System" => "System",
        "Utility" => "Utilities",
        _ => "Other",
    }
}

/// Installed application ids, one per non-empty line.
pub fn parse_installed_apps(output: &str) -> HashSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    hits: Option<Vec<FlathubApp>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FlathubApp {
    app_id: Option<String>,
    id: Option<String>,
    name: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    version: Option<String>,
    versions: Option<Vec<FlathubRelease>>,
    download_size: Option<f64>,
    categories: Option<Vec<String>>,
    developer_name: Option<String>,
    project_group: Option<String>,
    project_license: Option<String>,
    urls: Option<FlathubUrls>,
    screenshots: Option<Vec<Screenshot>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FlathubRelease {
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FlathubUrls {
    homepage: Option<String>,
}

/// The catalog has shipped screenshots both as bare URLs and as objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Screenshot {
    Url(String),
    Entry {
        #[serde(default)]
        url: Option<String>,
    },
    Other(serde_json::Value),
}

impl Screenshot {
    fn into_url(self) -> Option<String> {
        match self {
            Self::Url(url) => Some(url),
            Self::Entry { url } => url,
            Self::Other(_) => None,
        }
        .filter(|url| !url.is_empty())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

impl FlathubApp {
    fn into_record(self, installed: &HashSet<String>, media_url: &str) -> Option<PackageRecord> {
        let app_id = non_empty(self.app_id).or_else(|| non_empty(self.id))?;
        let summary = non_empty(self.summary);
        let version = self
            .versions
            .and_then(|versions| versions.into_iter().next())
            .and_then(|release| non_empty(release.version))
            .or_else(|| non_empty(self.version));
        let category = self
            .categories
            .and_then(|categories| categories.into_iter().next())
            .unwrap_or_default();

        Some(PackageRecord {
            id: PackageRecord::record_id(PackageSource::Flatpak, &app_id),
            name: non_empty(self.name).unwrap_or_else(|| app_id.clone()),
            description: non_empty(self.description)
                .or_else(|| summary.clone())
                .unwrap_or_default(),
            summary: summary.unwrap_or_default(),
            icon: format!("{media_url}/{app_id}.png"),
            version: version.unwrap_or_default(),
            size: self
                .download_size
                .filter(|size| size.is_finite() && *size > 0.0)
                .map_or(0, |size| size as u64),
            category: Some(flatpak_category(&category).to_string()),
            developer: non_empty(self.developer_name)
                .or_else(|| non_empty(self.project_group))
                .unwrap_or_else(|| "Unknown".to_string()),
            license: non_empty(self.project_license).unwrap_or_else(|| "Unknown".to_string()),
            homepage: self
                .urls
                .and_then(|urls| non_empty(urls.homepage))
                .unwrap_or_default(),
            screenshots: self
                .screenshots
                .unwrap_or_default()
                .into_iter()
                .filter_map(Screenshot::into_url)
                .collect(),
            source: PackageSource::Flatpak,
            installed: installed.contains(&app_id),
            rating: 0.0,
        })
    }
}

fn parse_failure(action: PackageAction, error: serde_json::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::ParseFailure,
        format!("invalid catalog response: {error}"),
    )
    .origin(PackageSource::Flatpak)
    .action(action)
}

/// Parses a search response, keeping at most `limit` hits.
pub(crate) fn parse_search_response(
    body: &str,
    limit: usize,
    installed: &HashSet<String>,
    media_url: &str,
) -> AdapterResult<Vec<PackageRecord>> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|error| parse_failure(PackageAction::Search, error))?;
    Ok(response
        .hits
        .unwrap_or_default()
        .into_iter()
        .take(limit)
        .filter_map(|hit| hit.into_record(installed, media_url))
        .collect())
}

pub(crate) fn parse_appstream_response(
    body: &str,
    installed: &HashSet<String>,
    media_url: &str,
) -> AdapterResult<Option<PackageRecord>> {
    let app: FlathubApp =
        serde_json::from_str(body).map_err(|error| parse_failure(PackageAction::Details, error))?;
    Ok(app.into_record(installed, media_url))
}

pub struct FlatpakResolver {
    source: Arc<dyn FlatpakSource>,
    cache: Arc<PackageCache>,
    media_url: String,
    result_limit: usize,
}

impl FlatpakResolver {
    pub fn new(source: Arc<dyn FlatpakSource>, cache: Arc<PackageCache>) -> Self {
        Self {
            source,
            cache,
            media_url: DEFAULT_MEDIA_URL.to_string(),
            result_limit: 50,
        }
    }

    pub fn media_url(mut self, url: impl Into<String>) -> Self {
        self.media_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn result_limit(mut self, limit: usize) -> Self {
        self.result_limit = limit;
        self
    }

    /// Cached catalog search. Network and parse failures give an empty list
    /// and leave the cache untouched.
    pub async fn search(&self, query: &str) -> Vec<PackageRecord> {
        let key = cache_key(PackageSource::Flatpak, query);
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }
        self.refresh(query).await
    }

    /// Fetches `query` from the catalog and overwrites its cache entry. A
    /// blank query never reaches the catalog and is not cached.
    pub async fn refresh(&self, query: &str) -> Vec<PackageRecord> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let key = cache_key(PackageSource::Flatpak, query);
        let body = match self.source.search(query).await {
            Ok(body) => body,
            Err(error) => {
                tracing::error!(
                    query,
                    kind = ?error.kind,
                    message = %error.message,
                    "flatpak catalog search failed"
                );
                return Vec::new();
            }
        };

        let installed = self.installed_apps().await;
        match parse_search_response(&body, self.result_limit, &installed, &self.media_url) {
            Ok(records) => {
                tracing::debug!(key = %key, records = records.len(), "flatpak search resolved");
                self.cache.set(&key, records.clone(), query);
                records
            }
            Err(error) => {
                tracing::error!(query, message = %error.message, "unreadable flatpak search response");
                Vec::new()
            }
        }
    }

    pub async fn details(&self, app_id: &str) -> Option<PackageRecord> {
        if !is_valid_app_id(app_id) {
            tracing::warn!(app_id, "ignoring invalid flatpak application id");
            return None;
        }

        let body = match self.source.appstream(app_id).await {
            Ok(body) if !body.trim().is_empty() => body,
            Ok(_) => return None,
            Err(error) => {
                tracing::error!(
                    app_id,
                    kind = ?error.kind,
                    message = %error.message,
                    "flatpak detail fetch failed"
                );
                return None;
            }
        };

        let installed = self.installed_apps().await;
        parse_appstream_response(&body, &installed, &self.media_url).unwrap_or_else(|error| {
            tracing::error!(app_id, message = %error.message, "unreadable flatpak detail response");
            None
        })
    }

    pub async fn install(&self, app_id: &str) -> bool {
        if !self.accepts_mutation(PackageAction::Install, app_id) {
            return false;
        }
        let result = self.source.install(app_id).await;
        finish_mutation(PackageAction::Install, app_id, result)
    }

    pub async fn remove(&self, app_id: &str) -> bool {
        if !self.accepts_mutation(PackageAction::Remove, app_id) {
            return false;
        }
        let result = self.source.uninstall(app_id).await;
        finish_mutation(PackageAction::Remove, app_id, result)
    }

    fn accepts_mutation(&self, action: PackageAction, app_id: &str) -> bool {
        let valid = is_valid_app_id(app_id);
        if !valid {
            tracing::warn!(app_id, action = ?action, "refusing to act on invalid application id");
        }
        valid
    }

    /// Listed once per resolution. A missing `flatpak` binary means nothing
    /// is installed.
    async fn installed_apps(&self) -> HashSet<String> {
        match self.source.installed_apps().await {
            Ok(output) => parse_installed_apps(&output),
            Err(error) => {
                tracing::debug!(
                    kind = ?error.kind,
                    message = %error.message,
                    "could not list installed flatpak apps"
                );
                HashSet::new()
            }
        }
    }
}

fn finish_mutation(
    action: PackageAction,
    app_id: &str,
    result: AdapterResult<ProcessOutput>,
) -> bool {
    match result {
        Ok(output) => mutation_succeeded(PackageSource::Flatpak, action, app_id, &output),
        Err(error) => {
            log_mutation_error(PackageSource::Flatpak, action, app_id, &error);
            false
        }
    }
}
