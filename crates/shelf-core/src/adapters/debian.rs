use std::collections::BTreeSet;
use std::sync::Arc;

use crate::adapters::{AdapterResult, log_mutation_error, mutation_succeeded};
use crate::cache::{PackageCache, cache_key};
use crate::execution::{CommandSpec, ProcessOutput, ProcessSpawnRequest, SourceFuture};
use crate::icons::{IconIndex, main_section};
use crate::models::{CoreError, CoreErrorKind, PackageAction, PackageRecord, PackageSource};

const DEFAULT_SECTIONS: &[&str] = &[
    "admin", "devel", "editors", "games", "gnome", "graphics", "kde", "mail", "net", "science",
    "sound", "text", "utils", "video", "web", "x11",
];

const DEFAULT_CATEGORIES: &[&str] = &[
    "Communication",
    "Education",
    "Engineering",
    "Games",
    "GNOME",
    "Graphics",
    "Internet",
    "KDE",
    "Multimedia",
    "Office",
    "Science",
    "System",
    "XFCE",
];

/// Sections that hold desktop applications. Everything else (libraries,
/// language modules, CLI tools, docs, fonts, translations, debug symbols)
/// stays searchable but is kept out of category browsing.
const SECTION_CATEGORIES: &[(&str, &str)] = &[
    ("games", "Games"),
    ("gnome", "GNOME"),
    ("kde", "KDE"),
    ("xfce", "XFCE"),
    ("graphics", "Graphics"),
    ("sound", "Multimedia"),
    ("video", "Multimedia"),
    ("web", "Internet"),
    ("mail", "Internet"),
    ("news", "Internet"),
    ("science", "Science"),
    ("education", "Education"),
    ("editors", "Office"),
    ("office", "Office"),
    ("otherosfs", "System"),
    ("hamradio", "Communication"),
    ("electronics", "Engineering"),
];

const INSTALLED_MARKER: &str = "install ok installed";

/// Raw access to the Debian package tools. Implementations return tool output
/// untouched; all interpretation happens in [`DebianResolver`].
pub trait DebianSource: Send + Sync {
    fn search_names<'a>(&'a self, query: &'a str) -> SourceFuture<'a, String>;

    fn show<'a>(&'a self, package: &'a str) -> SourceFuture<'a, String>;

    fn installed_status<'a>(&'a self, package: &'a str) -> SourceFuture<'a, String>;

    fn list_sections(&self) -> SourceFuture<'_, String>;

    /// Package names whose `Section:` starts with `section`, at most `limit`.
    /// Callers must pass a section accepted by [`is_valid_section`].
    fn names_in_section<'a>(&'a self, section: &'a str, limit: usize) -> SourceFuture<'a, String>;

    fn install<'a>(&'a self, package: &'a str) -> SourceFuture<'a, ProcessOutput>;

    fn remove<'a>(&'a self, package: &'a str) -> SourceFuture<'a, ProcessOutput>;
}

pub fn apt_search_request(query: &str) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        PackageSource::Debian,
        PackageAction::Search,
        CommandSpec::new("apt-cache")
            .args(["search", "--names-only"])
            .arg(query.to_lowercase()),
    )
}

pub fn apt_show_request(package: &str) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        PackageSource::Debian,
        PackageAction::Details,
        CommandSpec::new("apt-cache").arg("show").arg(package),
    )
}

pub fn dpkg_status_request(package: &str) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        PackageSource::Debian,
        PackageAction::InstalledState,
        CommandSpec::new("dpkg-query")
            .args(["-W", "-f=${Status}"])
            .arg(package),
    )
}

pub fn apt_install_request(package: &str) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        PackageSource::Debian,
        PackageAction::Install,
        CommandSpec::new("pkexec")
            .args(["apt-get", "install", "-y"])
            .arg(package),
    )
}

pub fn apt_remove_request(package: &str) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        PackageSource::Debian,
        PackageAction::Remove,
        CommandSpec::new("pkexec")
            .args(["apt-get", "remove", "-y"])
            .arg(package),
    )
}

pub fn apt_sections_request() -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        PackageSource::Debian,
        PackageAction::ListSections,
        CommandSpec::shell("apt-cache dumpavail | grep '^Section:' | cut -d' ' -f2 | sort -u"),
    )
}

/// The section is interpolated into a shell pipeline, so it is checked here
/// as well as by the resolver.
pub fn apt_section_packages_request(
    section: &str,
    limit: usize,
) -> AdapterResult<ProcessSpawnRequest> {
    if !is_valid_section(section) {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("'{section}' is not a valid Debian section name"),
        )
        .origin(PackageSource::Debian)
        .action(PackageAction::ListSection));
    }

    let script = format!(
        "apt-cache search --names-only . | head -n 1000 | awk '{{print $1}}' | xargs -I {{}} sh -c \"apt-cache show {{}} 2>/dev/null | grep -q '^Section: {section}' && echo {{}}\" | head -n {limit}"
    );
    Ok(ProcessSpawnRequest::new(
        PackageSource::Debian,
        PackageAction::ListSection,
        CommandSpec::shell(script),
    ))
}

/// Section names are lowercase ASCII with `+ . / -`, e.g. `contrib/games`.
pub fn is_valid_section(section: &str) -> bool {
    !section.is_empty()
        && section
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '+' | '.' | '/' | '-'))
}

/// Debian package names: lowercase alphanumerics plus `+ - .`, starting with
/// an alphanumeric so the name can never be read as an option.
fn is_valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first.is_ascii_digit())
        && chars.all(|ch| {
            ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '+' | '-' | '.')
        })
}

/// Desktop category for a Debian section, or `None` for sections that do not
/// hold desktop applications.
pub fn section_category(section: &str) -> Option<&'static str> {
    let section = main_section(section);
    SECTION_CATEGORIES
        .iter()
        .find(|(name, _)| *name == section)
        .map(|(_, category)| *category)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchCandidate {
    pub name: String,
    pub summary: String,
}

/// Parses `apt-cache search` lines of the form `<name> - <summary>`.
pub fn parse_search_output(output: &str) -> Vec<SearchCandidate> {
    output.lines().filter_map(parse_search_line).collect()
}

fn parse_search_line(line: &str) -> Option<SearchCandidate> {
    let line = line.trim_end();
    let name_end = line.find(char::is_whitespace)?;
    let (name, rest) = line.split_at(name_end);
    if name.is_empty() {
        return None;
    }

    let rest = rest.trim_start().strip_prefix('-')?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let summary = rest.trim_start();
    if summary.is_empty() {
        return None;
    }

    Some(SearchCandidate {
        name: name.to_string(),
        summary: summary.to_string(),
    })
}

/// The fields of one `apt-cache show` stanza that feed a [`PackageRecord`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DebianControl {
    pub package: Option<String>,
    pub version: Option<String>,
    pub section: Option<String>,
    pub installed_size_kb: u64,
    pub maintainer: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub description: Option<String>,
}

impl DebianControl {
    /// First line of the description.
    pub fn summary(&self) -> &str {
        self.description
            .as_deref()
            .and_then(|description| description.lines().next())
            .unwrap_or_default()
    }

    pub fn size_bytes(&self) -> u64 {
        self.installed_size_kb.saturating_mul(1024)
    }

    pub fn into_record(self, requested_name: &str, installed: bool, icon: String) -> PackageRecord {
        let section = self.section.as_deref().unwrap_or_default();
        PackageRecord {
            id: PackageRecord::record_id(PackageSource::Debian, requested_name),
            name: self
                .package
                .clone()
                .unwrap_or_else(|| requested_name.to_string()),
            summary: self.summary().to_string(),
            description: self.description.clone().unwrap_or_default(),
            icon,
            version: self.version.clone().unwrap_or_default(),
            size: self.size_bytes(),
            category: section_category(section).map(str::to_string),
            developer: self.maintainer.unwrap_or_else(|| "Unknown".to_string()),
            license: self.license.unwrap_or_else(|| "Unknown".to_string()),
            homepage: self.homepage.unwrap_or_default(),
            screenshots: Vec::new(),
            source: PackageSource::Debian,
            installed,
            rating: 0.0,
        }
    }
}

/// Parses the first stanza of a field:value block. Indented lines continue
/// the previous field and are appended on a new line, trimmed.
pub fn parse_control_block(output: &str) -> DebianControl {
    let mut fields: Vec<(String, String)> = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            if fields.is_empty() {
                continue;
            }
            break;
        }

        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = fields.last_mut() {
                value.push('\n');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((field, value)) = line.split_once(':') {
            fields.push((field.trim().to_string(), value.trim().to_string()));
        }
    }

    let take = |name: &str| {
        fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_empty())
    };

    DebianControl {
        package: take("Package"),
        version: take("Version"),
        section: take("Section"),
        installed_size_kb: take("Installed-Size")
            .map(|value| parse_leading_integer(&value))
            .unwrap_or(0),
        maintainer: take("Maintainer"),
        license: take("License"),
        homepage: take("Homepage"),
        description: take("Description"),
    }
}

fn parse_leading_integer(value: &str) -> u64 {
    let digits: String = value
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

/// Turns Debian tool output into [`PackageRecord`]s, with the package cache in
/// front of searches.
pub struct DebianResolver {
    source: Arc<dyn DebianSource>,
    cache: Arc<PackageCache>,
    icons: Arc<IconIndex>,
    result_limit: usize,
}

impl DebianResolver {
    pub fn new(
        source: Arc<dyn DebianSource>,
        cache: Arc<PackageCache>,
        icons: Arc<IconIndex>,
    ) -> Self {
        Self {
            source,
            cache,
            icons,
            result_limit: 50,
        }
    }

    pub fn result_limit(mut self, limit: usize) -> Self {
        self.result_limit = limit;
        self
    }

    /// Cached search. An exact (case-insensitive) name match is resolved
    /// first; at most `result_limit` candidates are resolved in total and
    /// candidates whose details cannot be read are skipped.
    pub async fn search(&self, query: &str) -> Vec<PackageRecord> {
        let key = cache_key(PackageSource::Debian, query);
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }
        self.refresh(query).await
    }

    /// Resolves `query` against the tools and overwrites its cache entry,
    /// which notifies the key's subscribers. A failing search tool leaves the
    /// entry untouched.
    pub async fn refresh(&self, query: &str) -> Vec<PackageRecord> {
        let key = cache_key(PackageSource::Debian, query);
        let Some(candidates) = self.candidates(query).await else {
            return Vec::new();
        };

        let lowered = query.to_lowercase();
        let exact = candidates
            .iter()
            .position(|candidate| candidate.name.to_lowercase() == lowered);

        let order = exact
            .into_iter()
            .chain((0..candidates.len()).filter(|index| Some(*index) != exact))
            .take(self.result_limit);

        let mut records = Vec::new();
        for index in order {
            if let Some(record) = self.details(&candidates[index].name).await {
                records.push(record);
            }
        }

        tracing::debug!(key = %key, records = records.len(), "debian search resolved");
        self.cache.set(&key, records.clone(), query);
        records
    }

    /// Resolves the first `result_limit` candidates in tool order without
    /// reading or writing the cache.
    pub async fn search_uncached(&self, query: &str) -> Vec<PackageRecord> {
        let Some(candidates) = self.candidates(query).await else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for candidate in candidates.iter().take(self.result_limit) {
            if let Some(record) = self.details(&candidate.name).await {
                records.push(record);
            }
        }
        records
    }

    /// Detail lookup plus installed-state check for one package. Returns
    /// `None` when the package cannot be described.
    pub async fn details(&self, package: &str) -> Option<PackageRecord> {
        if !is_valid_package_name(package) {
            tracing::warn!(package, "ignoring invalid Debian package name");
            return None;
        }

        let control = match self.source.show(package).await {
            Ok(output) if !output.trim().is_empty() => parse_control_block(&output),
            Ok(_) => {
                tracing::debug!(package, "no package details");
                return None;
            }
            Err(error) => {
                tracing::warn!(
                    package,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to read package details"
                );
                return None;
            }
        };

        // dpkg-query fails for packages it has never seen; that means "not installed".
        let installed = match self.source.installed_status(package).await {
            Ok(status) => status.contains(INSTALLED_MARKER),
            Err(error) => {
                tracing::debug!(
                    package,
                    kind = ?error.kind,
                    message = %error.message,
                    "installed-state check failed, assuming not installed"
                );
                false
            }
        };

        let icon = self
            .icons
            .resolve_icon(package, control.section.as_deref().unwrap_or_default());
        Some(control.into_record(package, installed, icon))
    }

    /// Distinct Debian sections, or a fixed default list when the tool yields
    /// nothing.
    pub async fn available_sections(&self) -> Vec<String> {
        match self.source.list_sections().await {
            Ok(output) => {
                let sections: Vec<String> = output
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();
                if sections.is_empty() {
                    tracing::info!("no sections reported, using defaults");
                    return default_sections();
                }
                tracing::debug!(sections = sections.len(), "debian sections listed");
                sections
            }
            Err(error) => {
                tracing::warn!(
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to list debian sections, using defaults"
                );
                default_sections()
            }
        }
    }

    /// Sorted, distinct desktop categories reachable from the available
    /// sections.
    pub async fn available_categories(&self) -> Vec<String> {
        let sections = self.available_sections().await;
        let categories: BTreeSet<&'static str> = sections
            .iter()
            .filter_map(|section| section_category(section))
            .collect();

        if categories.is_empty() {
            return DEFAULT_CATEGORIES.iter().map(|name| name.to_string()).collect();
        }
        categories.into_iter().map(str::to_string).collect()
    }

    pub async fn packages_by_section(&self, section: &str, limit: usize) -> Vec<PackageRecord> {
        let section = section.trim();
        if !is_valid_section(section) {
            tracing::warn!(section, "rejecting invalid section name");
            return Vec::new();
        }

        let names = match self.source.names_in_section(section, limit).await {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(
                    section,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to list packages in section"
                );
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for name in names.lines().map(str::trim).filter(|name| !name.is_empty()).take(limit) {
            if let Some(record) = self.details(name).await {
                records.push(record);
            }
        }
        records
    }

    pub async fn install(&self, package: &str) -> bool {
        if !self.accepts_mutation(PackageAction::Install, package) {
            return false;
        }
        let result = self.source.install(package).await;
        finish_mutation(PackageAction::Install, package, result)
    }

    pub async fn remove(&self, package: &str) -> bool {
        if !self.accepts_mutation(PackageAction::Remove, package) {
            return false;
        }
        let result = self.source.remove(package).await;
        finish_mutation(PackageAction::Remove, package, result)
    }

    fn accepts_mutation(&self, action: PackageAction, package: &str) -> bool {
        let valid = is_valid_package_name(package);
        if !valid {
            tracing::warn!(package, action = ?action, "refusing to act on invalid package name");
        }
        valid
    }

    async fn candidates(&self, query: &str) -> Option<Vec<SearchCandidate>> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        match self.source.search_names(query).await {
            Ok(output) => Some(parse_search_output(&output)),
            Err(error) => {
                tracing::error!(
                    query,
                    kind = ?error.kind,
                    message = %error.message,
                    "debian package search failed"
                );
                None
            }
        }
    }
}

fn finish_mutation(
    action: PackageAction,
    package: &str,
    result: AdapterResult<ProcessOutput>,
) -> bool {
    match result {
        Ok(output) => mutation_succeeded(PackageSource::Debian, action, package, &output),
        Err(error) => {
            log_mutation_error(PackageSource::Debian, action, package, &error);
            false
        }
    }
}

fn default_sections() -> Vec<String> {
    DEFAULT_SECTIONS.iter().map(|name| name.to_string()).collect()
}
