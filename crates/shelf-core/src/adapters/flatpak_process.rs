use std::sync::Arc;
use std::time::Duration;

use crate::adapters::AdapterResult;
use crate::adapters::flatpak::{
    FlatpakSource, flatpak_install_request, flatpak_list_installed_request,
    flatpak_uninstall_request, percent_encode,
};
use crate::config::DEFAULT_CATALOG_URL;
use crate::execution::{
    ProcessExecutor, ProcessOutput, ProcessSpawnRequest, SourceFuture, collect_stdout,
    run_command,
};
use crate::models::{CoreError, CoreErrorKind, PackageAction, PackageSource};

/// Flathub over HTTPS for catalog reads, the local `flatpak` binary for
/// everything touching the installation.
pub struct HttpFlatpakSource {
    executor: Arc<dyn ProcessExecutor>,
    agent: ureq::Agent,
    catalog_url: String,
    command_timeout: Duration,
    mutation_timeout: Duration,
}

impl HttpFlatpakSource {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            executor,
            agent: build_agent(Duration::from_secs(30)),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            command_timeout: Duration::from_secs(60),
            mutation_timeout: Duration::from_secs(30 * 60),
        }
    }

    pub fn catalog_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn mutation_timeout(mut self, timeout: Duration) -> Self {
        self.mutation_timeout = timeout;
        self
    }

    pub fn search_url(&self, query: &str) -> String {
        format!("{}/api/v2/search/{}", self.catalog_url, percent_encode(query))
    }

    pub fn appstream_url(&self, app_id: &str) -> String {
        format!("{}/api/v2/appstream/{}", self.catalog_url, percent_encode(app_id))
    }

    async fn get(&self, url: String, action: PackageAction) -> AdapterResult<String> {
        let agent = self.agent.clone();
        tracing::debug!(url = %url, action = ?action, "fetching catalog document");
        tokio::task::spawn_blocking(move || fetch_text(&agent, &url, action))
            .await
            .map_err(|error| {
                CoreError::internal(format!("catalog request task failed: {error}"))
                    .origin(PackageSource::Flatpak)
                    .action(action)
            })?
    }

    async fn stdout(&self, request: ProcessSpawnRequest) -> AdapterResult<String> {
        let origin = request.origin;
        let action = request.action;
        let output = run_command(
            self.executor.as_ref(),
            request.timeout(self.command_timeout),
        )
        .await?;
        collect_stdout(output, origin, action)
    }

    async fn mutation(&self, request: ProcessSpawnRequest) -> AdapterResult<ProcessOutput> {
        run_command(
            self.executor.as_ref(),
            request.timeout(self.mutation_timeout),
        )
        .await
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

fn fetch_text(agent: &ureq::Agent, url: &str, action: PackageAction) -> AdapterResult<String> {
    let network_error = |message: String| {
        CoreError::new(CoreErrorKind::NetworkFailure, message)
            .origin(PackageSource::Flatpak)
            .action(action)
    };

    let response = agent
        .get(url)
        .set("Accept", "application/json")
        .call()
        .map_err(|error| match error {
            ureq::Error::Status(code, _) => {
                network_error(format!("catalog returned HTTP {code} for {url}"))
            }
            ureq::Error::Transport(transport) => {
                network_error(format!("catalog request to {url} failed: {transport}"))
            }
        })?;

    response
        .into_string()
        .map_err(|error| network_error(format!("failed to read catalog response: {error}")))
}

impl FlatpakSource for HttpFlatpakSource {
    fn search<'a>(&'a self, query: &'a str) -> SourceFuture<'a, String> {
        Box::pin(self.get(self.search_url(query), PackageAction::Search))
    }

    fn appstream<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a, String> {
        Box::pin(self.get(self.appstream_url(app_id), PackageAction::Details))
    }

    fn installed_apps(&self) -> SourceFuture<'_, String> {
        Box::pin(self.stdout(flatpak_list_installed_request()))
    }

    fn install<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a, ProcessOutput> {
        Box::pin(self.mutation(flatpak_install_request(app_id)))
    }

    fn uninstall<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a, ProcessOutput> {
        Box::pin(self.mutation(flatpak_uninstall_request(app_id)))
    }
}
