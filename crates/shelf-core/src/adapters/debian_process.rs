use std::sync::Arc;
use std::time::Duration;

use crate::adapters::AdapterResult;
use crate::adapters::debian::{
    DebianSource, apt_install_request, apt_remove_request, apt_search_request,
    apt_section_packages_request, apt_sections_request, apt_show_request, dpkg_status_request,
};
use crate::execution::{
    ProcessExecutor, ProcessOutput, ProcessSpawnRequest, SourceFuture, collect_stdout,
    run_command,
};

pub struct ProcessDebianSource {
    executor: Arc<dyn ProcessExecutor>,
    command_timeout: Duration,
    mutation_timeout: Duration,
}

impl ProcessDebianSource {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            executor,
            command_timeout: Duration::from_secs(60),
            mutation_timeout: Duration::from_secs(30 * 60),
        }
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Installs and removals wait on a polkit prompt and a download, so they
    /// get their own, much longer, limit.
    pub fn mutation_timeout(mut self, timeout: Duration) -> Self {
        self.mutation_timeout = timeout;
        self
    }

    async fn stdout(&self, request: ProcessSpawnRequest) -> AdapterResult<String> {
        let origin = request.origin;
        let action = request.action;
        let request = request.timeout(self.command_timeout);
        let output = run_command(self.executor.as_ref(), request).await?;
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

impl DebianSource for ProcessDebianSource {
    fn search_names<'a>(&'a self, query: &'a str) -> SourceFuture<'a, String> {
        Box::pin(self.stdout(apt_search_request(query)))
    }

    fn show<'a>(&'a self, package: &'a str) -> SourceFuture<'a, String> {
        Box::pin(self.stdout(apt_show_request(package)))
    }

    fn installed_status<'a>(&'a self, package: &'a str) -> SourceFuture<'a, String> {
        Box::pin(self.stdout(dpkg_status_request(package)))
    }

    fn list_sections(&self) -> SourceFuture<'_, String> {
        Box::pin(self.stdout(apt_sections_request()))
    }

    fn names_in_section<'a>(&'a self, section: &'a str, limit: usize) -> SourceFuture<'a, String> {
        Box::pin(async move {
            let request = apt_section_packages_request(section, limit)?;
            self.stdout(request).await
        })
    }

    fn install<'a>(&'a self, package: &'a str) -> SourceFuture<'a, ProcessOutput> {
        Box::pin(self.mutation(apt_install_request(package)))
    }

    fn remove<'a>(&'a self, package: &'a str) -> SourceFuture<'a, ProcessOutput> {
        Box::pin(self.mutation(apt_remove_request(package)))
    }
}
