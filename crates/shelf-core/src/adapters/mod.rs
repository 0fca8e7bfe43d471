pub mod debian;
pub mod debian_process;
pub mod flatpak;
pub mod flatpak_process;

pub use debian::{
    DebianControl, DebianResolver, DebianSource, SearchCandidate, apt_install_request,
    apt_remove_request, apt_search_request, apt_show_request, dpkg_status_request,
    is_valid_section, parse_control_block, parse_search_output, section_category,
};
pub use debian_process::ProcessDebianSource;
pub use flatpak::{
    FlatpakResolver, FlatpakSource, flatpak_category, flatpak_install_request,
    flatpak_list_installed_request, flatpak_uninstall_request, parse_installed_apps,
    percent_encode,
};
pub use flatpak_process::HttpFlatpakSource;

use crate::execution::ProcessOutput;
use crate::models::{CoreError, PackageAction, PackageSource};

pub type AdapterResult<T> = Result<T, CoreError>;

/// Decides whether a privileged install/remove worked. Only the exit status
/// counts; stderr is kept for the log.
pub(crate) fn mutation_succeeded(
    source: PackageSource,
    action: PackageAction,
    package: &str,
    output: &ProcessOutput,
) -> bool {
    let stderr = output.stderr_lossy();
    if output.status.success() {
        if stderr.to_ascii_lowercase().contains("error") {
            tracing::warn!(
                source = %source,
                action = ?action,
                package,
                stderr = %stderr.trim(),
                "package operation exited cleanly but reported errors"
            );
        }
        tracing::info!(source = %source, action = ?action, package, "package operation succeeded");
        return true;
    }
    tracing::error!(
        source = %source,
        action = ?action,
        package,
        status = ?output.status,
        stderr = %stderr.trim(),
        "package operation failed"
    );
    false
}

pub(crate) fn log_mutation_error(
    source: PackageSource,
    action: PackageAction,
    package: &str,
    error: &CoreError,
) {
    tracing::error!(
        source = %source,
        action = ?action,
        package,
        kind = ?error.kind,
        message = %error.message,
        "package operation could not run"
    );
}
