use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use shelf_core::models::PackageSource;
use shelf_core::{PackageService, ShelfConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shelf")]
#[command(version, about = "Search and manage Debian and Flatpak packages", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the package cache and icon index [env: SHELF_CACHE_DIR]
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Base URL of the Flathub catalog API [env: SHELF_CATALOG_URL]
    #[arg(long, global = true)]
    catalog_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a package source
    Search {
        /// `debian` or `flatpak`
        source: PackageSource,
        query: String,
        /// Skip the cache (Debian only)
        #[arg(long)]
        uncached: bool,
    },
    /// Show one package
    Details { source: PackageSource, name: String },
    /// Install a package
    Install { source: PackageSource, name: String },
    /// Remove a package
    Remove { source: PackageSource, name: String },
    /// List Debian sections
    Sections,
    /// List desktop categories reachable from Debian sections
    Categories,
    /// List packages in a Debian section
    Section {
        name: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Resolve the icon for a Debian package
    Icon {
        package: String,
        #[arg(long, default_value = "")]
        section: String,
    },
    /// Inspect or clear the package cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Refresh a query periodically and print every cache update for it
    Watch {
        source: PackageSource,
        query: String,
        /// Seconds between refreshes
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    Stats,
    Clear,
}

#[derive(Serialize)]
struct Outcome<'a> {
    source: PackageSource,
    name: &'a str,
    succeeded: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn config_from(cli: &Cli) -> ShelfConfig {
    let mut config = ShelfConfig::from_env();
    if let Some(dir) = &cli.cache_dir {
        config = config.cache_dir(dir);
    }
    if let Some(url) = &cli.catalog_url {
        config = config.catalog_url(url);
    }
    config
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(error = %error, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let config = config_from(&cli);
    let service = PackageService::from_config(&config);

    let code = match cli.command {
        Commands::Search {
            source,
            query,
            uncached,
        } => {
            prepare_icons(&service, source).await;
            let records = if uncached && source == PackageSource::Debian {
                service.search_debian_uncached(&query).await
            } else {
                service.search(source, &query).await
            };
            print_json(&records)?;
            ExitCode::SUCCESS
        }
        Commands::Details { source, name } => {
            prepare_icons(&service, source).await;
            match service.details(source, &name).await {
                Some(record) => {
                    print_json(&record)?;
                    ExitCode::SUCCESS
                }
                None => {
                    tracing::warn!(source = %source, package = %name, "package not found");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Install { source, name } => {
            let succeeded = service.install(source, &name).await;
            print_json(&Outcome {
                source,
                name: &name,
                succeeded,
            })?;
            exit_code(succeeded)
        }
        Commands::Remove { source, name } => {
            let succeeded = service.remove(source, &name).await;
            print_json(&Outcome {
                source,
                name: &name,
                succeeded,
            })?;
            exit_code(succeeded)
        }
        Commands::Sections => {
            print_json(&service.available_sections().await)?;
            ExitCode::SUCCESS
        }
        Commands::Categories => {
            print_json(&service.available_categories().await)?;
            ExitCode::SUCCESS
        }
        Commands::Section { name, limit } => {
            prepare_icons(&service, PackageSource::Debian).await;
            let limit = limit.unwrap_or(config.section_limit);
            print_json(&service.packages_by_section(&name, limit).await)?;
            ExitCode::SUCCESS
        }
        Commands::Icon { package, section } => {
            prepare_icons(&service, PackageSource::Debian).await;
            println!("{}", service.icons().resolve_icon(&package, &section));
            ExitCode::SUCCESS
        }
        Commands::Cache { action } => {
            match action {
                CacheAction::Stats => print_json(&service.cache_stats())?,
                CacheAction::Clear => {
                    service.clear_cache();
                    tracing::info!(path = %service.cache().path().display(), "package cache cleared");
                }
            }
            ExitCode::SUCCESS
        }
        Commands::Watch {
            source,
            query,
            interval,
        } => {
            prepare_icons(&service, source).await;
            watch(&service, source, &query, Duration::from_secs(interval.max(1))).await?;
            ExitCode::SUCCESS
        }
    };

    service.cache().flush().await;
    Ok(code)
}

/// Debian records carry icons from the AppStream index, so it has to be
/// loaded (or built) before resolving them.
async fn prepare_icons(service: &PackageService, source: PackageSource) {
    if source != PackageSource::Debian {
        return;
    }
    service.wait_for_icon_index().await;
}

async fn watch(
    service: &PackageService,
    source: PackageSource,
    query: &str,
    interval: Duration,
) -> Result<(), Box<dyn Error>> {
    let key = shelf_core::cache::cache_key(source, query);
    let mut subscription = service.cache().subscribe(&key);

    print_json(&service.search(source, query).await)?;
    tracing::info!(key = %key, interval_secs = interval.as_secs(), "watching for cache updates");

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                service.refresh(source, query).await;
            }
            update = subscription.recv() => {
                let Some(update) = update else { break };
                print_json(update.data.as_slice())?;
            }
        }
    }

    service.cache().unsubscribe(&key, subscription.id());
    Ok(())
}

fn exit_code(succeeded: bool) -> ExitCode {
    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
