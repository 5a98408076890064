//! Trawl main entry point
//!
//! This is the command-line interface for the Trawl site crawler.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use trawl::config::{load_settings, Settings, SiteDescription, SiteRegistry};
use trawl::crawler::{CrawlOptions, Crawler, FallbackHandler, FetchSession, YtDlpFallback};
use trawl::download::{DownloadPipeline, FfprobeProbe};
use trawl::output::{LocalSink, NfoWriter, Sink};
use trawl::state::{DedupStore, PaginationCursor};
use trawl::url::is_url;
use tracing_subscriber::EnvFilter;

/// Trawl: a configuration-driven site crawler
///
/// A single URL target is matched to its site by host. Otherwise the first
/// target names a site, the second a mode and the rest form the query. A
/// site with no mode lists the modes it declares.
#[derive(Parser, Debug)]
#[command(name = "trawl")]
#[command(version = "1.0.0")]
#[command(about = "A configuration-driven site crawler", long_about = None)]
struct Cli {
    /// Path to the TOML settings file
    #[arg(short, long, value_name = "FILE", default_value = "trawl.toml")]
    config: PathBuf,

    /// URL, or SITE [MODE QUERY...]
    #[arg(value_name = "TARGET", required = true, num_args = 1..)]
    targets: Vec<String>,

    /// Re-download and replace existing files, ignoring recorded state
    #[arg(long)]
    overwrite: bool,

    /// Rewrite sidecar files, ignoring recorded state
    #[arg(long)]
    refresh_sidecar: bool,

    /// Record items already present at a remote destination
    #[arg(long)]
    apply_state: bool,

    /// Start page, optionally with an item offset (N or N.M)
    #[arg(long, value_name = "N[.M]", default_value = "1")]
    page: PaginationCursor,

    /// Sort order passed to URL templates as {sort}
    #[arg(long)]
    sort: Option<String>,

    /// Minimum duration passed to URL templates as {min_duration}
    #[arg(long)]
    min_duration: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// What a run does once targets are resolved
enum Action<'a> {
    /// A URL no site description claims
    Fallback(String),
    /// A URL or bare identifier for a site
    Input(&'a SiteDescription, String),
    /// A named mode of a site with a query
    Mode(&'a SiteDescription, String, String),
    /// List a site's modes
    ListModes(&'a SiteDescription),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading settings from: {}", cli.config.display());
    let settings = load_settings(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    let registry = SiteRegistry::load_dir(&settings.site_dir).with_context(|| {
        format!(
            "Failed to load site descriptions from {}",
            settings.site_dir.display()
        )
    })?;

    let action = resolve_action(&cli.targets, &registry)?;
    if let Action::ListModes(site) = action {
        print_modes(site);
        return Ok(());
    }

    let options = CrawlOptions {
        overwrite: cli.overwrite,
        refresh_sidecar: cli.refresh_sidecar,
        apply_state: cli.apply_state,
        sort: cli.sort.clone(),
        min_duration: cli.min_duration.clone(),
    };

    let mut session = FetchSession::new(&settings).context("Failed to set up the fetch session")?;
    let mut store = DedupStore::load(&settings.state_file)
        .with_context(|| format!("Failed to load {}", settings.state_file.display()))?;
    tracing::info!("{} items already handled", store.len());

    let sink: Arc<dyn Sink> = Arc::new(LocalSink::from_config(&settings.destination));
    let pipeline = DownloadPipeline::new(
        session.client().clone(),
        Arc::new(FfprobeProbe::default()),
        Arc::clone(&sink),
        settings.validation.min_bytes_per_second,
    )
    .with_sidecar(Arc::new(NfoWriter));
    let fallback = YtDlpFallback::new(Arc::clone(&sink), session.user_agent());

    let outcome = tokio::select! {
        result = execute(&action, &settings, &mut session, &mut store, &pipeline, &fallback, options, cli.page) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, shutting down");
            Ok(true)
        }
    };

    // Release the browser session on every exit path
    session.close().await;

    match outcome {
        Ok(true) => {
            tracing::info!("Done");
            Ok(())
        }
        Ok(false) => bail!("Nothing could handle {}", cli.targets.join(" ")),
        Err(e) => {
            tracing::error!("Run failed: {}", e);
            Err(e.into())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("trawl=info,warn"),
            1 => EnvFilter::new("trawl=debug,info"),
            2 => EnvFilter::new("trawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Maps command-line targets onto a site and an action
fn resolve_action<'a>(targets: &[String], registry: &'a SiteRegistry) -> anyhow::Result<Action<'a>> {
    let Some((first, rest)) = targets.split_first() else {
        bail!("No target given");
    };

    if rest.is_empty() && is_url(first) {
        return Ok(match registry.find_by_url(first) {
            Some(site) => {
                tracing::info!("{} belongs to {}", first, site.name);
                Action::Input(site, first.clone())
            }
            None => {
                tracing::warn!("No site description covers {}", first);
                Action::Fallback(first.clone())
            }
        });
    }

    let Some(site) = registry.find_by_identifier(first) else {
        return Err(trawl::TrawlError::NoSite(first.clone()).into());
    };

    let Some((second, query)) = rest.split_first() else {
        return Ok(Action::ListModes(site));
    };

    if site.mode(second).is_some() {
        Ok(Action::Mode(site, second.clone(), query.join(" ")))
    } else {
        Ok(Action::Input(site, rest.join(" ")))
    }
}

fn print_modes(site: &SiteDescription) {
    println!("=== {} ({}) ===\n", site.name, site.shortcode);
    println!("Modes:");
    for mode in &site.modes {
        let kind = format!("{:?}", mode.kind).to_lowercase();
        println!("  {:<16} {:<5} {}", mode.name, kind, mode.url.raw());
    }
}

/// Runs one resolved action to completion
#[allow(clippy::too_many_arguments)]
async fn execute(
    action: &Action<'_>,
    settings: &Settings,
    session: &mut FetchSession,
    store: &mut DedupStore,
    pipeline: &DownloadPipeline,
    fallback: &YtDlpFallback,
    options: CrawlOptions,
    cursor: PaginationCursor,
) -> trawl::Result<bool> {
    let (site, input) = match action {
        Action::Fallback(url) => return Ok(fallback.handle(url, options.overwrite).await),
        Action::ListModes(_) => return Ok(true),
        Action::Input(site, input) => (*site, input),
        Action::Mode(site, _, query) => (*site, query),
    };

    let mut crawler = Crawler::new(site, settings, session, store, pipeline)?
        .with_options(options)
        .with_fallback(fallback);

    match action {
        Action::Mode(_, mode, _) => crawler.run_mode(mode, input, cursor).await,
        _ => crawler.run_input(input, cursor).await,
    }
}
