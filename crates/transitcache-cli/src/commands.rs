//! Command implementations.
//!
//! Each command plays the host runtime for one event: it builds a router
//! over the on-disk stores and delivers install/activate, a fetch, a control
//! message, or a sync event.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::oneshot;
use tracing::info;
use transitcache_core::{
    CacheRouter, CachedEntry, ControlMessage, ControlReply, DiskStorage, FetchOutcome,
    HttpFetcher, InstallReport, Request, Response, ResponseKind, RouterConfig, Url,
};

pub fn build_router(origin: &Url, cache_dir: &Path) -> Result<CacheRouter> {
    let storage = DiskStorage::new(cache_dir)
        .with_context(|| format!("Failed to open cache directory: {}", cache_dir.display()))?;
    let fetcher = HttpFetcher::new(origin.clone()).context("Failed to create HTTP client")?;
    let config = RouterConfig::skytrain(origin.clone());
    Ok(CacheRouter::new(config, Arc::new(storage), Arc::new(fetcher)))
}

pub async fn install(router: &CacheRouter) -> Result<()> {
    let report = router.install().await.context("Install failed")?;
    print!("{}", format_install_report(&report));
    match activate_if_ready(router).await? {
        Some(deleted) => {
            for name in deleted {
                println!("deleted old store {}", name);
            }
        }
        None => println!("installed, waiting for the previous version to release its clients"),
    }
    Ok(())
}

/// Activate only when skip-waiting was requested. Returns the deleted stores,
/// or None if the installed version has to wait.
async fn activate_if_ready(router: &CacheRouter) -> Result<Option<Vec<String>>> {
    if !router.ready_to_activate() {
        return Ok(None);
    }
    let deleted = router.activate().await.context("Activation failed")?;
    Ok(Some(deleted))
}

pub async fn fetch(
    router: &CacheRouter,
    target: &str,
    json: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    if let Some(report) = router.ensure_active().await.context("Failed to activate cache")? {
        eprint!("{}", format_install_report(&report));
    }

    let url = router
        .config()
        .origin
        .join(target)
        .with_context(|| format!("Invalid URL: {}", target))?;
    let mut request = Request::get(url);
    if json {
        request = request.with_header("Accept", "application/json");
    }

    let response = match router.handle_fetch(&request).await {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::PassThrough => bail!("{} is not handled by the cache", request.url),
    };
    let cached = router
        .storage()
        .get(&router.config().version.cache_name(), &request.cache_key())
        .await
        .ok()
        .flatten();
    eprintln!("{}", format_summary(&request, &response, cached.as_ref()));

    match output {
        Some(path) => std::fs::write(&path, &response.body)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => std::io::stdout().write_all(&response.body)?,
    }

    // a short-lived host must let background refreshes land before exiting
    router.settle().await;
    Ok(())
}

pub async fn status(router: &CacheRouter, cache_dir: &Path) -> Result<()> {
    router.check_network().await;
    let (tx, rx) = oneshot::channel();
    router.handle_message(ControlMessage::GetVersion, Some(tx)).await?;
    if let Ok(ControlReply::Version { version, offline }) = rx.await {
        println!("version: {}", version);
        println!("network: {}", if offline { "offline" } else { "online" });
    }

    println!("stores in {}:", cache_dir.display());
    let storage = router.storage();
    let names = storage.names().await?;
    if names.is_empty() {
        println!("  (none)");
    }
    for name in names {
        let marker = if router.config().version.owns(&name) { "*" } else { " " };
        println!("{} {} ({} entries)", marker, name, storage.len(&name).await?);
    }
    Ok(())
}

pub async fn clear(router: &CacheRouter) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    router.handle_message(ControlMessage::ClearCache, Some(tx)).await?;
    match rx.await {
        Ok(ControlReply::Cleared { success: true }) => {
            info!("All stores cleared");
            println!("cleared");
            Ok(())
        }
        _ => bail!("Cache clear was not acknowledged"),
    }
}

pub fn sync(router: &CacheRouter, tag: &str) {
    router.sync(tag);
}

fn format_install_report(report: &InstallReport) -> String {
    let mut out = String::new();
    for url in &report.cached {
        out.push_str(&format!("cached  {}\n", url));
    }
    for (url, reason) in &report.failed {
        out.push_str(&format!("failed  {} ({})\n", url, reason));
    }
    out.push_str(&format!(
        "{} cached, {} failed{}\n",
        report.cached.len(),
        report.failed.len(),
        if report.offline_data_stored { ", offline data stored" } else { "" }
    ));
    out
}

fn format_summary(
    request: &Request,
    response: &Response,
    cached: Option<&CachedEntry>,
) -> String {
    let mut summary = format!(
        "{} {} {} [{}] {} bytes",
        request.url,
        response.status,
        response.status_text,
        response.content_type().unwrap_or("-"),
        response.body.len(),
    );
    if response.kind == ResponseKind::Synthetic {
        summary.push_str(" (offline)");
    } else if let Some(entry) = cached {
        summary.push_str(&format!(" (cached {})", entry.age_display()));
    }
    summary
}
