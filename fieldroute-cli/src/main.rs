//! Command line front end: schedules one window of jobs and prints the result as JSON.

mod args;
mod input;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fieldroute_core::memory::{LiteralGeocoder, MemoryJobSource, MemoryRoster};
use fieldroute_core::surface::ScheduleQuery;
use fieldroute_core::{DispatchConfig, DispatchService, ExpiringCache, JobSourcePort, Providers, RosterPort};
use fieldroute_provider_osm as osm;
use reqwest::Client;
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Command, ScheduleArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Schedule(args) => schedule(args).await,
    }
}

async fn schedule(args: ScheduleArgs) -> Result<()> {
    let window = ScheduleQuery::new(&args.start, &args.end).window()?;
    let mut config = input::load_config(args.config.as_deref())?;

    let jobs: Arc<dyn JobSourcePort> = Arc::new(MemoryJobSource::new(input::load_jobs(&args.jobs)?));
    let roster: Arc<dyn RosterPort> = Arc::new(MemoryRoster::new(input::load_technicians(&args.technicians)?));

    let providers = if args.offline {
        tracing::info!("offline mode, straight-line distances only");
        Providers::new(jobs, roster, Arc::new(LiteralGeocoder))
    } else {
        throttle_for_public(&mut config, &args.geocoder_url, &args.router_url);
        let client = Client::builder().user_agent("fieldroute/0.1").build()?;
        osm::providers(client, &args.geocoder_url, &args.router_url, jobs, roster)
    };

    let cache = Arc::new(ExpiringCache::new(config.cache.clone()));
    let service = DispatchService::new(providers, cache, config)?;
    let result = service.schedule_window(window).await?;

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &result)?;
    writeln!(stdout)?;
    Ok(())
}

/// Limit lookup concurrency when either server is a shared public instance.
fn throttle_for_public(config: &mut DispatchConfig, geocoder_url: &str, router_url: &str) {
    let public = osm::is_public_endpoint(geocoder_url) || osm::is_public_endpoint(router_url);
    if public && config.max_concurrent_lookups > osm::PUBLIC_CONCURRENCY {
        tracing::warn!(
            configured = config.max_concurrent_lookups,
            limit = osm::PUBLIC_CONCURRENCY,
            "public OSM servers in use, lowering lookup concurrency"
        );
        config.max_concurrent_lookups = osm::PUBLIC_CONCURRENCY;
    }
}
