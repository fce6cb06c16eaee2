//! Command line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use fieldroute_provider_osm::{NOMINATIM_URL, OSRM_URL};

#[derive(Debug, Parser)]
#[command(name = "fieldroute", version, about = "Cluster field-service jobs and dispatch them to technicians")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Schedule every job starting in `[start, end)` and print the result as JSON.
    Schedule(ScheduleArgs),
}

#[derive(Debug, Args)]
pub(crate) struct ScheduleArgs {
    /// Window start, RFC 3339.
    #[arg(long)]
    pub(crate) start: String,
    /// Window end, RFC 3339; must be after start.
    #[arg(long)]
    pub(crate) end: String,
    /// JSON array of service jobs.
    #[arg(long)]
    pub(crate) jobs: PathBuf,
    /// JSON array of technicians.
    #[arg(long)]
    pub(crate) technicians: PathBuf,
    /// TOML file with dispatch settings; defaults apply when omitted.
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    /// Read location references as "lat,lon" and use straight-line distances only.
    #[arg(long)]
    pub(crate) offline: bool,
    /// Nominatim server.
    #[arg(long, default_value = NOMINATIM_URL)]
    pub(crate) geocoder_url: String,
    /// OSRM server.
    #[arg(long, default_value = OSRM_URL)]
    pub(crate) router_url: String,
}
