//! CLI for wattprobe — collect VM feature ticks, merge them with host power data.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wattprobe")]
#[command(about = "wattprobe — VM performance signals fused with host power measurements")]
#[command(version = wattprobe_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe which signal sources are available on this machine
    Scan {
        /// Also probe a metrics endpoint URL for reachability
        #[arg(long)]
        endpoint_url: Option<String>,
    },

    /// Collect a feature run: one record per tick for a fixed duration
    Collect {
        /// Collection duration in seconds
        #[arg(long, default_value_t = 300.0)]
        duration: f64,

        /// Seconds between ticks
        #[arg(long, default_value_t = 1.0)]
        interval: f64,

        /// Output path for the JSON feature sequence (a CSV mirror and a
        /// .run.json metadata file are written beside it)
        #[arg(long, default_value = "data/vm_features.json")]
        output: String,

        /// Metrics endpoint scraped for cumulative process CPU seconds
        #[arg(long, default_value = "http://localhost:28282/metrics")]
        endpoint_url: String,

        /// Disable the metrics endpoint scrape entirely
        #[arg(long)]
        no_endpoint: bool,

        /// Series name consumed from the endpoint
        #[arg(long, default_value = wattprobe_core::readers::endpoint::DEFAULT_SERIES)]
        series: String,

        /// Restrict endpoint samples to ones labeled vm_name="<NAME>"
        #[arg(long)]
        vm_name: Option<String>,

        /// Connect/read timeout for one scrape, in milliseconds
        #[arg(long, default_value_t = 500)]
        scrape_timeout_ms: u64,

        /// Use one read per source per tick instead of bracketed reads
        #[arg(long)]
        single_shot: bool,

        /// Fixed workload label attached to every tick
        #[arg(long)]
        label: Option<String>,

        /// Comma-separated workload sequence cycled round-robin for labeling
        /// (the stress runner itself is driven separately)
        #[arg(long)]
        workloads: Option<String>,

        /// Seconds each workload sequence entry stays active
        #[arg(long, default_value_t = 60.0)]
        workload_secs: f64,
    },

    /// Merge a feature run with host power data into a training table
    Merge {
        /// Feature sequence JSON produced by `collect`
        #[arg(long)]
        features: String,

        /// Host power CSV produced by the external power collector
        #[arg(long)]
        power: String,

        /// Output path for the merged CSV (a .stats.json sidecar is written
        /// beside it)
        #[arg(long)]
        output: String,

        /// Maximum timestamp difference for a match, in seconds
        #[arg(long, default_value_t = 0.2)]
        tolerance: f64,

        /// Power zone used as the training label
        #[arg(long, default_value = "core", value_parser = ["core", "package"])]
        zone: String,

        /// Treat zone values below this wattage as non-matches
        #[arg(long, default_value_t = 0.0)]
        min_power: f64,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { endpoint_url } => commands::scan::run(endpoint_url.as_deref()),
        Commands::Collect {
            duration,
            interval,
            output,
            endpoint_url,
            no_endpoint,
            series,
            vm_name,
            scrape_timeout_ms,
            single_shot,
            label,
            workloads,
            workload_secs,
        } => commands::collect::run(commands::collect::CollectArgs {
            duration,
            interval,
            output,
            endpoint_url: (!no_endpoint).then_some(endpoint_url),
            series,
            vm_name,
            scrape_timeout_ms,
            single_shot,
            label,
            workloads,
            workload_secs,
        }),
        Commands::Merge {
            features,
            power,
            output,
            tolerance,
            zone,
            min_power,
        } => commands::merge::run(&features, &power, &output, tolerance, &zone, min_power),
    }
}
