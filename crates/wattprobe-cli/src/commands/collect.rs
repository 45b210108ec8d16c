//! `wattprobe collect` — run a feature collection session.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use wattprobe_core::collector::{CollectionLoop, CollectionRun, detect_machine_info};
use wattprobe_core::dataset;
use wattprobe_core::readers::endpoint::MetricsEndpoint;
use wattprobe_core::readers::perf::PerfCounters;
use wattprobe_core::record::FeatureRecord;
use wattprobe_core::sync::{SampleSynchronizer, SyncMode};
use wattprobe_core::workload::{StaticLabel, WorkloadLabeler, WorkloadSequence};

pub struct CollectArgs {
    pub duration: f64,
    pub interval: f64,
    pub output: String,
    pub endpoint_url: Option<String>,
    pub series: String,
    pub vm_name: Option<String>,
    pub scrape_timeout_ms: u64,
    pub single_shot: bool,
    pub label: Option<String>,
    pub workloads: Option<String>,
    pub workload_secs: f64,
}

/// Run the collect command.
pub fn run(args: CollectArgs) {
    if args.duration <= 0.0 || args.interval <= 0.0 {
        eprintln!("Error: duration and interval must be positive");
        std::process::exit(1);
    }

    let mode = if args.single_shot {
        SyncMode::SingleShot
    } else {
        SyncMode::Bracketed
    };
    let interval = Duration::from_secs_f64(args.interval);
    let duration = Duration::from_secs_f64(args.duration);

    let perf = PerfCounters::open();
    if !perf.is_available() {
        eprintln!(
            "Warning: no hardware counters available; records will carry OS metrics only"
        );
        eprintln!("         (try: sudo sysctl kernel.perf_event_paranoid=1)");
    }
    let available_events = perf.available_events();

    let endpoint = args.endpoint_url.as_deref().map(|url| {
        MetricsEndpoint::new(
            url,
            &args.series,
            args.vm_name.as_deref(),
            Duration::from_millis(args.scrape_timeout_ms),
        )
    });

    let machine = detect_machine_info();
    let sync = SampleSynchronizer::new(mode, interval, perf, endpoint, machine.hostname.clone());

    let labeler: Box<dyn WorkloadLabeler> = match (&args.workloads, &args.label) {
        (Some(sequence), _) => Box::new(WorkloadSequence::from_names(
            sequence,
            Duration::from_secs_f64(args.workload_secs.max(0.0)),
        )),
        (None, Some(label)) => Box::new(StaticLabel::new(label.clone())),
        (None, None) => Box::new(StaticLabel::idle()),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    println!("Collecting VM features");
    println!("  Host:      {}", machine.hostname);
    println!("  Duration:  {}s", args.duration);
    println!("  Interval:  {}s", args.interval);
    println!("  Mode:      {mode}");
    println!(
        "  Counters:  {}",
        if available_events.is_empty() {
            "none".to_string()
        } else {
            available_events.join(", ")
        }
    );
    match &args.endpoint_url {
        Some(url) => println!("  Endpoint:  {url} ({})", args.series),
        None => println!("  Endpoint:  disabled"),
    }
    println!("  Output:    {}", args.output);
    println!("  Stop:      Ctrl+C (partial data is kept)");
    println!();

    let mut run_loop = CollectionLoop::new(sync, labeler, duration, interval, mode);
    let run = run_loop.run(&stop);
    log::debug!("run {} finished: {:?}", run.meta.run_id, run.meta.state);

    println!(
        "Run {}: {} ticks recorded ({} attempted, {} overruns)",
        run.meta.state, run.meta.ticks_recorded, run.meta.ticks_attempted, run.meta.schedule_overruns
    );

    let output = Path::new(&args.output);
    if run.records.is_empty() {
        eprintln!("No records collected; nothing written");
        std::process::exit(1);
    }
    if let Err(e) = dataset::save_features(output, &run.records) {
        eprintln!("Error writing feature data: {e}");
        std::process::exit(1);
    }
    match dataset::write_run_meta(output, &run.meta) {
        Ok(meta_path) => {
            println!("Saved {} records to {}", run.records.len(), output.display());
            println!("  CSV mirror: {}", output.with_extension("csv").display());
            println!("  Run meta:   {}", meta_path.display());
        }
        Err(e) => {
            eprintln!("Error writing run metadata: {e}");
            std::process::exit(1);
        }
    }

    print_summary(&run);
}

/// Availability and signal-range summary, printed after every run.
fn print_summary(run: &CollectionRun) {
    let records = &run.records;
    if records.is_empty() {
        return;
    }

    println!();
    println!("{}", "=".repeat(60));
    println!("COLLECTION SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Feature points: {}", records.len());
    let span = records.last().map(|r| r.timestamp).unwrap_or_default()
        - records.first().map(|r| r.timestamp).unwrap_or_default();
    println!("Span: {span:.1}s");

    let utils: Vec<f64> = records.iter().filter_map(|r| r.cpu_utilization).collect();
    if let (Some(min), Some(max)) = (
        utils.iter().copied().reduce(f64::min),
        utils.iter().copied().reduce(f64::max),
    ) {
        println!("CPU utilization range: {min:.1}% - {max:.1}%");
    }

    let availability = |name: &str, present: usize| {
        let pct = present as f64 / records.len() as f64 * 100.0;
        println!("  {:<28} {pct:5.1}% ({present}/{})", name, records.len());
    };
    println!();
    println!("Field availability:");
    availability(
        "hardware counters",
        records.iter().filter(|r| r.cpu_cycles.is_some()).count(),
    );
    availability(
        "cpu window",
        records.iter().filter(|r| r.cpu_utilization.is_some()).count(),
    );
    availability(
        "endpoint cpu seconds",
        records
            .iter()
            .filter(|r| r.process_cpu_seconds_total.is_some())
            .count(),
    );

    let labels: Vec<&str> = {
        let mut seen: Vec<&str> = Vec::new();
        for r in records {
            if !seen.contains(&r.workload_label.as_str()) {
                seen.push(r.workload_label.as_str());
            }
        }
        seen
    };
    println!();
    println!("Workload labels: {}", labels.join(", "));

    if let Some(max_drift) = records
        .iter()
        .skip(1)
        .map(|r: &FeatureRecord| (r.time_delta_seconds - r.collection_interval).abs())
        .reduce(f64::max)
    {
        println!("Max cadence drift: {max_drift:.3}s");
    }
}
