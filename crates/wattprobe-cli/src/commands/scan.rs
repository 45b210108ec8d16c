//! `wattprobe scan` — probe signal source availability.

use std::time::Duration;

use wattprobe_core::readers::endpoint::{DEFAULT_SERIES, DEFAULT_TIMEOUT, MetricsEndpoint};
use wattprobe_core::readers::perf::{HwEvent, PerfCounters};
use wattprobe_core::readers::procfs;

/// Run the scan command.
pub fn run(endpoint_url: Option<&str>) {
    println!("wattprobe source scan");
    println!();

    let perf = PerfCounters::open();
    let available = perf.available_events();
    println!("Hardware counters (perf_event_open):");
    for event in HwEvent::ALL {
        let status = if available.contains(&event.name()) {
            "ok"
        } else {
            "unavailable"
        };
        println!("  {:<20} {status}", event.name());
    }
    if !perf.is_available() {
        println!("  (no events opened — check kernel.perf_event_paranoid and PMU virtualization)");
    }
    println!();

    println!("OS counters (/proc):");
    print_probe("cpu times", procfs::read_proc_stat().and_then(|s| s.cpu).is_some());
    print_probe("memory", procfs::read_meminfo().is_some());
    print_probe("disk io", procfs::read_disk_totals().is_some());
    print_probe("network io", procfs::read_net_totals().is_some());
    print_probe("load averages", procfs::read_loadavg().is_some());
    print_probe("process count", procfs::count_processes().is_some());
    println!();

    if let Some(url) = endpoint_url {
        let endpoint = MetricsEndpoint::new(url, DEFAULT_SERIES, None, DEFAULT_TIMEOUT);
        match endpoint.read() {
            Some(total) => {
                println!("Metrics endpoint {url}: ok ({DEFAULT_SERIES} = {total:.3})");
            }
            None => {
                // Retry once with a longer timeout before declaring it down.
                let slow = MetricsEndpoint::new(url, DEFAULT_SERIES, None, Duration::from_secs(2));
                match slow.read() {
                    Some(total) => {
                        println!("Metrics endpoint {url}: ok but slow ({DEFAULT_SERIES} = {total:.3})");
                    }
                    None => println!("Metrics endpoint {url}: unreachable or series absent"),
                }
            }
        }
    }
}

fn print_probe(name: &str, ok: bool) {
    println!("  {:<20} {}", name, if ok { "ok" } else { "unavailable" });
}
